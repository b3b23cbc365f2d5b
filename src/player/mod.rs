//! Player module for CCPlayer
//!
//! This module drives playback: it serializes caller commands through the
//! [`PlayerController`], runs the buffer and playback loops for the active
//! pipeline, and exposes the observable state and event streams through
//! the [`MediaPlayer`] facade.

mod buffer_loop;
mod controller;
mod media_player;
mod playback_loop;
mod queue;
mod state;

pub use controller::PlayerController;
pub use media_player::{MediaPlayer, MediaPlayerBuilder};
pub use queue::{MediaQueue, RepeatMode};

use crate::decoder::{HardwareAcceleration, Media, Timestamp};
use crate::pipeline::{Buffer, PipelineOptions};
use crate::utils::error::{CCPlayerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest audio buffer that keeps the sampler fed
pub const MIN_AUDIO_BUFFER_SIZE: usize = 4;

/// Smallest video buffer that allows decode and presentation to overlap
pub const MIN_VIDEO_BUFFER_SIZE: usize = 2;

pub const MIN_PLAYBACK_SPEED_FACTOR: f64 = 0.5;

pub const MAX_PLAYBACK_SPEED_FACTOR: f64 = 2.0;

/// Status of a prepared player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackStatus {
    /// A command is being applied
    Transitioning,
    Playing,
    Paused,
    Stopped,
    /// Playback reached the end of the media
    Completed,
    Seeking,
    Releasing,
}

impl PlaybackStatus {
    /// Whether commands other than release must be turned away
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            PlaybackStatus::Transitioning | PlaybackStatus::Seeking | PlaybackStatus::Releasing
        )
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackStatus::Transitioning => "transitioning",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::Stopped => "stopped",
            PlaybackStatus::Completed => "completed",
            PlaybackStatus::Seeking => "seeking",
            PlaybackStatus::Releasing => "releasing",
        };
        f.write_str(name)
    }
}

/// Externally observable player state
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerState {
    Empty,
    Preparing,
    Ready { media: Media, status: PlaybackStatus },
}

impl PlayerState {
    pub fn status(&self) -> Option<PlaybackStatus> {
        match self {
            PlayerState::Ready { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn media(&self) -> Option<&Media> {
        match self {
            PlayerState::Ready { media, .. } => Some(media),
            _ => None,
        }
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerState::Empty => f.write_str("empty"),
            PlayerState::Preparing => f.write_str("preparing"),
            PlayerState::Ready { status, .. } => write!(f, "ready ({})", status),
        }
    }
}

/// Buffering progress notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferEvent {
    /// Buffers are filling and playback may stall
    Waiting,

    /// Every active buffer is full or has reached the end of its stream
    Complete,
}

/// Player event for external event handling
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// A command or a loop failed; carries the rendered error
    Error(String),

    Buffer(BufferEvent),
}

/// Arguments of a prepare command
#[derive(Debug, Clone, PartialEq)]
pub struct PrepareOptions {
    /// File path or URL
    pub location: String,

    pub audio_buffer_size: usize,

    pub video_buffer_size: usize,

    /// Acceleration candidates in order of preference
    pub hardware_acceleration: Vec<HardwareAcceleration>,

    /// Seek to keyframes instead of decoding up to the exact target
    pub keyframes_only_seek: bool,
}

impl PrepareOptions {
    /// Options with the minimum buffer sizes and software decoding
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            audio_buffer_size: MIN_AUDIO_BUFFER_SIZE,
            video_buffer_size: MIN_VIDEO_BUFFER_SIZE,
            hardware_acceleration: Vec::new(),
            keyframes_only_seek: false,
        }
    }

    /// Buffer capacities, with positive sizes raised to the minimums
    ///
    /// Zero is passed through so assembly rejects it.
    pub fn pipeline_options(&self) -> PipelineOptions {
        let at_least = |size: usize, minimum: usize| if size == 0 { 0 } else { size.max(minimum) };
        PipelineOptions {
            audio_buffer_size: at_least(self.audio_buffer_size, MIN_AUDIO_BUFFER_SIZE),
            video_buffer_size: at_least(self.video_buffer_size, MIN_VIDEO_BUFFER_SIZE),
        }
    }
}

/// Command accepted by the player
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Prepare(PrepareOptions),
    Play,
    Pause,
    Resume,
    Stop,
    SeekTo(Timestamp),
    Release,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Prepare(_) => "prepare",
            Command::Play => "play",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop => "stop",
            Command::SeekTo(_) => "seek",
            Command::Release => "release",
        }
    }
}

/// Live playback settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerSettings {
    /// Volume level (0.0 to 1.0)
    pub volume: f32,

    pub is_muted: bool,

    /// Speed multiplier within 0.5..=2.0
    pub playback_speed_factor: f64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            is_muted: false,
            playback_speed_factor: 1.0,
        }
    }
}

impl PlayerSettings {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(CCPlayerError::InvalidArgument(format!(
                "Volume must be within 0.0..=1.0, got {}",
                self.volume
            )));
        }
        if !(MIN_PLAYBACK_SPEED_FACTOR..=MAX_PLAYBACK_SPEED_FACTOR)
            .contains(&self.playback_speed_factor)
        {
            return Err(CCPlayerError::InvalidArgument(format!(
                "Playback speed must be within {}..={}, got {}",
                MIN_PLAYBACK_SPEED_FACTOR, MAX_PLAYBACK_SPEED_FACTOR, self.playback_speed_factor
            )));
        }
        Ok(())
    }
}

/// Fill level of one stream buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamBufferStatus {
    pub len: usize,

    pub capacity: usize,

    /// The end-of-stream marker went through the buffer
    pub end_of_stream: bool,
}

impl From<&Buffer> for StreamBufferStatus {
    fn from(buffer: &Buffer) -> Self {
        Self {
            len: buffer.len(),
            capacity: buffer.capacity(),
            end_of_stream: buffer.has_end_of_stream(),
        }
    }
}

/// Fill levels of the live pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStatus {
    pub audio: Option<StreamBufferStatus>,

    pub video: Option<StreamBufferStatus>,
}
