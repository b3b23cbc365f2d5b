//! Probed media descriptions

use super::{HardwareAcceleration, Timestamp};
use serde::{Deserialize, Serialize};

/// Audio stream format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Number of interleaved channels
    pub channels: u32,
}

impl AudioFormat {
    /// Bytes per second of interleaved 16-bit PCM
    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.channels as u64 * 2
    }
}

/// Video stream format
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,

    pub height: u32,

    /// Frames per second
    pub frame_rate: f64,

    /// Acceleration the decoder opened with
    pub hardware_acceleration: HardwareAcceleration,
}

impl VideoFormat {
    /// Size in bytes of one RGBA frame
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// Nominal spacing between frames
    pub fn frame_interval(&self) -> Timestamp {
        if self.frame_rate > 0.0 {
            Timestamp::from_micros((1_000_000.0 / self.frame_rate) as i64)
        } else {
            Timestamp::ZERO
        }
    }
}

/// Description of a playable source
///
/// Immutable once probed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub id: u64,

    /// File path or URL
    pub location: String,

    pub duration: Timestamp,

    pub audio_format: Option<AudioFormat>,

    pub video_format: Option<VideoFormat>,
}

impl Media {
    /// Whether the media plays over time rather than being a still image
    pub fn is_continuous(&self) -> bool {
        self.duration > Timestamp::ZERO
            && (self.audio_format.is_some()
                || self
                    .video_format
                    .map(|format| format.frame_rate > 0.0)
                    .unwrap_or(false))
    }

    pub fn has_audio(&self) -> bool {
        self.audio_format.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video_format.is_some()
    }
}
