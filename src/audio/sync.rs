//! Audio/video synchronization logic for CCPlayer
//!
//! The synchronizer turns the latest audio and video timestamps into the
//! delay the playback loop waits before presenting a video frame. Delays
//! are clamped to one frame interval so a bad timestamp can neither stall
//! playback nor make it race.

use crate::decoder::Timestamp;
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
struct SyncState {
    /// Last audio timestamp written to the sampler
    audio: Option<Timestamp>,

    /// Timestamp of the video frame about to be presented
    video: Option<Timestamp>,

    /// Timestamp of the video frame presented before it
    previous_video: Option<Timestamp>,
}

/// Computes video presentation delays
#[derive(Debug, Default)]
pub struct Synchronizer {
    state: Mutex<SyncState>,
}

impl Synchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the timestamp of audio handed to the sampler
    pub fn update_audio(&self, timestamp: Timestamp) {
        self.state.lock().audio = Some(timestamp);
    }

    /// Record the timestamp of the next video frame
    pub fn update_video(&self, timestamp: Timestamp) {
        let mut state = self.state.lock();
        state.previous_video = state.video;
        state.video = Some(timestamp);
    }

    /// Delay of the current video frame against the audio clock
    ///
    /// # Arguments
    ///
    /// * `frame_rate` - Video frame rate bounding the delay
    ///
    /// # Returns
    ///
    /// A delay within `[0, 1 / frame_rate]`, zero if either timestamp is unknown
    pub fn sync_with_audio(&self, frame_rate: f64) -> Duration {
        let state = *self.state.lock();
        match (state.video, state.audio) {
            (Some(video), Some(audio)) => Self::clamp(video.micros() - audio.micros(), frame_rate),
            _ => Duration::ZERO,
        }
    }

    /// Delay of the current video frame against the previous one
    ///
    /// Used when the media carries no audio stream.
    pub fn sync_with_video(&self, frame_rate: f64) -> Duration {
        let state = *self.state.lock();
        match (state.video, state.previous_video) {
            (Some(video), Some(previous)) => {
                Self::clamp(video.micros() - previous.micros(), frame_rate)
            }
            _ => Duration::ZERO,
        }
    }

    /// Forget all timestamps
    pub fn reset(&self) {
        *self.state.lock() = SyncState::default();
    }

    fn clamp(delta_micros: i64, frame_rate: f64) -> Duration {
        if !(frame_rate > 0.0) || !frame_rate.is_finite() {
            return Duration::ZERO;
        }
        let max = (1_000_000.0 / frame_rate) as i64;
        Duration::from_micros(delta_micros.clamp(0, max) as u64)
    }
}
