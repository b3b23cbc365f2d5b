//! Audio module for CCPlayer
//!
//! This module holds the audio output contract used by the playback loop,
//! together with the playback clock and the audio/video synchronizer that
//! paces video against the audio stream.

mod clock;
mod null_sampler;
mod sync;

pub use clock::{Clock, ManualTimeSource, SystemTimeSource, TimeSource};
pub use null_sampler::{NullSampler, NullSamplerProbe};
pub use sync::Synchronizer;

use crate::utils::error::Result;

/// Audio output sink driven by the playback loop
///
/// Calls may block for as long as the device needs to accept the data; the
/// engine always invokes them from a blocking worker thread.
#[cfg_attr(test, mockall::automock)]
pub trait Sampler: Send {
    /// Start or resume consuming audio
    fn start(&mut self) -> Result<()>;

    /// Queue interleaved 16-bit PCM for playback
    ///
    /// # Arguments
    ///
    /// * `bytes` - PCM data in the format the sampler was created for
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Set output volume
    ///
    /// # Arguments
    ///
    /// * `volume` - Volume level (0.0 to 1.0)
    fn set_volume(&mut self, volume: f32) -> Result<()>;

    fn set_muted(&mut self, muted: bool) -> Result<()>;

    /// Set playback speed factor, must be positive
    fn set_playback_speed(&mut self, factor: f64) -> Result<()>;

    /// Pause output, keeping queued audio
    fn stop(&mut self) -> Result<()>;

    /// Discard queued audio
    fn flush(&mut self) -> Result<()>;

    /// Block until queued audio has been played out
    fn drain(&mut self) -> Result<()>;

    /// Output latency in microseconds
    fn latency_micros(&self) -> i64;

    /// Release the output device
    fn close(&mut self) -> Result<()>;
}
