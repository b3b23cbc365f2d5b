//! Decoder module for CCPlayer
//!
//! This module defines the contracts between the playback engine and the
//! codec layer: the per-stream [`Decoder`], the [`Backend`] factory that
//! probes sources and opens decoders and samplers, and the data types that
//! flow out of them. A synthetic test-pattern backend is built in so the
//! engine can run without any codec library.

mod frame;
mod hw_accel;
mod media;
pub mod synthetic;

pub use frame::{AudioFrame, Frame, Timestamp, VideoFrame};
pub use hw_accel::{select as select_hardware_acceleration, HardwareAcceleration};
pub use media::{AudioFormat, Media, VideoFormat};
pub use synthetic::SyntheticBackend;

use crate::audio::Sampler;
use crate::pipeline::PoolBuffer;
use crate::utils::error::Result;

/// Decoder for one stream of a media source
///
/// A decoder is only ever driven by one task at a time; the engine calls it
/// from blocking worker threads.
#[cfg_attr(test, mockall::automock)]
pub trait Decoder: Send {
    /// Media this decoder was opened for
    fn media(&self) -> &Media;

    /// Decode the next frame
    ///
    /// # Arguments
    ///
    /// * `buffer` - Pool buffer receiving the picture, required for video
    ///
    /// # Returns
    ///
    /// The next content frame, or `Frame::EndOfStream` once exhausted
    fn next_frame(&mut self, buffer: Option<PoolBuffer>) -> Result<Frame>;

    /// Reposition the decoder
    ///
    /// # Arguments
    ///
    /// * `timestamp` - Target position
    /// * `keyframes_only` - Stop at the keyframe at or before the target
    ///
    /// # Returns
    ///
    /// The timestamp decoding resumes from
    fn seek_to(&mut self, timestamp: Timestamp, keyframes_only: bool) -> Result<Timestamp>;

    /// Rewind to the start of the stream
    fn reset(&mut self) -> Result<()>;

    /// Release codec resources
    fn close(&mut self) -> Result<()>;
}

/// Factory for decoders and samplers
///
/// Registered once per process with [`crate::init`], or handed directly to
/// [`crate::player::MediaPlayer::with_backend`].
#[cfg_attr(test, mockall::automock)]
pub trait Backend: Send + Sync {
    /// Probe a source
    ///
    /// # Arguments
    ///
    /// * `location` - File path or URL
    /// * `hardware_acceleration` - Candidate methods in order of preference
    fn probe(
        &self,
        location: &str,
        hardware_acceleration: &[HardwareAcceleration],
    ) -> Result<Media>;

    /// Open a decoder for the audio stream of a probed media
    fn create_audio_decoder(&self, media: &Media) -> Result<Box<dyn Decoder>>;

    /// Open a decoder for the video stream of a probed media
    fn create_video_decoder(&self, media: &Media) -> Result<Box<dyn Decoder>>;

    /// Open an audio output for the given format
    fn create_sampler(&self, format: &AudioFormat) -> Result<Box<dyn Sampler>>;
}
