//! Decoded frames and presentation timestamps

use crate::pipeline::PoolBuffer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Presentation timestamp in microseconds
///
/// Milliseconds are always derived by integer division, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000))
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(i64::try_from(duration.as_micros()).unwrap_or(i64::MAX))
    }

    pub const fn micros(self) -> i64 {
        self.0
    }

    pub const fn millis(self) -> i64 {
        self.0 / 1_000
    }

    /// Convert to a duration, negative values clamp to zero
    pub fn to_duration(self) -> Duration {
        Duration::from_micros(self.0.max(0) as u64)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Decoded PCM chunk
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Interleaved signed 16-bit little-endian samples
    pub bytes: Vec<u8>,

    pub timestamp: Timestamp,
}

/// Decoded picture held in a pool buffer
///
/// Dropping the frame returns its buffer to the pool it came from.
#[derive(Debug)]
pub struct VideoFrame {
    /// RGBA pixels
    pub buffer: PoolBuffer,

    pub timestamp: Timestamp,

    pub width: u32,

    pub height: u32,
}

/// One unit of decoder output
#[derive(Debug)]
pub enum Frame {
    Audio(AudioFrame),
    Video(VideoFrame),
    EndOfStream,
}

impl Frame {
    /// Timestamp of a content frame, `None` for the end-of-stream marker
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Frame::Audio(frame) => Some(frame.timestamp),
            Frame::Video(frame) => Some(frame.timestamp),
            Frame::EndOfStream => None,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Frame::EndOfStream)
    }
}
