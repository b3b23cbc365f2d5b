//! Utility module for CCPlayer
//!
//! Error type, configuration and small formatting helpers shared by the
//! engine and the command line front end.

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{CCPlayerError, Result};

use crate::decoder::Timestamp;

/// Format a media position for logs
///
/// # Returns
///
/// "MM:SS.mmm", or "H:MM:SS.mmm" from one hour on. Negative positions
/// are shown as zero.
pub fn format_timestamp(timestamp: Timestamp) -> String {
    let millis = timestamp.millis().max(0);
    let (hours, rest) = (millis / 3_600_000, millis % 3_600_000);
    let (minutes, rest) = (rest / 60_000, rest % 60_000);
    let (seconds, millis) = (rest / 1_000, rest % 1_000);

    if hours > 0 {
        format!("{}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, seconds, millis)
    }
}
