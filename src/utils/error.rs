//! Error types for the CCPlayer playback engine
//!
//! This module defines the error taxonomy used throughout the engine.
//! We use thiserror for the library error type; the binary wraps it in
//! anyhow at the edge.

use thiserror::Error;

/// Main error type for the playback engine
#[derive(Error, Debug)]
pub enum CCPlayerError {
    /// A pipeline member (decoder, sampler, pool, buffer) could not be constructed
    #[error("Construction error: {0}")]
    Construction(String),

    /// Decoder errors
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Sampler (audio output) errors
    #[error("Sampler error: {0}")]
    Sampler(String),

    /// Renderer errors
    #[error("Renderer error: {0}")]
    Renderer(String),

    /// Command not valid in the current player state
    #[error("Invalid transition: cannot {command} while {state}")]
    InvalidTransition {
        command: &'static str,
        state: String,
    },

    /// Command arrived while another transition is in flight
    #[error("Player is busy, rejected {command}")]
    Busy { command: &'static str },

    /// The operation was cancelled by seek, stop or release
    #[error("Operation cancelled")]
    Cancelled,

    /// Use of a resource after it was closed
    #[error("{0} is closed")]
    Closed(&'static str),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File error: {0}")]
    FileIO(#[from] std::io::Error),

    /// The engine was used before `init()`
    #[error("Engine backend was not initialized")]
    NotInitialized,

    /// Generic error for unexpected situations
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for CCPlayerError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            CCPlayerError::Cancelled
        } else {
            CCPlayerError::Internal(format!("Task panicked: {}", err))
        }
    }
}

impl CCPlayerError {
    /// Create a decoder error from string
    pub fn decoder_error<S: Into<String>>(msg: S) -> Self {
        CCPlayerError::Decoder(msg.into())
    }

    /// Create a construction error from string
    pub fn construction_error<S: Into<String>>(msg: S) -> Self {
        CCPlayerError::Construction(msg.into())
    }
}

/// Convenience type alias for Results in the engine
pub type Result<T> = std::result::Result<T, CCPlayerError>;

/// Extension trait for converting other errors to CCPlayerError
pub trait IntoPlayerError<T> {
    /// Convert this error into a CCPlayerError with the given context
    fn sampler_err(self, context: &str) -> Result<T>;
    fn renderer_err(self, context: &str) -> Result<T>;
    fn config_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoPlayerError<T> for std::result::Result<T, E> {
    fn sampler_err(self, context: &str) -> Result<T> {
        self.map_err(|e| CCPlayerError::Sampler(format!("{}: {}", context, e)))
    }

    fn renderer_err(self, context: &str) -> Result<T> {
        self.map_err(|e| CCPlayerError::Renderer(format!("{}: {}", context, e)))
    }

    fn config_err(self, context: &str) -> Result<T> {
        self.map_err(|e| CCPlayerError::Config(format!("{}: {}", context, e)))
    }
}

/// Helper macro for creating internal errors with file and line information
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::utils::error::CCPlayerError::Internal(
            format!("{} at {}:{}", $msg, file!(), line!())
        )
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::utils::error::CCPlayerError::Internal(
            format!("{} at {}:{}", format!($fmt, $($arg)*), file!(), line!())
        )
    };
}
