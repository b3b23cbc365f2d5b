//! Renderer module for CCPlayer
//!
//! The engine does not draw anything itself. It hands every presented video
//! frame to an attached [`Renderer`], which may upload it to a texture,
//! encode it or just record it.

mod collector;

pub use collector::{FrameCollector, RenderedFrame};

use crate::decoder::VideoFrame;
use crate::utils::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// Renderer shared between the caller and the playback loop
pub type SharedRenderer = Arc<Mutex<dyn Renderer>>;

/// Sink for presented video frames
pub trait Renderer: Send {
    /// Render a video frame
    ///
    /// # Arguments
    ///
    /// * `frame` - Frame to present; its pixels are only valid for the call
    fn render(&mut self, frame: &VideoFrame) -> Result<()>;

    /// Drop whatever is on screen, called on stop and seek
    fn reset(&mut self) -> Result<()>;
}

/// Render statistics for performance monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Frames rendered since creation
    pub frames_rendered: u64,

    /// Number of resets
    pub resets: u64,

    /// Size of the last rendered frame
    pub last_width: u32,
    pub last_height: u32,
}
