//! Renderer that records presented frames

use super::{RenderStats, Renderer};
use crate::decoder::{Timestamp, VideoFrame};
use crate::utils::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// Summary of one presented frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderedFrame {
    pub timestamp: Timestamp,

    pub width: u32,

    pub height: u32,

    /// First RGBA pixel of the frame
    pub first_pixel: [u8; 4],
}

#[derive(Debug, Default)]
struct CollectorState {
    frames: Vec<RenderedFrame>,
    stats: RenderStats,
}

/// Renderer keeping a log of everything it was asked to present
///
/// Clones share the same log, so a clone can be attached to a player while
/// the original is inspected.
#[derive(Debug, Clone, Default)]
pub struct FrameCollector {
    state: Arc<Mutex<CollectorState>>,
}

impl FrameCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames presented since the last reset
    pub fn frames(&self) -> Vec<RenderedFrame> {
        self.state.lock().frames.clone()
    }

    pub fn last_frame(&self) -> Option<RenderedFrame> {
        self.state.lock().frames.last().copied()
    }

    pub fn stats(&self) -> RenderStats {
        self.state.lock().stats
    }
}

impl Renderer for FrameCollector {
    fn render(&mut self, frame: &VideoFrame) -> Result<()> {
        let mut first_pixel = [0u8; 4];
        if let Some(pixel) = frame.buffer.as_slice().get(..4) {
            first_pixel.copy_from_slice(pixel);
        }

        let mut state = self.state.lock();
        state.frames.push(RenderedFrame {
            timestamp: frame.timestamp,
            width: frame.width,
            height: frame.height,
            first_pixel,
        });
        state.stats.frames_rendered += 1;
        state.stats.last_width = frame.width;
        state.stats.last_height = frame.height;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.frames.clear();
        state.stats.resets += 1;
        Ok(())
    }
}
