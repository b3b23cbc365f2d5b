//! Bounded frame queue between decoding and playback
//!
//! Each stream of a pipeline has one [`Buffer`]. The buffer loop pushes
//! decoded frames into it and suspends while it is full, so decoding is
//! paced by playback rather than by decoder speed. The queue remembers
//! whether the end-of-stream marker went through it until it is cleared.

use crate::decoder::Frame;
use crate::utils::error::{CCPlayerError, Result};
use log::warn;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;

struct BufferState {
    /// Pending frames in decode order
    items: VecDeque<Frame>,

    closed: bool,

    /// Set once the end-of-stream marker was put
    end_of_stream: bool,

    /// Timestamp of the last content frame put, for ordering checks
    last_timestamp: Option<i64>,
}

struct BufferInner {
    capacity: usize,
    state: Mutex<BufferState>,
    item_available: Notify,
    space_available: Notify,
}

/// Bounded, closable FIFO of frames for one stream
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    /// Create a buffer holding at most `capacity` frames
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of pending frames, must be positive
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(CCPlayerError::InvalidArgument(
                "Buffer capacity must be positive".to_string(),
            ));
        }

        Ok(Self {
            inner: Arc::new(BufferInner {
                capacity,
                state: Mutex::new(BufferState {
                    items: VecDeque::with_capacity(capacity),
                    closed: false,
                    end_of_stream: false,
                    last_timestamp: None,
                }),
                item_available: Notify::new(),
                space_available: Notify::new(),
            }),
        })
    }

    /// Append a frame, suspending while the buffer is full
    ///
    /// If the future is dropped while waiting, the frame is dropped with it
    /// and any pool buffer it holds goes back to its pool.
    pub async fn put(&self, frame: Frame) -> Result<()> {
        let mut frame = Some(frame);

        loop {
            let space = self.inner.space_available.notified();

            {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(CCPlayerError::Closed("Buffer"));
                }

                if state.items.len() < self.inner.capacity {
                    let frame = frame
                        .take()
                        .ok_or_else(|| crate::internal_error!("Frame already queued"))?;

                    match frame.timestamp() {
                        Some(ts) => {
                            if let Some(last) = state.last_timestamp {
                                if ts.micros() < last {
                                    warn!(
                                        "Non-monotonic frame timestamp {} after {}",
                                        ts.micros(),
                                        last
                                    );
                                }
                            }
                            state.last_timestamp = Some(ts.micros());
                        }
                        None => state.end_of_stream = true,
                    }

                    state.items.push_back(frame);
                    drop(state);

                    self.inner.item_available.notify_waiters();
                    return Ok(());
                }
            }

            space.await;
        }
    }

    /// Remove the oldest frame, suspending while the buffer is empty
    pub async fn take(&self) -> Result<Frame> {
        loop {
            let item = self.inner.item_available.notified();

            if let Some(frame) = self.try_take()? {
                return Ok(frame);
            }

            item.await;
        }
    }

    /// Remove the oldest frame without waiting
    pub fn try_take(&self) -> Result<Option<Frame>> {
        let frame = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(CCPlayerError::Closed("Buffer"));
            }
            state.items.pop_front()
        };

        if frame.is_some() {
            self.inner.space_available.notify_waiters();
        }
        Ok(frame)
    }

    /// Discard all pending frames and forget the end-of-stream marker
    pub fn clear(&self) -> Result<()> {
        let drained: Vec<Frame> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(CCPlayerError::Closed("Buffer"));
            }
            state.end_of_stream = false;
            state.last_timestamp = None;
            state.items.drain(..).collect()
        };

        // Frames are dropped outside the lock; video frames return their
        // buffers to the pool here.
        drop(drained);

        self.inner.space_available.notify_waiters();
        Ok(())
    }

    /// Close the buffer, dropping pending frames and failing all waiters
    ///
    /// Idempotent.
    pub fn close(&self) {
        let drained: Vec<Frame> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.items.drain(..).collect()
        };
        drop(drained);

        self.inner.item_available.notify_waiters();
        self.inner.space_available.notify_waiters();
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.inner.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Whether the end-of-stream marker was put since the last clear
    pub fn has_end_of_stream(&self) -> bool {
        self.inner.state.lock().end_of_stream
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Buffer")
            .field("capacity", &self.inner.capacity)
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .field("end_of_stream", &state.end_of_stream)
            .finish()
    }
}
