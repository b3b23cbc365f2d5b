//! Buffer loop: decodes frames into the stream buffers
//!
//! One task per stream pulls frames from its decoder and pushes them into
//! the stream buffer until the end of the stream. Pushing suspends while the
//! buffer is full, so decoding runs only as fast as playback consumes.

use super::controller::{Reporter, Shared};
use super::{BufferEvent, PlayerEvent};
use crate::decoder::{Frame, Timestamp};
use crate::pipeline::{Buffer, Pipeline, Pool, SharedDecoder};
use crate::utils::error::{CCPlayerError, Result};
use log::{debug, error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Tracks buffer fill levels and emits buffering events
pub(crate) struct BufferingMonitor {
    buffers: Vec<Buffer>,
    complete: AtomicBool,
    shared: Arc<Shared>,
}

impl BufferingMonitor {
    pub(crate) fn new(pipeline: &Pipeline, shared: Arc<Shared>) -> Self {
        Self {
            buffers: pipeline.buffers(),
            complete: AtomicBool::new(false),
            shared,
        }
    }

    /// A fill cycle starts
    pub(crate) fn begin(&self) {
        self.complete.store(false, Ordering::Release);
        self.shared.emit(PlayerEvent::Buffer(BufferEvent::Waiting));
    }

    /// Emit `Complete` once every buffer is full or ended
    pub(crate) fn check(&self) {
        let ready = self
            .buffers
            .iter()
            .all(|buffer| buffer.is_full() || buffer.has_end_of_stream());

        if ready && !self.complete.swap(true, Ordering::AcqRel) {
            debug!("Buffering complete");
            self.shared.emit(PlayerEvent::Buffer(BufferEvent::Complete));
        }
    }

    /// Playback found a buffer empty before its end of stream
    pub(crate) fn underrun(&self) {
        if self.complete.swap(false, Ordering::AcqRel) {
            debug!("Buffer underrun");
            self.shared.emit(PlayerEvent::Buffer(BufferEvent::Waiting));
        }
    }

    fn all_ended(&self) -> bool {
        self.buffers.iter().all(Buffer::has_end_of_stream)
    }
}

/// Inputs of one stream's fill task
struct StreamFill {
    name: &'static str,
    decoder: SharedDecoder,
    buffer: Buffer,
    pool: Option<Pool>,
}

/// Running buffer loop
pub(crate) struct BufferLoop {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl BufferLoop {
    /// Start one fill task per stream
    ///
    /// # Arguments
    ///
    /// * `skip_until` - Frames before this timestamp are decoded and dropped
    pub(crate) fn start(
        pipeline: &Arc<Pipeline>,
        shared: &Arc<Shared>,
        monitor: &Arc<BufferingMonitor>,
        reporter: Reporter,
        parent: &CancellationToken,
        skip_until: Option<Timestamp>,
    ) -> Self {
        let token = parent.child_token();
        monitor.begin();

        let mut streams = Vec::new();
        if let Some(audio) = pipeline.audio() {
            streams.push(StreamFill {
                name: "audio",
                decoder: Arc::clone(&audio.decoder),
                buffer: audio.buffer.clone(),
                pool: None,
            });
        }
        if let Some(video) = pipeline.video() {
            streams.push(StreamFill {
                name: "video",
                decoder: Arc::clone(&video.decoder),
                buffer: video.buffer.clone(),
                pool: Some(video.pool.clone()),
            });
        }

        let duration = pipeline.media().duration;
        let tasks = streams
            .into_iter()
            .map(|stream| {
                let token = token.clone();
                let shared = Arc::clone(shared);
                let monitor = Arc::clone(monitor);
                let reporter = reporter.clone();

                tokio::spawn(async move {
                    let name = stream.name;
                    debug!("Buffer loop for {} stream started", name);

                    let result =
                        fill(stream, &token, &shared, &monitor, skip_until, duration).await;

                    match result {
                        Ok(()) => debug!("Buffer loop for {} stream finished", name),
                        Err(_) if token.is_cancelled() => {
                            debug!("Buffer loop for {} stream cancelled", name)
                        }
                        Err(CCPlayerError::Cancelled) => {}
                        Err(e) => {
                            error!("Buffer loop for {} stream failed: {}", name, e);
                            reporter.failed(e);
                        }
                    }
                })
            })
            .collect();

        Self { token, tasks }
    }

    /// Stop filling without waiting for the tasks to exit
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel the fill tasks and wait for them to exit
    pub(crate) async fn stop(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Buffer loop task ended abnormally: {}", e);
            }
        }
    }
}

async fn fill(
    stream: StreamFill,
    token: &CancellationToken,
    shared: &Shared,
    monitor: &BufferingMonitor,
    skip_until: Option<Timestamp>,
    duration: Timestamp,
) -> Result<()> {
    loop {
        let slot = match &stream.pool {
            Some(pool) => tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                buffer = pool.acquire() => Some(buffer?),
            },
            None => None,
        };

        let decoder = Arc::clone(&stream.decoder);
        let frame = tokio::task::spawn_blocking(move || decoder.lock().next_frame(slot)).await??;

        if token.is_cancelled() {
            return Ok(());
        }

        match frame.timestamp() {
            Some(timestamp) => {
                if skip_until.map(|target| timestamp < target).unwrap_or(false) {
                    continue;
                }

                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Ok(()),
                    result = stream.buffer.put(frame) => result?,
                }

                shared.advance_buffer_timestamp(timestamp);
                monitor.check();
            }
            None => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Ok(()),
                    result = stream.buffer.put(Frame::EndOfStream) => result?,
                }

                debug!("{} stream reached end of stream", stream.name);
                if monitor.all_ended() {
                    shared.advance_buffer_timestamp(duration);
                }
                monitor.check();
                return Ok(());
            }
        }
    }
}
