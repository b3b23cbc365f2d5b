//! Playback loop: drains the stream buffers into the sampler and renderer
//!
//! Audio frames go straight to the sampler, which blocks like a device and
//! is therefore the reference clock. Video frames are held back by the
//! delay the synchronizer computes, then rendered and dropped, which hands
//! their pool buffer back. Pausing closes a gate in front of every take, so
//! no frame is consumed while paused.

use super::buffer_loop::BufferingMonitor;
use super::controller::{Reporter, Shared};
use crate::audio::{Clock, Synchronizer};
use crate::decoder::{Frame, Timestamp, VideoFormat, VideoFrame};
use crate::pipeline::{Buffer, Pipeline, SharedSampler};
use crate::utils::error::{CCPlayerError, IntoPlayerError, Result};
use log::{debug, error, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type StreamFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// State shared by the stream tasks of one playback run
struct PlaybackContext {
    token: CancellationToken,
    paused: watch::Receiver<bool>,
    clock: Arc<Clock>,
    synchronizer: Arc<Synchronizer>,
    shared: Arc<Shared>,
    monitor: Arc<BufferingMonitor>,
    duration: Timestamp,
}

impl PlaybackContext {
    fn speed(&self) -> f64 {
        self.shared.settings().playback_speed_factor
    }

    /// Block while paused; `false` once cancelled
    async fn wait_while_paused(&self) -> bool {
        let mut paused = self.paused.clone();
        loop {
            if !*paused.borrow_and_update() {
                return true;
            }
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return false,
                changed = paused.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Next frame of a stream, `None` once cancelled
    async fn next_frame(&self, buffer: &Buffer) -> Result<Option<Frame>> {
        if !self.wait_while_paused().await || self.token.is_cancelled() {
            return Ok(None);
        }

        if let Some(frame) = buffer.try_take()? {
            return Ok(Some(frame));
        }
        if !buffer.has_end_of_stream() {
            self.monitor.underrun();
        }

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Ok(None),
            frame = buffer.take() => Ok(Some(frame?)),
        }
    }

    /// Sleep for a presentation delay; a pause holds the frame until resume
    async fn pace(&self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        let mut paused = self.paused.clone();

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return false,
                _ = &mut sleep => return true,
                changed = paused.changed() => {
                    if changed.is_err() || !self.wait_while_paused().await {
                        return false;
                    }
                }
            }
        }
    }

    async fn render(&self, frame: VideoFrame) -> Result<()> {
        match self.shared.renderer() {
            Some(renderer) => {
                tokio::task::spawn_blocking(move || {
                    let result = renderer.lock().render(&frame);
                    drop(frame);
                    result
                })
                .await?
                .renderer_err("Rendering video frame")
            }
            None => Ok(()),
        }
    }
}

/// Running playback loop
pub(crate) struct PlaybackLoop {
    token: CancellationToken,
    paused: watch::Sender<bool>,
    clock: Arc<Clock>,

    /// Clock reading when paused, restored on resume
    paused_at: Option<i64>,

    task: JoinHandle<()>,
}

impl PlaybackLoop {
    /// Start draining the pipeline buffers
    ///
    /// # Arguments
    ///
    /// * `position` - Media time playback starts from
    pub(crate) fn start(
        pipeline: &Arc<Pipeline>,
        shared: &Arc<Shared>,
        monitor: &Arc<BufferingMonitor>,
        synchronizer: &Arc<Synchronizer>,
        reporter: Reporter,
        parent: &CancellationToken,
        position: Timestamp,
    ) -> Self {
        let token = parent.child_token();
        let (paused, paused_rx) = watch::channel(false);

        let clock = Arc::new(Clock::new());
        if let Err(e) = clock.set_playback_speed(shared.settings().playback_speed_factor) {
            warn!("Keeping default clock speed: {}", e);
        }
        clock.start(position.micros());

        let context = Arc::new(PlaybackContext {
            token: token.clone(),
            paused: paused_rx,
            clock: Arc::clone(&clock),
            synchronizer: Arc::clone(synchronizer),
            shared: Arc::clone(shared),
            monitor: Arc::clone(monitor),
            duration: pipeline.media().duration,
        });

        let has_audio = pipeline.audio().is_some();
        let mut streams: Vec<StreamFuture> = Vec::new();
        if let Some(audio) = pipeline.audio() {
            streams.push(Box::pin(play_audio(
                audio.buffer.clone(),
                Arc::clone(&audio.sampler),
                Arc::clone(&context),
            )));
        }
        if let Some(video) = pipeline.video() {
            streams.push(Box::pin(play_video(
                video.buffer.clone(),
                video.format,
                has_audio,
                Arc::clone(&context),
            )));
        }

        let task = tokio::spawn(async move {
            debug!("Playback loop started at {}", position);

            let result = join_streams(streams).await;

            match result {
                Ok(()) if context.token.is_cancelled() => debug!("Playback loop cancelled"),
                Ok(()) => {
                    debug!("Playback loop reached end of media");
                    reporter.completed();
                }
                Err(_) if context.token.is_cancelled() => debug!("Playback loop cancelled"),
                Err(CCPlayerError::Cancelled) => {}
                Err(e) => {
                    error!("Playback loop failed: {}", e);
                    reporter.failed(e);
                }
            }
        });

        Self {
            token,
            paused,
            clock,
            paused_at: None,
            task,
        }
    }

    /// Hold consumption at the next frame boundary
    pub(crate) fn pause(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = self.clock.elapsed_micros().ok();
        }
        self.paused.send_replace(true);
    }

    /// Rebase the clock to where it was paused and continue
    pub(crate) fn resume(&mut self) {
        if let Some(elapsed) = self.paused_at.take() {
            self.clock.start(elapsed);
        }
        self.paused.send_replace(false);
    }

    pub(crate) fn set_playback_speed(&self, factor: f64) -> Result<()> {
        self.clock.set_playback_speed(factor)
    }

    /// Stop consuming frames without waiting for the loop to exit
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel the loop and wait for it to exit
    pub(crate) async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            error!("Playback loop task ended abnormally: {}", e);
        }
    }
}

/// Run stream futures concurrently, failing fast on the first error
async fn join_streams(streams: Vec<StreamFuture>) -> Result<()> {
    let mut set = tokio::task::JoinSet::new();
    for stream in streams {
        set.spawn(stream);
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined? {
            set.abort_all();
            return Err(e);
        }
    }
    Ok(())
}

async fn play_audio(
    buffer: Buffer,
    sampler: SharedSampler,
    context: Arc<PlaybackContext>,
) -> Result<()> {
    let latency = sampler.lock().latency_micros();

    loop {
        let frame = match context.next_frame(&buffer).await? {
            Some(frame) => frame,
            None => return Ok(()),
        };

        match frame {
            Frame::Audio(frame) => {
                let presented = Timestamp::from_micros((frame.timestamp.micros() - latency).max(0));
                context.synchronizer.update_audio(presented);
                context.shared.advance_playback_timestamp(presented);

                if context.token.is_cancelled() {
                    return Ok(());
                }
                let sampler = Arc::clone(&sampler);
                tokio::task::spawn_blocking(move || sampler.lock().write(&frame.bytes))
                    .await?
                    .sampler_err("Writing audio")?;
            }
            Frame::EndOfStream => {
                let sampler = Arc::clone(&sampler);
                tokio::task::spawn_blocking(move || sampler.lock().drain())
                    .await?
                    .sampler_err("Draining audio")?;
                debug!("Audio playback reached end of stream");
                return Ok(());
            }
            Frame::Video(_) => {
                return Err(crate::internal_error!("Video frame in audio buffer"));
            }
        }
    }
}

async fn play_video(
    buffer: Buffer,
    format: VideoFormat,
    has_audio: bool,
    context: Arc<PlaybackContext>,
) -> Result<()> {
    let mut last_presented: Option<Timestamp> = None;

    loop {
        let frame = match context.next_frame(&buffer).await? {
            Some(frame) => frame,
            None => return Ok(()),
        };

        match frame {
            Frame::Video(frame) => {
                let timestamp = frame.timestamp;
                context.synchronizer.update_video(timestamp);

                let delay = if has_audio {
                    context.synchronizer.sync_with_audio(format.frame_rate)
                } else {
                    context.synchronizer.sync_with_video(format.frame_rate)
                };

                if !context.pace(delay.div_f64(context.speed())).await {
                    return Ok(());
                }

                context.render(frame).await?;
                context.shared.advance_playback_timestamp(timestamp);
                last_presented = Some(timestamp);
            }
            Frame::EndOfStream => {
                // Keep the last frame on screen until the media ends.
                if let Some(last) = last_presented {
                    let elapsed = context.clock.elapsed_micros().unwrap_or(last.micros());
                    let remaining = (context.duration.micros() - elapsed)
                        .clamp(0, (context.duration.micros() - last.micros()).max(0));
                    let hold = Duration::from_micros(remaining as u64).div_f64(context.speed());
                    if !context.pace(hold).await {
                        return Ok(());
                    }
                }
                debug!("Video playback reached end of stream");
                return Ok(());
            }
            Frame::Audio(_) => {
                return Err(crate::internal_error!("Audio frame in video buffer"));
            }
        }
    }
}
