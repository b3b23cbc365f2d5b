//! Shared fixtures for the integration tests

#![allow(dead_code)]

use ccplayer_core::audio::Sampler;
use ccplayer_core::decoder::{
    AudioFormat, Backend, Decoder, Frame, HardwareAcceleration, Media, SyntheticBackend,
    Timestamp, VideoFrame,
};
use ccplayer_core::pipeline::PoolBuffer;
use ccplayer_core::player::{MediaPlayer, PlaybackStatus, PlayerSettings, PlayerState};
use ccplayer_core::renderer::{FrameCollector, Renderer};
use ccplayer_core::{CCPlayerError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Upper bound for anything a test waits on
pub const TIMEOUT: Duration = Duration::from_secs(20);

/// A player on the synthetic backend with a frame collector attached
pub struct TestFixture {
    pub backend: Arc<SyntheticBackend>,
    pub player: MediaPlayer,
    pub collector: FrameCollector,
}

impl TestFixture {
    /// Decoding and audio output run as fast as possible
    pub fn new() -> Self {
        Self::build(false, PlayerSettings::default())
    }

    /// Audio output takes as long as the audio it plays
    pub fn realtime(settings: PlayerSettings) -> Self {
        Self::build(true, settings)
    }

    fn build(realtime: bool, settings: PlayerSettings) -> Self {
        let backend = Arc::new(SyntheticBackend::with_realtime(realtime));
        let player = MediaPlayer::with_backend(backend.clone(), settings)
            .expect("failed to create player");
        let collector = FrameCollector::new();
        player.attach(collector.clone());

        Self {
            backend,
            player,
            collector,
        }
    }

    pub async fn wait_for_state(&self, predicate: impl FnMut(&PlayerState) -> bool) -> PlayerState {
        let mut receiver = self.player.state();
        let state = tokio::time::timeout(TIMEOUT, receiver.wait_for(predicate))
            .await
            .expect("timed out waiting for player state")
            .expect("state stream closed")
            .clone();
        state
    }

    pub async fn wait_for_status(&self, status: PlaybackStatus) {
        self.wait_for_state(|state| state.status() == Some(status))
            .await;
    }
}

/// Renderer that records the player status every time it is reset
pub struct StatusRecorder {
    state: watch::Receiver<PlayerState>,
    inner: FrameCollector,
    pub statuses: Arc<Mutex<Vec<Option<PlaybackStatus>>>>,
}

impl StatusRecorder {
    pub fn new(player: &MediaPlayer, inner: FrameCollector) -> Self {
        Self {
            state: player.state(),
            inner,
            statuses: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Renderer for StatusRecorder {
    fn render(&mut self, frame: &VideoFrame) -> Result<()> {
        self.inner.render(frame)
    }

    fn reset(&mut self) -> Result<()> {
        self.statuses.lock().push(self.state.borrow().status());
        self.inner.reset()
    }
}

/// Backend whose probe takes a while, to catch the player mid-prepare
pub struct SlowProbeBackend {
    pub inner: SyntheticBackend,
    pub delay: Duration,
}

impl Backend for SlowProbeBackend {
    fn probe(
        &self,
        location: &str,
        hardware_acceleration: &[HardwareAcceleration],
    ) -> Result<Media> {
        std::thread::sleep(self.delay);
        self.inner.probe(location, hardware_acceleration)
    }

    fn create_audio_decoder(&self, media: &Media) -> Result<Box<dyn Decoder>> {
        self.inner.create_audio_decoder(media)
    }

    fn create_video_decoder(&self, media: &Media) -> Result<Box<dyn Decoder>> {
        self.inner.create_video_decoder(media)
    }

    fn create_sampler(&self, format: &AudioFormat) -> Result<Box<dyn Sampler>> {
        self.inner.create_sampler(format)
    }
}

/// Backend whose decoders take `delay` per frame
pub struct SlowDecoderBackend {
    pub inner: SyntheticBackend,
    pub delay: Duration,
}

impl Backend for SlowDecoderBackend {
    fn probe(
        &self,
        location: &str,
        hardware_acceleration: &[HardwareAcceleration],
    ) -> Result<Media> {
        self.inner.probe(location, hardware_acceleration)
    }

    fn create_audio_decoder(&self, media: &Media) -> Result<Box<dyn Decoder>> {
        let inner = self.inner.create_audio_decoder(media)?;
        Ok(Box::new(SlowDecoder { inner, delay: self.delay }))
    }

    fn create_video_decoder(&self, media: &Media) -> Result<Box<dyn Decoder>> {
        let inner = self.inner.create_video_decoder(media)?;
        Ok(Box::new(SlowDecoder { inner, delay: self.delay }))
    }

    fn create_sampler(&self, format: &AudioFormat) -> Result<Box<dyn Sampler>> {
        self.inner.create_sampler(format)
    }
}

struct SlowDecoder {
    inner: Box<dyn Decoder>,
    delay: Duration,
}

impl Decoder for SlowDecoder {
    fn media(&self) -> &Media {
        self.inner.media()
    }

    fn next_frame(&mut self, buffer: Option<PoolBuffer>) -> Result<Frame> {
        std::thread::sleep(self.delay);
        self.inner.next_frame(buffer)
    }

    fn seek_to(&mut self, timestamp: Timestamp, keyframes_only: bool) -> Result<Timestamp> {
        self.inner.seek_to(timestamp, keyframes_only)
    }

    fn reset(&mut self) -> Result<()> {
        self.inner.reset()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Renderer that fails from the `fail_after`-th frame on
pub struct FailingRenderer {
    pub rendered: usize,
    pub fail_after: usize,
}

impl Renderer for FailingRenderer {
    fn render(&mut self, _frame: &VideoFrame) -> Result<()> {
        if self.rendered >= self.fail_after {
            return Err(CCPlayerError::Closed("Surface"));
        }
        self.rendered += 1;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}
