//! High-level media player API for CCPlayer
//!
//! This module provides the caller-facing facade over the
//! [`PlayerController`]: named commands, observable streams, settings and
//! renderer attachment, plus a builder that takes its defaults from the
//! configuration.

use crate::decoder::{Backend, HardwareAcceleration, Timestamp};
use crate::player::{
    BufferStatus, Command, PlayerController, PlayerEvent, PlayerSettings, PlayerState,
    PrepareOptions,
};
use crate::renderer::{Renderer, SharedRenderer};
use crate::utils::config::Config;
use crate::utils::error::{CCPlayerError, Result};
use log::info;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Media player builder for customized configuration
#[derive(Default)]
pub struct MediaPlayerBuilder {
    backend: Option<Arc<dyn Backend>>,

    settings: PlayerSettings,

    /// Buffer sizes and decoder options used by [`MediaPlayer::open`]
    defaults: Option<PrepareOptions>,

    renderer: Option<SharedRenderer>,
}

impl MediaPlayerBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `backend` instead of the one registered with [`crate::init`]
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_settings(mut self, settings: PlayerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Take settings and prepare defaults from a loaded configuration
    pub fn with_config(mut self, config: &Config) -> Result<Self> {
        self.settings = config.player_settings();
        self.defaults = Some(config.prepare_options("")?);
        Ok(self)
    }

    pub fn with_renderer(mut self, renderer: SharedRenderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Build the media player
    ///
    /// Must run inside a tokio runtime.
    pub fn build(self) -> Result<MediaPlayer> {
        let backend = match self.backend {
            Some(backend) => backend,
            None => crate::backend().ok_or(CCPlayerError::NotInitialized)?,
        };
        self.settings.validate()?;

        let player = MediaPlayer {
            controller: PlayerController::new(backend, self.settings),
            initial_settings: self.settings,
            defaults: self.defaults.unwrap_or_else(|| PrepareOptions::new("")),
        };
        if let Some(renderer) = self.renderer {
            player.attach_renderer(renderer);
        }
        Ok(player)
    }
}

/// High-level media player
pub struct MediaPlayer {
    controller: PlayerController,

    /// Settings restored by [`MediaPlayer::reset_settings`]
    initial_settings: PlayerSettings,

    defaults: PrepareOptions,
}

impl MediaPlayer {
    /// Create a player on the backend registered with [`crate::init`]
    ///
    /// # Returns
    ///
    /// `NotInitialized` when no backend was registered
    pub fn new(settings: PlayerSettings) -> Result<Self> {
        MediaPlayerBuilder::new().with_settings(settings).build()
    }

    /// Create a player on an explicit backend
    pub fn with_backend(backend: Arc<dyn Backend>, settings: PlayerSettings) -> Result<Self> {
        MediaPlayerBuilder::new()
            .with_backend(backend)
            .with_settings(settings)
            .build()
    }

    pub fn builder() -> MediaPlayerBuilder {
        MediaPlayerBuilder::new()
    }

    pub fn controller(&self) -> &PlayerController {
        &self.controller
    }

    /// Stream of player states
    pub fn state(&self) -> watch::Receiver<PlayerState> {
        self.controller.state()
    }

    pub fn current_state(&self) -> PlayerState {
        self.controller.current_state()
    }

    /// Stream of errors and buffering events
    pub fn events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.controller.events()
    }

    /// Stream of the latest decoded timestamp
    pub fn buffer_timestamp(&self) -> watch::Receiver<Timestamp> {
        self.controller.buffer_timestamp()
    }

    /// Stream of the latest presented timestamp
    pub fn playback_timestamp(&self) -> watch::Receiver<Timestamp> {
        self.controller.playback_timestamp()
    }

    pub fn settings(&self) -> watch::Receiver<PlayerSettings> {
        self.controller.settings()
    }

    /// Probe `location` and assemble its pipeline
    ///
    /// # Arguments
    ///
    /// * `location` - File path or URL
    /// * `audio_buffer_size` - Audio frames buffered ahead of playback
    /// * `video_buffer_size` - Video frames buffered ahead of playback
    /// * `hardware_acceleration` - Acceleration candidates in order of preference
    pub async fn prepare(
        &self,
        location: &str,
        audio_buffer_size: usize,
        video_buffer_size: usize,
        hardware_acceleration: &[HardwareAcceleration],
    ) -> Result<()> {
        let options = PrepareOptions {
            location: location.to_string(),
            audio_buffer_size,
            video_buffer_size,
            hardware_acceleration: hardware_acceleration.to_vec(),
            keyframes_only_seek: self.defaults.keyframes_only_seek,
        };
        self.prepare_with(options).await
    }

    pub async fn prepare_with(&self, options: PrepareOptions) -> Result<()> {
        info!("Preparing {}", options.location);
        self.controller.submit(Command::Prepare(options)).await
    }

    /// Prepare `location` with the configured defaults
    pub async fn open(&self, location: &str) -> Result<()> {
        let options = PrepareOptions {
            location: location.to_string(),
            ..self.defaults.clone()
        };
        self.prepare_with(options).await
    }

    pub async fn play(&self) -> Result<()> {
        self.controller.submit(Command::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.controller.submit(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.controller.submit(Command::Resume).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.controller.submit(Command::Stop).await
    }

    /// Seek to `timestamp`, clamped to the media duration
    pub async fn seek_to(&self, timestamp: Timestamp) -> Result<()> {
        self.controller.submit(Command::SeekTo(timestamp)).await
    }

    /// Release the prepared media; succeeds from every state
    pub async fn release(&self) -> Result<()> {
        self.controller.submit(Command::Release).await
    }

    pub async fn change_settings(&self, settings: PlayerSettings) -> Result<()> {
        self.controller.change_settings(settings).await
    }

    /// Restore the settings the player was created with
    pub async fn reset_settings(&self) -> Result<()> {
        self.controller.change_settings(self.initial_settings).await
    }

    /// Present video frames through `renderer`
    pub fn attach_renderer(&self, renderer: SharedRenderer) {
        self.controller.attach_renderer(renderer);
    }

    /// Convenience for attaching an owned renderer
    pub fn attach<R: Renderer + 'static>(&self, renderer: R) -> SharedRenderer {
        let shared: SharedRenderer = Arc::new(Mutex::new(renderer));
        self.attach_renderer(Arc::clone(&shared));
        shared
    }

    pub fn detach_renderer(&self) -> Option<SharedRenderer> {
        self.controller.detach_renderer()
    }

    /// Fill levels of the live pipeline
    pub fn buffer_status(&self) -> Option<BufferStatus> {
        self.controller.buffer_status()
    }
}
