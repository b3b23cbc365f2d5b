//! Player controller implementation for CCPlayer
//!
//! The controller owns the playback session and applies commands strictly
//! one at a time on a dedicated actor task. Callers hold a
//! [`PlayerController`] handle: it screens each command against the
//! published state, queues it, and waits for the actor's verdict. The actor
//! checks the command again right before running it, against the state as
//! it is at that point.

use super::buffer_loop::{BufferLoop, BufferingMonitor};
use super::playback_loop::PlaybackLoop;
use super::state::{self, Transition};
use super::{
    BufferStatus, Command, PlaybackStatus, PlayerEvent, PlayerSettings, PlayerState,
    PrepareOptions, StreamBufferStatus,
};
use crate::audio::{Sampler, Synchronizer};
use crate::decoder::{Backend, Decoder, Media, Timestamp};
use crate::pipeline::{Pipeline, SharedDecoder};
use crate::renderer::SharedRenderer;
use crate::utils::error::{CCPlayerError, Result};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Capacity of the event channel; slow subscribers lose the oldest events
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Observable player data shared between the handle, the actor and the loops
pub(crate) struct Shared {
    state: watch::Sender<PlayerState>,

    events: broadcast::Sender<PlayerEvent>,

    /// Latest decoded timestamp
    buffer_timestamp: watch::Sender<Timestamp>,

    /// Latest presented timestamp
    playback_timestamp: watch::Sender<Timestamp>,

    settings: watch::Sender<PlayerSettings>,

    renderer: Mutex<Option<SharedRenderer>>,

    /// Live pipeline, for buffer status queries
    pipeline: Mutex<Option<Arc<Pipeline>>>,
}

impl Shared {
    pub(crate) fn new(settings: PlayerSettings) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            state: watch::Sender::new(PlayerState::Empty),
            events,
            buffer_timestamp: watch::Sender::new(Timestamp::ZERO),
            playback_timestamp: watch::Sender::new(Timestamp::ZERO),
            settings: watch::Sender::new(settings),
            renderer: Mutex::new(None),
            pipeline: Mutex::new(None),
        })
    }

    /// Broadcast an event; having no subscriber is fine
    pub(crate) fn emit(&self, event: PlayerEvent) {
        debug!("Player event: {:?}", event);
        let _ = self.events.send(event);
    }

    pub(crate) fn advance_buffer_timestamp(&self, timestamp: Timestamp) {
        advance(&self.buffer_timestamp, timestamp);
    }

    pub(crate) fn advance_playback_timestamp(&self, timestamp: Timestamp) {
        advance(&self.playback_timestamp, timestamp);
    }

    fn reset_timestamps(&self, timestamp: Timestamp) {
        self.buffer_timestamp.send_replace(timestamp);
        self.playback_timestamp.send_replace(timestamp);
    }

    pub(crate) fn settings(&self) -> PlayerSettings {
        *self.settings.borrow()
    }

    pub(crate) fn renderer(&self) -> Option<SharedRenderer> {
        self.renderer.lock().clone()
    }

    fn set_state(&self, state: PlayerState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            info!("Player state: {} -> {}", current, state);
            *current = state;
            true
        });
    }
}

/// Move a timestamp stream forward, never backward
fn advance(sender: &watch::Sender<Timestamp>, timestamp: Timestamp) {
    sender.send_if_modified(|current| {
        if timestamp > *current {
            *current = timestamp;
            true
        } else {
            false
        }
    });
}

/// Messages processed by the actor
enum Message {
    Command {
        command: Command,
        reply: oneshot::Sender<Result<()>>,
    },
    ChangeSettings {
        settings: PlayerSettings,
        reply: oneshot::Sender<Result<()>>,
    },
    PlaybackCompleted {
        generation: u64,
    },
    LoopFailed {
        generation: u64,
        error: CCPlayerError,
    },
}

/// Lets a loop report back to the actor that started it
///
/// Reports carry the loop generation, so a report from a loop that has
/// since been replaced is ignored.
#[derive(Clone)]
pub(crate) struct Reporter {
    generation: u64,
    tx: mpsc::WeakUnboundedSender<Message>,
}

impl Reporter {
    fn send(&self, message: Message) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(message);
        }
    }

    pub(crate) fn failed(&self, error: CCPlayerError) {
        self.send(Message::LoopFailed {
            generation: self.generation,
            error,
        });
    }

    pub(crate) fn completed(&self) {
        self.send(Message::PlaybackCompleted {
            generation: self.generation,
        });
    }
}

/// What the loops of every session need from the actor
struct LoopContext {
    shared: Arc<Shared>,

    /// Parent of every loop token
    root: CancellationToken,

    tx: mpsc::WeakUnboundedSender<Message>,

    generations: AtomicU64,
}

impl LoopContext {
    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn reporter(&self, generation: u64) -> Reporter {
        Reporter {
            generation,
            tx: self.tx.clone(),
        }
    }
}

/// A prepared media with its pipeline and loops
struct Session {
    media: Media,

    status: PlaybackStatus,

    options: PrepareOptions,

    pipeline: Arc<Pipeline>,

    monitor: Arc<BufferingMonitor>,

    synchronizer: Arc<Synchronizer>,

    buffer_loop: Option<BufferLoop>,

    playback_loop: Option<PlaybackLoop>,

    /// Generation of the running loops
    generation: u64,

    /// Media time the next playback loop starts from
    position: Timestamp,
}

impl Session {
    fn start_buffering(&mut self, context: &LoopContext, skip_until: Option<Timestamp>) {
        self.buffer_loop = Some(BufferLoop::start(
            &self.pipeline,
            &context.shared,
            &self.monitor,
            context.reporter(self.generation),
            &context.root,
            skip_until,
        ));
    }

    fn start_playback(&mut self, context: &LoopContext) {
        self.playback_loop = Some(PlaybackLoop::start(
            &self.pipeline,
            &context.shared,
            &self.monitor,
            &self.synchronizer,
            context.reporter(self.generation),
            &context.root,
            self.position,
        ));
    }

    /// Cancel both loops, then wait until they have exited
    async fn stop_loops(&mut self, context: &LoopContext) {
        self.generation = context.next_generation();
        let playback_loop = self.playback_loop.take();
        let buffer_loop = self.buffer_loop.take();

        if let Some(playback_loop) = &playback_loop {
            playback_loop.cancel();
        }
        if let Some(buffer_loop) = &buffer_loop {
            buffer_loop.cancel();
        }

        if let Some(playback_loop) = playback_loop {
            playback_loop.stop().await;
        }
        if let Some(buffer_loop) = buffer_loop {
            buffer_loop.stop().await;
        }
    }

    /// Drop every buffered frame and recycle the video pool
    fn discard_buffered(&self) -> Result<()> {
        for buffer in self.pipeline.buffers() {
            buffer.clear()?;
        }
        if let Some(video) = self.pipeline.video() {
            video.pool.reset()?;
        }
        Ok(())
    }
}

/// Run a sampler call on a blocking worker, if the pipeline has audio
async fn on_sampler<F>(pipeline: &Pipeline, call: F) -> Result<()>
where
    F: FnOnce(&mut dyn Sampler) -> Result<()> + Send + 'static,
{
    if let Some(audio) = pipeline.audio() {
        let sampler = Arc::clone(&audio.sampler);
        tokio::task::spawn_blocking(move || {
            let mut sampler = sampler.lock();
            call(sampler.as_mut())
        })
        .await??;
    }
    Ok(())
}

/// Run a call on every decoder of the pipeline, one after the other
async fn on_decoders<F>(pipeline: &Pipeline, call: F) -> Result<()>
where
    F: Fn(&mut dyn Decoder) -> Result<()> + Clone + Send + 'static,
{
    let decoders: Vec<SharedDecoder> = pipeline
        .audio()
        .map(|audio| Arc::clone(&audio.decoder))
        .into_iter()
        .chain(pipeline.video().map(|video| Arc::clone(&video.decoder)))
        .collect();

    for decoder in decoders {
        let call = call.clone();
        tokio::task::spawn_blocking(move || {
            let mut decoder = decoder.lock();
            call(decoder.as_mut())
        })
        .await??;
    }
    Ok(())
}

async fn reset_renderer(shared: &Shared) -> Result<()> {
    if let Some(renderer) = shared.renderer() {
        tokio::task::spawn_blocking(move || renderer.lock().reset()).await??;
    }
    Ok(())
}

fn prepared(session: &mut Option<Session>) -> Result<&mut Session> {
    session
        .as_mut()
        .ok_or_else(|| crate::internal_error!("No prepared media"))
}

/// The actor: sole owner of the session
struct Executor {
    backend: Arc<dyn Backend>,

    context: LoopContext,

    /// Cancellation of the prepare in flight
    operation: Arc<Mutex<CancellationToken>>,

    session: Option<Session>,
}

impl Executor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        debug!("Player controller started");

        while let Some(message) = rx.recv().await {
            match message {
                Message::Command { command, reply } => {
                    let result = self.execute(command).await;
                    if let Err(e) = &result {
                        self.on_error(e).await;
                    }
                    let _ = reply.send(result);
                }
                Message::ChangeSettings { settings, reply } => {
                    let result = self.change_settings(settings).await;
                    let _ = reply.send(result);
                }
                Message::PlaybackCompleted { generation } => {
                    self.on_completed(generation).await;
                }
                Message::LoopFailed { generation, error } => {
                    self.on_loop_failed(generation, error).await;
                }
            }
        }

        debug!("Player controller shutting down");
        if let Err(e) = self.teardown().await {
            warn!("Teardown on shutdown failed: {}", e);
        }
        self.context.root.cancel();
    }

    fn state(&self) -> PlayerState {
        match &self.session {
            Some(session) => PlayerState::Ready {
                media: session.media.clone(),
                status: session.status,
            },
            None => PlayerState::Empty,
        }
    }

    fn publish(&self) {
        self.context.shared.set_state(self.state());
    }

    fn set_status(&mut self, status: PlaybackStatus) {
        if let Some(session) = &mut self.session {
            session.status = status;
        }
        self.publish();
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        let state = self.state();
        if state::validate(&command, &state)? == Transition::NoOp {
            debug!("Nothing to do for {} while {}", command.name(), state);
            return Ok(());
        }

        debug!("Executing {} while {}", command.name(), state);
        match command {
            Command::Prepare(options) => self.prepare(options).await,
            Command::Play => self.play().await,
            Command::Pause => self.pause().await,
            Command::Resume => self.resume().await,
            Command::Stop => self.stop().await,
            Command::SeekTo(timestamp) => self.seek_to(timestamp).await,
            Command::Release => self.release().await,
        }
    }

    /// Rejections leave everything untouched; anything else is fatal to the session
    async fn on_error(&mut self, error: &CCPlayerError) {
        match error {
            CCPlayerError::InvalidTransition { .. }
            | CCPlayerError::Busy { .. }
            | CCPlayerError::Cancelled => {}
            _ => {
                error!("Command failed: {}", error);
                self.context.shared.emit(PlayerEvent::Error(error.to_string()));
                if let Err(e) = self.teardown().await {
                    warn!("Teardown after failure failed: {}", e);
                }
            }
        }
    }

    async fn prepare(&mut self, options: PrepareOptions) -> Result<()> {
        let token = CancellationToken::new();
        *self.operation.lock() = token.clone();

        self.context.shared.set_state(PlayerState::Preparing);
        self.context.shared.reset_timestamps(Timestamp::ZERO);

        let pipeline = match self.assemble(&options, &token).await {
            Ok(pipeline) => Arc::new(pipeline),
            Err(e) => {
                self.publish();
                return Err(e);
            }
        };

        let shared = Arc::clone(&self.context.shared);
        let monitor = Arc::new(BufferingMonitor::new(&pipeline, Arc::clone(&shared)));
        *shared.pipeline.lock() = Some(Arc::clone(&pipeline));

        let mut session = Session {
            media: pipeline.media().clone(),
            status: PlaybackStatus::Stopped,
            options,
            pipeline,
            monitor,
            synchronizer: Arc::new(Synchronizer::new()),
            buffer_loop: None,
            playback_loop: None,
            generation: self.context.next_generation(),
            position: Timestamp::ZERO,
        };
        session.start_buffering(&self.context, None);

        info!(
            "Prepared {} ({}, continuous: {})",
            session.media.location,
            crate::utils::format_timestamp(session.media.duration),
            session.media.is_continuous()
        );
        self.session = Some(session);
        self.publish();
        Ok(())
    }

    /// Probe and assemble, giving up early once release cancels the prepare
    async fn assemble(
        &self,
        options: &PrepareOptions,
        token: &CancellationToken,
    ) -> Result<Pipeline> {
        let backend = Arc::clone(&self.backend);
        let location = options.location.clone();
        let candidates = options.hardware_acceleration.clone();
        let probe = tokio::task::spawn_blocking(move || backend.probe(&location, &candidates));

        let media = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(CCPlayerError::Cancelled),
            media = probe => media??,
        };
        debug!("Probed {:?}", media);

        let backend = Arc::clone(&self.backend);
        let settings = self.context.shared.settings();
        let pipeline_options = options.pipeline_options();
        let pipeline = tokio::task::spawn_blocking(move || {
            Pipeline::assemble(backend.as_ref(), media, pipeline_options, &settings)
        })
        .await??;

        if token.is_cancelled() {
            let result = tokio::task::spawn_blocking(move || pipeline.close()).await?;
            if let Err(e) = result {
                warn!("Closing cancelled pipeline failed: {}", e);
            }
            return Err(CCPlayerError::Cancelled);
        }
        Ok(pipeline)
    }

    async fn play(&mut self) -> Result<()> {
        let from_completed = matches!(
            self.session.as_ref().map(|session| session.status),
            Some(PlaybackStatus::Completed)
        );
        self.set_status(PlaybackStatus::Transitioning);

        if from_completed {
            self.rewind().await?;
        }

        let session = prepared(&mut self.session)?;
        on_sampler(&session.pipeline, |sampler| sampler.start()).await?;
        match &mut session.playback_loop {
            Some(playback_loop) => playback_loop.resume(),
            None => session.start_playback(&self.context),
        }

        self.set_status(PlaybackStatus::Playing);
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        self.set_status(PlaybackStatus::Transitioning);

        let session = prepared(&mut self.session)?;
        if let Some(playback_loop) = &mut session.playback_loop {
            playback_loop.pause();
        }
        on_sampler(&session.pipeline, |sampler| sampler.stop()).await?;

        self.set_status(PlaybackStatus::Paused);
        Ok(())
    }

    async fn resume(&mut self) -> Result<()> {
        self.set_status(PlaybackStatus::Transitioning);

        let session = prepared(&mut self.session)?;
        on_sampler(&session.pipeline, |sampler| sampler.start()).await?;
        match &mut session.playback_loop {
            Some(playback_loop) => playback_loop.resume(),
            None => session.start_playback(&self.context),
        }

        self.set_status(PlaybackStatus::Playing);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.set_status(PlaybackStatus::Transitioning);
        self.rewind().await?;
        self.set_status(PlaybackStatus::Stopped);
        Ok(())
    }

    /// Return the session to its freshly prepared position
    async fn rewind(&mut self) -> Result<()> {
        let context = &self.context;
        let session = prepared(&mut self.session)?;

        session.stop_loops(context).await;
        on_sampler(&session.pipeline, |sampler| {
            sampler.stop()?;
            sampler.flush()
        })
        .await?;
        session.discard_buffered()?;
        on_decoders(&session.pipeline, |decoder| decoder.reset()).await?;
        session.synchronizer.reset();
        reset_renderer(&context.shared).await?;

        context.shared.reset_timestamps(Timestamp::ZERO);
        session.position = Timestamp::ZERO;
        session.start_buffering(context, None);
        Ok(())
    }

    async fn seek_to(&mut self, timestamp: Timestamp) -> Result<()> {
        let context = &self.context;
        let session = prepared(&mut self.session)?;

        let previous = session.status;
        session.status = PlaybackStatus::Seeking;
        context.shared.set_state(PlayerState::Ready {
            media: session.media.clone(),
            status: PlaybackStatus::Seeking,
        });

        let target = Timestamp::from_micros(
            timestamp
                .micros()
                .clamp(0, session.media.duration.micros().max(0)),
        );
        debug!("Seeking to {} from {}", target, previous);

        session.stop_loops(context).await;
        on_sampler(&session.pipeline, |sampler| {
            sampler.stop()?;
            sampler.flush()
        })
        .await?;
        session.discard_buffered()?;

        let keyframes_only = session.options.keyframes_only_seek;
        on_decoders(&session.pipeline, move |decoder| {
            let reached = decoder.seek_to(target, keyframes_only)?;
            debug!("Decoder reached {} seeking to {}", reached, target);
            Ok(())
        })
        .await?;
        session.synchronizer.reset();
        reset_renderer(&context.shared).await?;

        context.shared.reset_timestamps(target);
        session.position = target;
        session.start_buffering(context, Some(target));

        let status = match previous {
            PlaybackStatus::Playing => {
                on_sampler(&session.pipeline, |sampler| sampler.start()).await?;
                session.start_playback(context);
                PlaybackStatus::Playing
            }
            PlaybackStatus::Stopped => PlaybackStatus::Stopped,
            _ => PlaybackStatus::Paused,
        };

        self.set_status(status);
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        self.set_status(PlaybackStatus::Releasing);
        let result = self.teardown().await;
        info!("Player released");
        result
    }

    /// Stop the loops, close the pipeline and go back to `Empty`
    async fn teardown(&mut self) -> Result<()> {
        let result = match self.session.take() {
            Some(mut session) => {
                session.stop_loops(&self.context).await;
                *self.context.shared.pipeline.lock() = None;

                let pipeline = session.pipeline;
                tokio::task::spawn_blocking(move || pipeline.close()).await?
            }
            None => Ok(()),
        };

        self.context.shared.reset_timestamps(Timestamp::ZERO);
        self.publish();
        result
    }

    async fn on_completed(&mut self, generation: u64) {
        let session = match &mut self.session {
            Some(session) if session.generation == generation => session,
            _ => {
                debug!("Ignoring completion of stale loop generation {}", generation);
                return;
            }
        };
        if !matches!(session.status, PlaybackStatus::Playing | PlaybackStatus::Paused) {
            return;
        }

        if let Err(e) = on_sampler(&session.pipeline, |sampler| sampler.stop()).await {
            warn!("Stopping sampler at end of media failed: {}", e);
        }
        info!("Playback completed");
        self.set_status(PlaybackStatus::Completed);
    }

    async fn on_loop_failed(&mut self, generation: u64, error: CCPlayerError) {
        match &self.session {
            Some(session) if session.generation == generation => {}
            _ => {
                debug!("Ignoring failure of stale loop generation {}: {}", generation, error);
                return;
            }
        }

        error!("Playback failed, releasing: {}", error);
        self.context.shared.emit(PlayerEvent::Error(error.to_string()));
        if let Err(e) = self.teardown().await {
            warn!("Teardown after loop failure failed: {}", e);
        }
    }

    async fn change_settings(&mut self, settings: PlayerSettings) -> Result<()> {
        settings.validate()?;

        if let Some(session) = &self.session {
            on_sampler(&session.pipeline, move |sampler| {
                sampler.set_volume(settings.volume)?;
                sampler.set_muted(settings.is_muted)?;
                sampler.set_playback_speed(settings.playback_speed_factor)
            })
            .await?;

            if let Some(playback_loop) = &session.playback_loop {
                playback_loop.set_playback_speed(settings.playback_speed_factor)?;
            }
        }

        debug!("Settings changed to {:?}", settings);
        self.context.shared.settings.send_replace(settings);
        Ok(())
    }
}

/// Handle to the command executor
///
/// Dropping the last handle shuts the executor down and releases whatever
/// was prepared.
pub struct PlayerController {
    tx: mpsc::UnboundedSender<Message>,

    shared: Arc<Shared>,

    operation: Arc<Mutex<CancellationToken>>,
}

impl PlayerController {
    /// Spawn the executor on the current tokio runtime
    ///
    /// # Arguments
    ///
    /// * `backend` - Factory for decoders and samplers
    /// * `settings` - Initial playback settings
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(backend: Arc<dyn Backend>, settings: PlayerSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Shared::new(settings);
        let operation = Arc::new(Mutex::new(CancellationToken::new()));

        let executor = Executor {
            backend,
            context: LoopContext {
                shared: Arc::clone(&shared),
                root: CancellationToken::new(),
                tx: tx.downgrade(),
                generations: AtomicU64::new(0),
            },
            operation: Arc::clone(&operation),
            session: None,
        };
        tokio::spawn(executor.run(rx));

        Self {
            tx,
            shared,
            operation,
        }
    }

    async fn request(
        &self,
        message: impl FnOnce(oneshot::Sender<Result<()>>) -> Message,
    ) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(message(reply))
            .map_err(|_| CCPlayerError::Closed("PlayerController"))?;
        response
            .await
            .map_err(|_| CCPlayerError::Closed("PlayerController"))?
    }

    /// Submit a command and wait until it has been applied
    ///
    /// Commands are rejected up front while a prepare or another transition
    /// is in flight. Release is always accepted and cancels a pending
    /// prepare.
    pub async fn submit(&self, command: Command) -> Result<()> {
        {
            let state = self.shared.state.borrow();
            state::admit(&command, &state)?;
        }

        if matches!(command, Command::Release) {
            self.operation.lock().cancel();
        }

        self.request(|reply| Message::Command { command, reply })
            .await
    }

    /// Validate and apply new playback settings
    pub async fn change_settings(&self, settings: PlayerSettings) -> Result<()> {
        self.request(|reply| Message::ChangeSettings { settings, reply })
            .await
    }

    pub fn state(&self) -> watch::Receiver<PlayerState> {
        self.shared.state.subscribe()
    }

    pub fn current_state(&self) -> PlayerState {
        self.shared.state.borrow().clone()
    }

    pub fn events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.events.subscribe()
    }

    pub fn buffer_timestamp(&self) -> watch::Receiver<Timestamp> {
        self.shared.buffer_timestamp.subscribe()
    }

    pub fn playback_timestamp(&self) -> watch::Receiver<Timestamp> {
        self.shared.playback_timestamp.subscribe()
    }

    pub fn settings(&self) -> watch::Receiver<PlayerSettings> {
        self.shared.settings.subscribe()
    }

    /// Present video through `renderer` from the next frame on
    pub fn attach_renderer(&self, renderer: SharedRenderer) {
        *self.shared.renderer.lock() = Some(renderer);
    }

    /// Stop presenting video; frames keep being paced and recycled
    pub fn detach_renderer(&self) -> Option<SharedRenderer> {
        self.shared.renderer.lock().take()
    }

    /// Fill levels of the live pipeline, `None` when nothing is prepared
    pub fn buffer_status(&self) -> Option<BufferStatus> {
        let pipeline = self.shared.pipeline.lock().clone()?;
        Some(BufferStatus {
            audio: pipeline
                .audio()
                .map(|audio| StreamBufferStatus::from(&audio.buffer)),
            video: pipeline
                .video()
                .map(|video| StreamBufferStatus::from(&video.buffer)),
        })
    }
}
