use anyhow::{Context, Result};
use ccplayer_core::decoder::{HardwareAcceleration, SyntheticBackend, Timestamp};
use ccplayer_core::player::{BufferEvent, MediaPlayer, PlaybackStatus, PlayerEvent};
use ccplayer_core::renderer::FrameCollector;
use ccplayer_core::utils::{format_timestamp, Config};
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// CCPlayer core - plays a source headlessly and reports what happens
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source to play
    #[arg(value_name = "LOCATION", default_value = "synthetic://demo?duration=3000000")]
    location: String,

    /// Set initial volume (0-100)
    #[arg(short, long, value_name = "VOLUME")]
    volume: Option<u8>,

    /// Start muted
    #[arg(short, long)]
    mute: bool,

    /// Playback speed factor (0.5 - 2.0)
    #[arg(short, long)]
    speed: Option<f64>,

    /// Seek to this position in milliseconds before playing
    #[arg(long, value_name = "MILLIS")]
    seek: Option<i64>,

    /// Hardware acceleration candidates, comma separated
    #[arg(long = "hw-accel", value_delimiter = ',')]
    hardware_acceleration: Vec<HardwareAcceleration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Print the probed media description as JSON and exit
    #[arg(long)]
    probe: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(log_level) = &args.log_level {
        config.general.log_level = log_level.clone();
    }

    env_logger::Builder::from_env(Env::default().default_filter_or(&config.general.log_level))
        .format_timestamp_millis()
        .init();

    info!("Starting CCPlayer core v{}", env!("CARGO_PKG_VERSION"));

    if let Some(volume) = args.volume {
        config.playback.volume = f32::from(volume.min(100)) / 100.0;
    }
    if args.mute {
        config.playback.muted = true;
    }
    if let Some(speed) = args.speed {
        config.playback.playback_speed = speed;
    }
    if !args.hardware_acceleration.is_empty() {
        config.decoder.hardware_acceleration = args
            .hardware_acceleration
            .iter()
            .map(|method| method.name().to_string())
            .collect();
    }
    config.validate()?;

    ccplayer_core::init(Arc::new(SyntheticBackend::new()))?;

    if args.probe {
        let backend = ccplayer_core::backend().context("Engine backend missing")?;
        let candidates = config.hardware_acceleration()?;
        let location = args.location.clone();
        let media =
            tokio::task::spawn_blocking(move || backend.probe(&location, &candidates)).await??;
        println!("{}", serde_json::to_string_pretty(&media)?);
        return Ok(());
    }

    let player = MediaPlayer::builder().with_config(&config)?.build()?;
    let collector = FrameCollector::new();
    player.attach(collector.clone());

    let mut events = player.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PlayerEvent::Error(reason)) => error!("Player error: {}", reason),
                Ok(PlayerEvent::Buffer(BufferEvent::Waiting)) => info!("Buffering..."),
                Ok(PlayerEvent::Buffer(BufferEvent::Complete)) => info!("Buffering complete"),
                Err(RecvError::Lagged(missed)) => log::warn!("Missed {} player events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    player.open(&args.location).await?;
    if let Some(media) = player.current_state().media() {
        info!(
            "Opened {} ({})",
            media.location,
            format_timestamp(media.duration)
        );
    }

    if let Some(millis) = args.seek {
        player.seek_to(Timestamp::from_millis(millis)).await?;
    }
    player.play().await?;

    let mut state = player.state();
    let mut position = player.playback_timestamp();
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                info!("State: {}", current);
                match current.status() {
                    Some(PlaybackStatus::Completed) | None => break,
                    _ => {}
                }
            }
            changed = position.changed() => {
                if changed.is_err() {
                    break;
                }
                log::debug!("Position: {}", *position.borrow_and_update());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    let stats = collector.stats();
    info!(
        "Rendered {} frames ({}x{})",
        stats.frames_rendered, stats.last_width, stats.last_height
    );

    player.release().await?;
    Ok(())
}
