//! End-to-end playback through the synthetic backend

mod common;

use ccplayer_core::decoder::Timestamp;
use ccplayer_core::player::{BufferEvent, PlaybackStatus, PlayerEvent, PlayerSettings, PlayerState};
use ccplayer_core::renderer::FrameCollector;
use ccplayer_core::MediaPlayer;
use common::{FailingRenderer, SlowDecoderBackend, StatusRecorder, TestFixture, TIMEOUT};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const TEN_SECONDS: &str = "synthetic://movie?duration=10000000";

async fn next_buffer_event(events: &mut broadcast::Receiver<PlayerEvent>) -> BufferEvent {
    loop {
        let event = tokio::time::timeout(TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event stream closed");
        if let PlayerEvent::Buffer(event) = event {
            return event;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_seek_while_playing_and_run_to_completion() {
    let fixture = TestFixture::realtime(PlayerSettings {
        playback_speed_factor: 2.0,
        ..PlayerSettings::default()
    });
    let player = &fixture.player;

    let collector = FrameCollector::new();
    let recorder = StatusRecorder::new(player, collector.clone());
    let statuses = Arc::clone(&recorder.statuses);
    player.attach(recorder);

    let mut events = player.events();
    player.prepare(TEN_SECONDS, 4, 2, &[]).await.unwrap();
    assert_eq!(next_buffer_event(&mut events).await, BufferEvent::Waiting);
    assert_eq!(next_buffer_event(&mut events).await, BufferEvent::Complete);

    player.play().await.unwrap();
    assert_eq!(player.current_state().status(), Some(PlaybackStatus::Playing));

    tokio::time::timeout(TIMEOUT, async {
        while collector.frames().len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    player.seek_to(Timestamp::from_micros(5_000_000)).await.unwrap();
    assert_eq!(player.current_state().status(), Some(PlaybackStatus::Playing));
    assert_eq!(*statuses.lock(), vec![Some(PlaybackStatus::Seeking)]);

    fixture.wait_for_status(PlaybackStatus::Completed).await;

    let frames = collector.frames();
    assert!(!frames.is_empty());
    assert!(frames[0].timestamp >= Timestamp::from_micros(5_000_000));
    assert!(frames.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));
    assert_eq!(frames.len(), 125);

    let status = player.buffer_status().unwrap();
    assert!(status.audio.unwrap().end_of_stream);
    assert!(status.video.unwrap().end_of_stream);
    assert_eq!(*player.buffer_timestamp().borrow(), Timestamp::from_micros(10_000_000));

    let probe = fixture.backend.last_sampler().unwrap();
    assert!(probe.drains >= 1);
    assert!(!probe.started);

    player.release().await.unwrap();
    assert!(fixture.backend.last_sampler().unwrap().closed);
    assert_eq!(*player.playback_timestamp().borrow(), Timestamp::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_seek_restores_previous_status() {
    let fixture = TestFixture::new();
    let player = &fixture.player;
    player.prepare(TEN_SECONDS, 4, 2, &[]).await.unwrap();

    // Stopped stays stopped, at the new position
    player.seek_to(Timestamp::from_millis(3_000)).await.unwrap();
    assert_eq!(player.current_state().status(), Some(PlaybackStatus::Stopped));
    assert_eq!(*player.playback_timestamp().borrow(), Timestamp::from_millis(3_000));

    let mut buffered = player.buffer_timestamp();
    tokio::time::timeout(
        TIMEOUT,
        buffered.wait_for(|timestamp| *timestamp > Timestamp::from_millis(3_000)),
    )
    .await
    .unwrap()
    .unwrap();

    // Targets beyond the end clamp to the duration
    player.seek_to(Timestamp::from_millis(60_000)).await.unwrap();
    assert_eq!(*player.playback_timestamp().borrow(), Timestamp::from_millis(10_000));

    // Completed seeks land in paused
    player.seek_to(Timestamp::from_millis(9_000)).await.unwrap();
    player.play().await.unwrap();
    fixture.wait_for_status(PlaybackStatus::Completed).await;
    player.seek_to(Timestamp::from_millis(8_000)).await.unwrap();
    assert_eq!(player.current_state().status(), Some(PlaybackStatus::Paused));

    // Resuming after the seek plays from the target
    player.resume().await.unwrap();
    fixture.wait_for_status(PlaybackStatus::Completed).await;
    let first = fixture.collector.frames()[0].timestamp;
    assert_eq!(first, Timestamp::from_millis(8_000));

    player.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pause_holds_frames_and_resume_loses_none() {
    let fixture = TestFixture::realtime(PlayerSettings::default());
    let player = &fixture.player;
    player
        .prepare("synthetic://clip?duration=1200000", 4, 2, &[])
        .await
        .unwrap();
    player.play().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    player.pause().await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    let held = fixture.collector.frames().len();
    let position = *player.playback_timestamp().borrow();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fixture.collector.frames().len(), held);
    assert_eq!(*player.playback_timestamp().borrow(), position);

    player.resume().await.unwrap();
    fixture.wait_for_status(PlaybackStatus::Completed).await;

    let frames = fixture.collector.frames();
    assert_eq!(frames.len(), 30);
    assert!(frames
        .iter()
        .enumerate()
        .all(|(index, frame)| frame.timestamp == Timestamp::from_micros(index as i64 * 40_000)));

    player.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_realtime_playback_is_paced() {
    let fixture = TestFixture::realtime(PlayerSettings::default());
    let player = &fixture.player;
    player
        .prepare("synthetic://clip?duration=800000&audio=0", 4, 2, &[])
        .await
        .unwrap();

    let started = Instant::now();
    player.play().await.unwrap();
    fixture.wait_for_status(PlaybackStatus::Completed).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(600), "finished after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5));
    assert_eq!(fixture.collector.frames().len(), 20);

    player.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_speed_change_reaches_sampler() {
    let fixture = TestFixture::realtime(PlayerSettings::default());
    let player = &fixture.player;
    player.prepare(TEN_SECONDS, 4, 2, &[]).await.unwrap();
    player.play().await.unwrap();

    let settings = PlayerSettings {
        volume: 0.3,
        is_muted: false,
        playback_speed_factor: 2.0,
    };
    player.change_settings(settings).await.unwrap();
    assert_eq!(*player.settings().borrow(), settings);

    let probe = fixture.backend.last_sampler().unwrap();
    assert_eq!(probe.playback_speed, 2.0);
    assert_eq!(probe.volume, 0.3);

    let invalid = PlayerSettings {
        playback_speed_factor: 0.25,
        ..settings
    };
    assert!(player.change_settings(invalid).await.is_err());
    assert_eq!(*player.settings().borrow(), settings);

    player.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_decode_failure_releases_player() {
    let fixture = TestFixture::new();
    let player = &fixture.player;
    let mut events = player.events();

    player
        .prepare("synthetic://clip?duration=2000000&fail_at=1000000", 4, 2, &[])
        .await
        .unwrap();
    player.play().await.unwrap();

    fixture
        .wait_for_state(|state| *state == PlayerState::Empty)
        .await;
    assert!(fixture.backend.last_sampler().unwrap().closed);

    let reason = tokio::time::timeout(TIMEOUT, async {
        loop {
            if let Ok(PlayerEvent::Error(reason)) = events.recv().await {
                return reason;
            }
        }
    })
    .await
    .unwrap();
    assert!(reason.contains("Decoder"), "{}", reason);

    // The player is usable again
    player
        .prepare("synthetic://clip?duration=200000", 4, 2, &[])
        .await
        .unwrap();
    player.release().await.unwrap();
}

/// Time a command takes to return
async fn timed<F: std::future::Future<Output = ccplayer_core::Result<()>>>(command: F) -> Duration {
    let started = Instant::now();
    command.await.unwrap();
    started.elapsed()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_commands_interrupt_realtime_playback_promptly() {
    let fixture = TestFixture::realtime(PlayerSettings::default());
    let player = &fixture.player;
    let prompt = Duration::from_millis(500);

    player
        .prepare("synthetic://clip?duration=6000000", 4, 2, &[])
        .await
        .unwrap();
    player.play().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let elapsed = timed(player.seek_to(Timestamp::from_millis(1_000))).await;
    assert!(elapsed < prompt, "seek took {:?}", elapsed);
    assert_eq!(player.current_state().status(), Some(PlaybackStatus::Playing));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let elapsed = timed(player.stop()).await;
    assert!(elapsed < prompt, "stop took {:?}", elapsed);
    assert_eq!(player.current_state().status(), Some(PlaybackStatus::Stopped));

    player.play().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let elapsed = timed(player.release()).await;
    assert!(elapsed < prompt, "release took {:?}", elapsed);
    assert_eq!(player.current_state(), PlayerState::Empty);
    assert!(fixture.backend.last_sampler().unwrap().closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_underrun_reports_waiting_until_refilled() {
    let backend = Arc::new(SlowDecoderBackend {
        inner: ccplayer_core::decoder::SyntheticBackend::with_realtime(false),
        delay: Duration::from_millis(20),
    });
    let player = MediaPlayer::with_backend(backend, PlayerSettings::default()).unwrap();
    let mut events = player.events();

    player
        .prepare("synthetic://clip?duration=400000", 4, 2, &[])
        .await
        .unwrap();
    assert_eq!(next_buffer_event(&mut events).await, BufferEvent::Waiting);
    assert_eq!(next_buffer_event(&mut events).await, BufferEvent::Complete);

    // Playback drains faster than the decoders refill
    player.play().await.unwrap();
    assert_eq!(next_buffer_event(&mut events).await, BufferEvent::Waiting);
    assert_eq!(next_buffer_event(&mut events).await, BufferEvent::Complete);

    let mut state = player.state();
    tokio::time::timeout(
        TIMEOUT,
        state.wait_for(|state| state.status() == Some(PlaybackStatus::Completed)),
    )
    .await
    .unwrap()
    .unwrap();

    player.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_renderer_failure_releases_player() {
    let fixture = TestFixture::new();
    let player = &fixture.player;
    player.attach(FailingRenderer {
        rendered: 0,
        fail_after: 3,
    });
    let mut events = player.events();

    player
        .prepare("synthetic://clip?duration=1000000", 4, 2, &[])
        .await
        .unwrap();
    player.play().await.unwrap();

    fixture
        .wait_for_state(|state| *state == PlayerState::Empty)
        .await;

    let reason = tokio::time::timeout(TIMEOUT, async {
        loop {
            if let Ok(PlayerEvent::Error(reason)) = events.recv().await {
                return reason;
            }
        }
    })
    .await
    .unwrap();
    assert!(reason.starts_with("Renderer error"), "{}", reason);
    assert!(reason.contains("Surface is closed"), "{}", reason);
}
