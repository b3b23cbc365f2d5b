//! Command validation and lifecycle tests against the public player API

mod common;

use ccplayer_core::decoder::{SyntheticBackend, Timestamp};
use ccplayer_core::player::{MediaPlayer, PlaybackStatus, PlayerSettings, PlayerState};
use ccplayer_core::CCPlayerError;
use common::{SlowProbeBackend, TestFixture};
use std::sync::Arc;
use std::time::Duration;

const CLIP: &str = "synthetic://clip?duration=2000000";

#[tokio::test]
async fn test_play_while_empty_is_rejected() {
    let fixture = TestFixture::new();
    let player = &fixture.player;

    for result in [
        player.play().await,
        player.pause().await,
        player.resume().await,
        player.stop().await,
        player.seek_to(Timestamp::from_millis(100)).await,
    ] {
        assert!(matches!(result, Err(CCPlayerError::InvalidTransition { .. })));
    }
    assert_eq!(player.current_state(), PlayerState::Empty);

    // Release is always fine
    player.release().await.unwrap();
    player.release().await.unwrap();
}

#[tokio::test]
async fn test_prepare_twice_is_rejected() {
    let fixture = TestFixture::new();
    let player = &fixture.player;

    player.prepare(CLIP, 4, 2, &[]).await.unwrap();
    let state = player.current_state();
    assert_eq!(state.status(), Some(PlaybackStatus::Stopped));
    assert_eq!(state.media().unwrap().duration, Timestamp::from_micros(2_000_000));

    let second = player.prepare(CLIP, 4, 2, &[]).await;
    assert!(matches!(second, Err(CCPlayerError::InvalidTransition { .. })));
    assert_eq!(player.current_state(), state);

    player.release().await.unwrap();
    assert_eq!(player.current_state(), PlayerState::Empty);

    // Preparing again after a release works
    player.prepare(CLIP, 4, 2, &[]).await.unwrap();
    player.release().await.unwrap();
}

#[tokio::test]
async fn test_release_while_preparing_yields_empty() {
    let backend = Arc::new(SlowProbeBackend {
        inner: SyntheticBackend::with_realtime(false),
        delay: Duration::from_millis(300),
    });
    let player = Arc::new(MediaPlayer::with_backend(backend, PlayerSettings::default()).unwrap());

    let preparing = {
        let player = Arc::clone(&player);
        tokio::spawn(async move { player.prepare(CLIP, 4, 2, &[]).await })
    };

    let mut state = player.state();
    tokio::time::timeout(
        common::TIMEOUT,
        state.wait_for(|state| *state == PlayerState::Preparing),
    )
    .await
    .unwrap()
    .unwrap();

    // Other commands are turned away while preparing
    assert!(matches!(
        player.play().await,
        Err(CCPlayerError::InvalidTransition { .. })
    ));

    player.release().await.unwrap();
    assert_eq!(player.current_state(), PlayerState::Empty);

    let prepared = preparing.await.unwrap();
    assert!(matches!(prepared, Err(CCPlayerError::Cancelled)));
    assert_eq!(player.current_state(), PlayerState::Empty);
}

#[tokio::test]
async fn test_pause_resume_transitions() {
    let fixture = TestFixture::realtime(PlayerSettings::default());
    let player = &fixture.player;
    player.prepare(CLIP, 4, 2, &[]).await.unwrap();

    assert!(matches!(
        player.pause().await,
        Err(CCPlayerError::InvalidTransition { .. })
    ));
    assert!(player.resume().await.is_err());

    player.play().await.unwrap();
    assert_eq!(player.current_state().status(), Some(PlaybackStatus::Playing));
    assert!(player.resume().await.is_err());
    // Playing again is a no-op
    player.play().await.unwrap();

    player.pause().await.unwrap();
    assert_eq!(player.current_state().status(), Some(PlaybackStatus::Paused));
    assert!(!fixture.backend.last_sampler().unwrap().started);
    // Pausing again is a no-op
    player.pause().await.unwrap();

    player.resume().await.unwrap();
    assert_eq!(player.current_state().status(), Some(PlaybackStatus::Playing));
    assert!(fixture.backend.last_sampler().unwrap().started);

    player.stop().await.unwrap();
    assert_eq!(player.current_state().status(), Some(PlaybackStatus::Stopped));
    // Stopping again is a no-op
    player.stop().await.unwrap();

    player.release().await.unwrap();
}

#[tokio::test]
async fn test_stop_rewinds() {
    let fixture = TestFixture::realtime(PlayerSettings::default());
    let player = &fixture.player;
    player.prepare(CLIP, 4, 2, &[]).await.unwrap();
    player.play().await.unwrap();

    let mut position = player.playback_timestamp();
    tokio::time::timeout(
        common::TIMEOUT,
        position.wait_for(|timestamp| *timestamp > Timestamp::from_millis(200)),
    )
    .await
    .unwrap()
    .unwrap();

    player.stop().await.unwrap();
    assert_eq!(*player.playback_timestamp().borrow(), Timestamp::ZERO);
    let probe = fixture.backend.last_sampler().unwrap();
    assert!(!probe.started);
    assert!(probe.flushes >= 1);

    // The next play starts over from the beginning
    player.play().await.unwrap();
    fixture.wait_for_status(PlaybackStatus::Completed).await;
    let frames = fixture.collector.frames();
    assert_eq!(frames.first().unwrap().timestamp, Timestamp::ZERO);
    assert_eq!(frames.len(), 50);

    player.release().await.unwrap();
}

#[tokio::test]
async fn test_still_image_does_not_play() {
    let fixture = TestFixture::new();
    let player = &fixture.player;
    player
        .prepare("synthetic://still?duration=0&audio=0", 4, 2, &[])
        .await
        .unwrap();

    let media = player.current_state().media().cloned().unwrap();
    assert!(!media.is_continuous());

    player.play().await.unwrap();
    player.pause().await.unwrap();
    player.resume().await.unwrap();
    assert_eq!(player.current_state().status(), Some(PlaybackStatus::Stopped));

    player.release().await.unwrap();
}

#[tokio::test]
async fn test_construction_failures_leave_player_empty() {
    let fixture = TestFixture::new();
    let player = &fixture.player;

    for location in [
        "synthetic://clip?fail=probe",
        "synthetic://clip?fail=audio",
        "synthetic://clip?fail=video",
        "synthetic://clip?rate=0",
    ] {
        assert!(player.prepare(location, 4, 2, &[]).await.is_err(), "{}", location);
        assert_eq!(player.current_state(), PlayerState::Empty);
    }

    assert!(matches!(
        player.prepare(CLIP, 0, 2, &[]).await,
        Err(CCPlayerError::InvalidArgument(_))
    ));
    assert_eq!(player.current_state(), PlayerState::Empty);

    // A good prepare still works afterwards
    player.prepare(CLIP, 4, 2, &[]).await.unwrap();
    player.release().await.unwrap();
}
