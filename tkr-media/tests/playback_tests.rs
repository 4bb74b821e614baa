//! Playback engine integration tests
//!
//! Engines are driven tick by tick through `PlaybackEngine::tick` so clock
//! behavior is deterministic; handle tests go through the service facade.

mod helpers;

use helpers::{service_with, virtual_service, JumpingBackend, SessionBuilder};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tkr_common::Chapter;
use tkr_common::events::{MediaEvent, PlaybackMode, PlaybackStatus};
use tkr_common::{AudioSegment, Session};
use tkr_media::config::MediaConfig;
use tkr_media::store::content_hash;
use tkr_media::{Error, MediaStrategy, MemoryAttachmentStore, ResourceKind};
use tokio::sync::broadcast;

const TICK: f64 = 0.25;

fn drain(rx: &mut broadcast::Receiver<MediaEvent>) -> Vec<MediaEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_optimized_file_never_concatenates_audio() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let session = SessionBuilder::new(&store, "optimized")
        .contiguous_audio(20, 10.0)
        .optimized_video(200.0)
        .build();
    let video_hash = session
        .video
        .as_ref()
        .and_then(|v| v.optimized_path.clone())
        .unwrap();
    let service = virtual_service(&store);

    let strategy = service.resolve_media_strategy(&session);
    assert_eq!(strategy, MediaStrategy::VideoWithOptimizedFile);

    let handle = service.open_playback(&session, strategy).await.unwrap();
    let state = handle.state().await;
    assert_eq!(state.mode, PlaybackMode::OptimizedSingleFile);
    assert_eq!(state.duration, 200.0);
    assert!(state.drift.is_none());

    assert_eq!(service.timelines_built(), 0);
    assert_eq!(store.load_log(), vec![video_hash]);
    assert_eq!(service.resource_counts(ResourceKind::SegmentBuffer).acquired, 0);

    handle.dispose().await;
}

#[tokio::test]
async fn test_legacy_drift_corrected_within_one_tick() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let session = SessionBuilder::new(&store, "legacy")
        .contiguous_audio(3, 10.0)
        .legacy_video(30.0)
        .build();
    let backend = Arc::new(JumpingBackend::new());
    let jump = backend.jump.clone();
    let service = service_with(&store, backend, MediaConfig::default());
    let threshold = service.config().playback.drift_threshold();
    let mut events = service.events().subscribe();

    let strategy = service.resolve_media_strategy(&session);
    assert_eq!(strategy, MediaStrategy::VideoLegacySync);
    let mut engine = service.create_engine(&session, strategy);
    engine.load().await.unwrap();
    engine.play().unwrap();

    for _ in 0..4 {
        engine.tick(TICK);
        assert!(engine.state().drift.unwrap() < threshold);
    }
    drain(&mut events);

    // Video clock jumps 2s ahead of the audio
    jump.schedule(2.0);
    engine.tick(TICK);

    let state = engine.state();
    assert_eq!(state.status, PlaybackStatus::Playing);
    assert!((state.current_time - 3.25).abs() < 1e-9);
    assert!(state.drift.unwrap() < threshold);

    let corrected: Vec<f64> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            MediaEvent::DriftCorrected { drift, .. } => Some(drift),
            _ => None,
        })
        .collect();
    assert_eq!(corrected.len(), 1);
    assert!((corrected[0] - 2.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_legacy_audio_ahead_of_video_is_pulled_back() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let session = SessionBuilder::new(&store, "legacy")
        .contiguous_audio(3, 10.0)
        .legacy_video(30.0)
        .build();
    let backend = Arc::new(JumpingBackend::new());
    let jump = backend.jump.clone();
    let service = service_with(&store, backend, MediaConfig::default());
    let threshold = service.config().playback.drift_threshold();
    let mut events = service.events().subscribe();

    let mut engine = service.create_engine(&session, MediaStrategy::VideoLegacySync);
    engine.load().await.unwrap();
    engine.play().unwrap();
    for _ in 0..12 {
        engine.tick(TICK);
    }
    drain(&mut events);

    // Video stalls 2s behind the audio
    jump.schedule(-2.0);
    engine.tick(TICK);

    let state = engine.state();
    assert_eq!(state.status, PlaybackStatus::Playing);
    assert!((state.current_time - 1.25).abs() < 1e-9);
    assert!(state.drift.unwrap() < threshold);

    let corrected: Vec<(f64, f64)> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            MediaEvent::DriftCorrected { drift, corrected_to, .. } => Some((drift, corrected_to)),
            _ => None,
        })
        .collect();
    assert_eq!(corrected.len(), 1);
    assert!((corrected[0].0 - 2.0).abs() < 1e-6);
    assert!((corrected[0].1 - 1.25).abs() < 1e-9);
}

#[tokio::test]
async fn test_late_audio_keeps_session_time_in_audio_only_mode() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let mut session = SessionBuilder::new(&store, "late")
        .contiguous_audio_from(10.0, 1, 10.0)
        .build();
    session.chapters = vec![Chapter::new("c1", 12.0, 20.0, "Second half")];
    let service = virtual_service(&store);

    let handle = service
        .open_playback(&session, MediaStrategy::AudioOnlyConcat)
        .await
        .unwrap();
    assert_eq!(handle.state().await.duration, 20.0);

    let chapter = handle.chapter_at(15.0).unwrap();
    handle.seek_to_chapter(&chapter).await.unwrap();
    let state = handle.state().await;
    assert_eq!(state.status, PlaybackStatus::Ready);
    assert!((state.current_time - 12.0).abs() < 1e-9);

    handle.dispose().await;
}

#[tokio::test]
async fn test_late_audio_plays_silence_then_follows_video() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let session = SessionBuilder::new(&store, "late-legacy")
        .contiguous_audio_from(10.0, 2, 10.0)
        .legacy_video(30.0)
        .build();
    let service = virtual_service(&store);
    let threshold = service.config().playback.drift_threshold();
    let mut events = service.events().subscribe();

    let mut engine = service.create_engine(&session, MediaStrategy::VideoLegacySync);
    engine.load().await.unwrap();
    engine.play().unwrap();

    // Leading silence tracks the video clock
    for _ in 0..8 {
        engine.tick(TICK);
    }
    assert!(engine.state().drift.unwrap() < 1e-9);

    // 25s into the session is 15s of audio in; the audio covers it
    engine.seek(25.0).unwrap();
    assert_eq!(engine.status(), PlaybackStatus::Playing);
    engine.tick(TICK);
    let state = engine.state();
    assert!((state.current_time - 25.25).abs() < 1e-9);
    assert!(state.drift.unwrap() < threshold);
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, MediaEvent::DriftCorrected { .. })));
}

#[tokio::test]
async fn test_open_dispose_cycles_release_everything() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let audio_only = SessionBuilder::new(&store, "audio").contiguous_audio(3, 10.0).build();
    let legacy = SessionBuilder::new(&store, "legacy")
        .contiguous_audio(2, 10.0)
        .legacy_video(20.0)
        .build();
    let service = virtual_service(&store);

    for cycle in 0..12 {
        let session = if cycle % 2 == 0 { &audio_only } else { &legacy };
        let strategy = service.resolve_media_strategy(session);
        let handle = service.open_playback(session, strategy).await.unwrap();
        handle.play().await.unwrap();
        handle.seek(5.0).await.unwrap();
        handle.dispose().await;
    }

    let buffers = service.resource_counts(ResourceKind::SegmentBuffer);
    let bindings = service.resource_counts(ResourceKind::MediaBinding);
    assert!(buffers.acquired >= 12 * 2);
    assert_eq!(bindings.acquired, 6);
    assert_eq!(buffers.acquired, buffers.released);
    assert_eq!(bindings.acquired, bindings.released);
    assert_eq!(service.resource_totals().outstanding(), 0);
}

#[tokio::test]
async fn test_dropped_handle_releases_resources() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let session = SessionBuilder::new(&store, "audio").contiguous_audio(2, 10.0).build();
    let service = virtual_service(&store);

    let handle = service
        .open_playback(&session, MediaStrategy::AudioOnlyConcat)
        .await
        .unwrap();
    drop(handle);

    // The ticker task owns the last engine reference and exits on cancel
    for _ in 0..20 {
        if service.resource_totals().outstanding() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(service.resource_totals().outstanding(), 0);
}

#[tokio::test]
async fn test_engine_state_machine_walkthrough() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let session = SessionBuilder::new(&store, "audio").contiguous_audio(2, 1.0).build();
    let service = virtual_service(&store);
    let mut events = service.events().subscribe();

    let mut engine = service.create_engine(&session, MediaStrategy::AudioOnlyConcat);
    assert_eq!(engine.status(), PlaybackStatus::Idle);
    assert!(matches!(engine.play(), Err(Error::InvalidState(_))));

    engine.load().await.unwrap();
    assert_eq!(engine.status(), PlaybackStatus::Ready);
    assert!(matches!(engine.pause(), Err(Error::InvalidState(_))));

    engine.play().unwrap();
    engine.tick(TICK);
    assert_eq!(engine.status(), PlaybackStatus::Playing);
    assert!((engine.state().current_time - TICK).abs() < 1e-9);

    engine.pause().unwrap();
    engine.tick(TICK);
    assert_eq!(engine.status(), PlaybackStatus::Paused);
    assert!((engine.state().current_time - TICK).abs() < 1e-9);

    // Seeking from paused settles back into paused
    engine.seek(1.5).unwrap();
    assert_eq!(engine.status(), PlaybackStatus::Paused);
    assert!((engine.state().current_time - 1.5).abs() < 1e-9);

    engine.play().unwrap();
    engine.tick(TICK);
    engine.tick(TICK);
    engine.tick(TICK);
    assert_eq!(engine.status(), PlaybackStatus::Ended);
    assert_eq!(engine.state().current_time, 2.0);
    assert!(!engine.state().is_playing);

    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|e| matches!(e, MediaEvent::PlaybackEnded { position, .. } if *position == 2.0)));
    assert!(events.iter().all(|e| e.playback_id() == engine.id()));

    // Seeking back from the end resumes paused
    engine.seek(0.5).unwrap();
    assert_eq!(engine.status(), PlaybackStatus::Paused);

    engine.dispose();
    assert_eq!(engine.status(), PlaybackStatus::Idle);
    assert!(matches!(engine.play(), Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_time_update_callbacks_run_every_tick() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let session = SessionBuilder::new(&store, "audio").contiguous_audio(1, 10.0).build();
    let service = virtual_service(&store);

    let mut engine = service.create_engine(&session, MediaStrategy::AudioOnlyConcat);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine.on_time_update(move |state| sink.lock().unwrap().push(state.current_time));

    engine.load().await.unwrap();
    engine.play().unwrap();
    for _ in 0..4 {
        engine.tick(0.5);
    }
    assert_eq!(*seen.lock().unwrap(), vec![0.5, 1.0, 1.5, 2.0]);
}

fn session_with_unstored_audio(payload: &[u8]) -> Session {
    let mut session = SessionBuilder::new(&Arc::new(MemoryAttachmentStore::new()), "missing").build();
    session.audio_segments.push(AudioSegment {
        id: "seg-0".into(),
        timestamp: session.start_time,
        duration: 5.0,
        hash: content_hash(payload),
        transcription: None,
    });
    session
}

#[tokio::test]
async fn test_load_failure_then_explicit_retry() {
    let payload = vec![42u8; 128];
    let session = session_with_unstored_audio(&payload);
    let store = Arc::new(MemoryAttachmentStore::new());
    let service = virtual_service(&store);
    let mut events = service.events().subscribe();

    let mut engine = service.create_engine(&session, MediaStrategy::AudioOnlyConcat);
    assert!(matches!(
        engine.load().await,
        Err(Error::MediaUnsupportedOrCorrupt(_))
    ));
    assert_eq!(engine.status(), PlaybackStatus::Error);
    assert!(engine.state().error.is_some());
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, MediaEvent::PlaybackError { .. })));

    // No automatic recovery
    engine.tick(TICK);
    assert_eq!(engine.status(), PlaybackStatus::Error);
    assert!(matches!(engine.play(), Err(Error::InvalidState(_))));

    store.insert(payload, "audio/webm");
    engine.retry_load().await.unwrap();
    assert_eq!(engine.status(), PlaybackStatus::Ready);
    assert!(engine.state().error.is_none());
    assert_eq!(engine.state().duration, 5.0);

    assert!(matches!(engine.retry_load().await, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_failed_segment_is_skipped_during_playback() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let session = SessionBuilder::new(&store, "audio").contiguous_audio(3, 1.0).build();
    store.corrupt(&session.audio_segments[1].hash);
    let service = virtual_service(&store);
    let mut events = service.events().subscribe();

    let mut engine = service.create_engine(&session, MediaStrategy::AudioOnlyConcat);
    engine.load().await.unwrap();
    engine.play().unwrap();
    engine.tick(1.5);

    // 1s of segment 0, segment 1 skipped, 0.5s into segment 2
    assert!((engine.state().current_time - 2.5).abs() < 1e-9);
    let skipped: Vec<usize> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            MediaEvent::SegmentSkipped { segment_index, .. } => Some(segment_index),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec![1]);
}

#[tokio::test]
async fn test_corrupt_optimized_file_puts_handle_in_error() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let session = SessionBuilder::new(&store, "corrupt").optimized_video(60.0).build();
    let hash = session
        .video
        .as_ref()
        .and_then(|v| v.optimized_path.clone())
        .unwrap();
    store.corrupt(&hash);
    let service = virtual_service(&store);

    let handle = service
        .open_playback(&session, MediaStrategy::VideoWithOptimizedFile)
        .await
        .unwrap();
    let state = handle.state().await;
    assert_eq!(state.status, PlaybackStatus::Error);
    assert!(state.error.unwrap().contains(hash.as_str()));
    assert!(matches!(handle.play().await, Err(Error::InvalidState(_))));

    handle.dispose().await;
    assert_eq!(service.resource_totals().outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_does_not_wait_for_retry_in_flight() {
    let payload = vec![42u8; 128];
    let session = session_with_unstored_audio(&payload);
    let store = Arc::new(MemoryAttachmentStore::with_latency(Duration::from_secs(5)));
    let service = virtual_service(&store);

    let handle = Arc::new(
        service
            .open_playback(&session, MediaStrategy::AudioOnlyConcat)
            .await
            .unwrap(),
    );
    assert_eq!(handle.state().await.status, PlaybackStatus::Error);

    store.insert(payload, "audio/webm");
    let retry = {
        let handle = Arc::clone(&handle);
        tokio::spawn(async move { handle.retry_load().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(handle.state().await.status, PlaybackStatus::Loading);

    let started = tokio::time::Instant::now();
    handle.dispose().await;
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(handle.state().await.status, PlaybackStatus::Idle);
    assert!(matches!(retry.await.unwrap(), Err(Error::InvalidState(_))));

    // The abandoned open still completes, and what it opened is released
    tokio::time::sleep(Duration::from_secs(10)).await;
    let buffers = service.resource_counts(ResourceKind::SegmentBuffer);
    assert_eq!(buffers.acquired, 1);
    assert_eq!(service.resource_totals().outstanding(), 0);
}
