use std::time::{Duration, Instant};

use tether::{
    config::ContinuityConfig,
    progress::ProgressReason,
    session::{SessionOp, SessionOptions},
    surface::{ErrorDetail, ErrorKind, QualityState, ReadyState, TimeRange},
    ContinuityEngine, Effect, Event, LoadToken, MediaInfo, PlaybackError, PlaybackItem,
    PlaybackStatus, Signal,
};

use crate::{
    support::{handle, manifest, source, MockSurface, SurfaceCommand},
    AssertWrapper,
};

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s)
}

fn direct_item() -> PlaybackItem {
    PlaybackItem::new("movie-1234", source())
}

fn session_item() -> PlaybackItem {
    direct_item()
        .with_transcode(SessionOptions {
            video_mode: Some("transcode".to_string()),
            video_codec: Some("h264".to_string()),
            ..Default::default()
        })
        .with_known_duration(7200.)
}

fn start(item: PlaybackItem, now: Instant) -> (ContinuityEngine, MockSurface, Vec<Effect>) {
    let mut surface = MockSurface::new();
    let (engine, effects) = ContinuityEngine::play(
        item,
        ContinuityConfig::default(),
        LoadToken::default(),
        &mut surface,
        now,
    );
    (engine, surface, effects)
}

/// Session item resumed at 90s, surface at local 10s (absolute 100s).
fn playing_session(now: Instant) -> (ContinuityEngine, MockSurface) {
    let (mut engine, mut surface, _) = start(session_item().resume_at(90.), now);
    engine.handle(&mut surface, now, Event::SessionSettled(Ok(handle("s1"))));
    surface.time = 10.;
    surface.duration = Some(600.);
    surface.buffered = vec![TimeRange::new(0., 25.)];
    surface.commands.clear();
    (engine, surface)
}

fn session_ops(effects: &[Effect]) -> Vec<&SessionOp> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Session(op) => Some(op),
            _ => None,
        })
        .collect()
}

fn signal(
    engine: &mut ContinuityEngine,
    surface: &mut MockSurface,
    at: Instant,
    signal: Signal,
) -> Vec<Effect> {
    let token = surface.token();
    engine.handle(surface, at, Event::Signal(token, signal))
}

#[test]
fn direct_item_attaches_source_immediately() {
    let now = Instant::now();
    let (engine, surface, effects) = start(direct_item(), now);

    assert_eq!(surface.attached(), vec![source()]);
    assert!(surface.did(&SurfaceCommand::Play));
    assert!(session_ops(&effects).is_empty());
    assert!(effects.contains(&Effect::Probe { source: source() }));
    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::SaveProgress(report) if report.reason == ProgressReason::Start
    )));
    assert_eq!(engine.status(), PlaybackStatus::Loading);
    assert!(engine.token() > LoadToken::default());
}

#[test]
fn session_item_starts_at_resume_point() {
    let now = Instant::now();
    let (mut engine, mut surface, effects) = start(session_item().resume_at(90.4), now);

    let ops = session_ops(&effects);
    let SessionOp::Start { options, .. } = ops.first().copied().assert_success() else {
        panic!("expected a session start");
    };
    assert_eq!(options.seek_offset, 90);
    assert_eq!(options.video_codec.as_deref(), Some("h264"));
    assert!(surface.attached().is_empty());
    assert_eq!(engine.position(&surface), 90.4);

    engine.handle(&mut surface, now, Event::SessionSettled(Ok(handle("s1"))));
    assert_eq!(surface.attached(), vec![manifest("s1")]);
    assert_eq!(engine.timeline().base_offset(), 90.);
    assert_eq!(engine.session().session_id(), Some("s1"));
    assert_eq!(engine.position(&surface), 90.);
}

#[test]
fn failed_session_start_plays_source_and_restores_position() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(session_item().resume_at(300.), now);

    engine.handle(
        &mut surface,
        now,
        Event::SessionSettled(Err("502 Bad Gateway".to_string())),
    );
    assert_eq!(surface.attached(), vec![source()]);
    assert!(!engine.session().is_active());

    surface.duration = Some(7200.);
    signal(&mut engine, &mut surface, now, Signal::MetadataLoaded);
    assert_eq!(surface.seeks(), vec![300.]);
    assert_eq!(engine.position(&surface), 300.);
}

#[test]
fn buffered_seek_stays_local() {
    let now = Instant::now();
    let (mut engine, mut surface) = playing_session(now);
    assert_eq!(engine.position(&surface), 100.);

    let effects = engine.handle(&mut surface, now + secs(10.), Event::Seek(110.));

    assert!(session_ops(&effects).is_empty());
    assert_eq!(surface.seeks(), vec![20.]);
    assert_eq!(engine.timeline().base_offset(), 90.);
    assert_eq!(engine.position(&surface), 110.);
}

#[test]
fn distant_seek_restarts_session_at_target() {
    let now = Instant::now();
    let (mut engine, mut surface) = playing_session(now);

    let effects = engine.handle(&mut surface, now + secs(10.), Event::Seek(500.));
    let ops = session_ops(&effects);
    assert_eq!(ops.len(), 1);
    let SessionOp::Restart {
        previous, options, ..
    } = ops[0]
    else {
        panic!("expected a session restart");
    };
    assert_eq!(previous, "s1");
    assert_eq!(options.seek_offset, 500);
    assert_eq!(options.video_mode.as_deref(), Some("transcode"));
    assert_eq!(engine.position(&surface), 500.);

    // first in flight wins, even for targets inside the old manifest
    let dropped = engine.handle(&mut surface, now + secs(10.5), Event::Seek(900.));
    assert!(session_ops(&dropped).is_empty());
    let dropped = engine.handle(&mut surface, now + secs(10.6), Event::Seek(105.));
    assert!(session_ops(&dropped).is_empty());
    assert!(surface.seeks().is_empty());
    assert_eq!(engine.position(&surface), 500.);

    engine.handle(
        &mut surface,
        now + secs(11.),
        Event::SessionSettled(Ok(handle("s2"))),
    );
    assert_eq!(engine.timeline().base_offset(), 500.);
    assert_eq!(surface.time, 0.);
    assert_eq!(surface.attached(), vec![manifest("s2")]);
    assert_eq!(engine.position(&surface), 500.);
}

#[test]
fn seek_is_clamped_to_known_duration() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item().with_known_duration(1000.), now);
    surface.duration = Some(1000.);

    engine.handle(&mut surface, now, Event::Seek(5000.));
    assert_eq!(surface.seeks(), vec![1000.]);
    assert!(engine.position(&surface) <= engine.duration(&surface));

    engine.handle(&mut surface, now, Event::Seek(-20.));
    assert_eq!(engine.position(&surface), 0.);
}

#[test]
fn skip_moves_relative_to_position() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);
    surface.duration = Some(3600.);
    surface.time = 120.;

    engine.handle(&mut surface, now, Event::Skip(-10.));
    assert_eq!(surface.seeks(), vec![110.]);
    engine.handle(&mut surface, now, Event::Skip(30.));
    assert_eq!(surface.seeks(), vec![110., 140.]);
}

#[test]
fn repeated_stalls_nudge_past_buffer_seam() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);
    surface.quality = QualityState {
        auto: true,
        current: Some(2),
    };

    for i in 0..3 {
        surface.time = 50.;
        surface.buffered = vec![TimeRange::new(0., 50.9)];
        surface.commands.clear();
        signal(
            &mut engine,
            &mut surface,
            now + secs(1.1 * i as f64),
            Signal::BufferStall,
        );
    }

    assert_eq!(engine.consecutive_stalls(), 3);
    assert_eq!(engine.status(), PlaybackStatus::Buffering);
    let seeks = surface.seeks();
    assert_eq!(seeks.len(), 1);
    assert!((seeks[0] - 50.35).abs() < 1e-9);
    assert!(surface.did(&SurfaceCommand::ForceLevel(1)));
    assert!(surface.did(&SurfaceCommand::RecoverMedia));
    assert!(surface.did(&SurfaceCommand::ReloadFrom(49.)));
}

#[test]
fn stall_signals_inside_cooldown_are_ignored() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);

    signal(&mut engine, &mut surface, now, Signal::BufferStall);
    signal(&mut engine, &mut surface, now + secs(0.5), Signal::BufferStall);
    assert_eq!(engine.consecutive_stalls(), 1);
}

#[test]
fn waiting_is_debounced_until_tick() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);

    signal(&mut engine, &mut surface, now, Signal::Waiting);
    assert_eq!(engine.status(), PlaybackStatus::Buffering);
    assert_eq!(engine.consecutive_stalls(), 0);
    assert!(engine.next_deadline().is_some());

    engine.handle(&mut surface, now + secs(0.6), Event::Tick);
    assert_eq!(engine.consecutive_stalls(), 1);

    // movement cancels the next pending stall and decays the count
    signal(&mut engine, &mut surface, now + secs(5.), Signal::Waiting);
    surface.time = 0.5;
    signal(&mut engine, &mut surface, now + secs(5.2), Signal::TimeUpdate);
    assert_eq!(engine.status(), PlaybackStatus::Playing);
    assert_eq!(engine.next_deadline(), None);
    engine.handle(&mut surface, now + secs(6.), Event::Tick);
    assert_eq!(engine.consecutive_stalls(), 0);
}

#[test]
fn frozen_playhead_is_detected_by_health_tick() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);
    surface.time = 0.;

    engine.handle(&mut surface, now + secs(1.), Event::Tick);
    engine.handle(&mut surface, now + secs(2.), Event::Tick);
    assert_eq!(engine.consecutive_stalls(), 0);

    engine.handle(&mut surface, now + secs(3.6), Event::Tick);
    assert_eq!(engine.consecutive_stalls(), 1);
    assert!(surface.did(&SurfaceCommand::ReloadFrom(0.)));
}

#[test]
fn fifth_stall_with_session_restarts_it() {
    let now = Instant::now();
    let (mut engine, mut surface) = playing_session(now);
    surface.buffered.clear();

    let effects = (0..5)
        .map(|i| {
            signal(
                &mut engine,
                &mut surface,
                now + secs(1.1 * i as f64),
                Signal::BufferStall,
            )
        })
        .last()
        .assert_success();

    let ops = session_ops(&effects);
    let SessionOp::Restart {
        previous, options, ..
    } = ops.first().copied().assert_success()
    else {
        panic!("expected a session restart");
    };
    assert_eq!(previous, "s1");
    assert_eq!(options.seek_offset, 100);
}

#[test]
fn frozen_playhead_waits_for_its_session_restart() {
    let now = Instant::now();
    let (mut engine, mut surface) = playing_session(now);
    surface.buffered.clear();

    // the new session never settles
    let mut all = Vec::new();
    for i in 1..=30 {
        all.extend(engine.handle(&mut surface, now + secs(i as f64), Event::Tick));
    }

    assert_ne!(engine.status(), PlaybackStatus::Failed);
    assert!(!all.contains(&Effect::Status(PlaybackStatus::Failed)));
    let restarts = session_ops(&all)
        .into_iter()
        .filter(|op| matches!(op, SessionOp::Restart { .. }))
        .count();
    assert_eq!(restarts, 1);
    assert!(engine.session().in_flight().is_some());
}

#[test]
fn not_ready_surface_stalls_outside_seek_window() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);
    surface.duration = Some(600.);

    surface.time = 1.;
    engine.handle(&mut surface, now + secs(2.), Event::Tick);
    engine.handle(&mut surface, now + secs(2.5), Event::Seek(1.));
    surface.ready = ReadyState::Metadata;

    engine.handle(&mut surface, now + secs(3.5), Event::Tick);
    assert_eq!(engine.consecutive_stalls(), 0);

    // window over, playhead not yet considered frozen
    engine.handle(&mut surface, now + secs(5.8), Event::Tick);
    assert_eq!(engine.consecutive_stalls(), 1);
    assert_eq!(engine.status(), PlaybackStatus::Buffering);
}

#[test]
fn exhausted_ladder_fails_playback() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);

    let mut all = Vec::new();
    for i in 0..12 {
        all.extend(signal(
            &mut engine,
            &mut surface,
            now + secs(1.1 * i as f64),
            Signal::BufferStall,
        ));
    }

    assert_eq!(engine.status(), PlaybackStatus::Failed);
    assert!(all.contains(&Effect::Status(PlaybackStatus::Failed)));
    // three reinitialisations were tried before giving up
    assert_eq!(surface.attached().len(), 4);
}

#[test]
fn unexpected_forward_jump_is_reverted() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);

    surface.time = 20.;
    signal(&mut engine, &mut surface, now + secs(5.), Signal::TimeUpdate);
    assert!(surface.seeks().is_empty());

    surface.time = 100.;
    signal(&mut engine, &mut surface, now + secs(6.), Signal::TimeUpdate);
    assert_eq!(surface.seeks(), vec![21.5]);
    assert_eq!(engine.position(&surface), 21.5);
}

#[test]
fn intentional_seek_is_never_reverted() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);
    surface.duration = Some(3600.);

    surface.time = 20.;
    signal(&mut engine, &mut surface, now + secs(5.), Signal::TimeUpdate);
    engine.handle(&mut surface, now + secs(6.), Event::Seek(2000.));
    signal(&mut engine, &mut surface, now + secs(6.1), Signal::Seeking);
    signal(&mut engine, &mut surface, now + secs(6.5), Signal::Seeked);
    signal(&mut engine, &mut surface, now + secs(7.), Signal::TimeUpdate);

    assert_eq!(surface.seeks(), vec![2000.]);
    assert_eq!(engine.position(&surface), 2000.);
}

#[test]
fn unannounced_seek_is_reverted() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);
    surface.duration = Some(3600.);

    surface.time = 20.;
    signal(&mut engine, &mut surface, now + secs(5.), Signal::TimeUpdate);
    signal(&mut engine, &mut surface, now + secs(6.), Signal::Seeking);
    surface.time = 900.;
    signal(&mut engine, &mut surface, now + secs(6.2), Signal::Seeked);

    assert_eq!(surface.seeks(), vec![21.]);
}

#[test]
fn rate_drift_is_forced_back() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);

    surface.rate = 1.5;
    signal(&mut engine, &mut surface, now, Signal::RateChange);
    assert_eq!(surface.rate, 1.);

    surface.rate = 2.;
    signal(&mut engine, &mut surface, now + secs(0.1), Signal::RateChange);
    assert_eq!(surface.rate, 2.);
    // metadata forces the correction through the debounce
    signal(&mut engine, &mut surface, now + secs(0.2), Signal::MetadataLoaded);
    assert_eq!(surface.rate, 1.);
}

#[test]
fn stale_manifest_error_restarts_immediately() {
    let now = Instant::now();
    let (mut engine, mut surface) = playing_session(now);

    let error = PlaybackError::new(ErrorKind::Network, ErrorDetail::ManifestLoad)
        .with_status(200)
        .with_url(manifest("s0"));
    let effects = signal(&mut engine, &mut surface, now, Signal::Error(error));

    assert!(matches!(
        session_ops(&effects).as_slice(),
        [SessionOp::Restart { previous, .. }] if previous == "s1"
    ));
    assert_eq!(engine.status(), PlaybackStatus::Buffering);
}

#[test]
fn restarts_are_not_stacked() {
    let now = Instant::now();
    let (mut engine, mut surface) = playing_session(now);
    let error = PlaybackError::new(ErrorKind::Network, ErrorDetail::LevelLoad).with_status(404);

    let first = signal(&mut engine, &mut surface, now, Signal::Error(error.clone()));
    let second = signal(&mut engine, &mut surface, now + secs(3.), Signal::Error(error));
    assert_eq!(session_ops(&first).len(), 1);
    assert!(session_ops(&second).is_empty());
}

#[test]
fn signals_from_superseded_load_are_ignored() {
    let now = Instant::now();
    let (mut engine, mut surface) = playing_session(now);
    let old = surface.token();

    engine.handle(&mut surface, now, Event::Seek(3000.));
    engine.handle(&mut surface, now, Event::SessionSettled(Ok(handle("s2"))));
    assert_ne!(surface.token(), old);

    let error = PlaybackError::new(ErrorKind::Network, ErrorDetail::ManifestLoad);
    let effects = engine.handle(
        &mut surface,
        now + secs(5.),
        Event::Signal(old, Signal::Error(error)),
    );
    assert!(effects.is_empty());
    assert_eq!(engine.session().session_id(), Some("s2"));
}

#[test]
fn direct_network_error_without_proxy_fails() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);

    let error = PlaybackError::new(ErrorKind::Network, ErrorDetail::FragmentLoad).with_status(403);
    signal(&mut engine, &mut surface, now, Signal::Error(error));
    assert_eq!(engine.status(), PlaybackStatus::Failed);
}

#[test]
fn direct_network_error_retries_through_proxy() {
    let now = Instant::now();
    let mut config = ContinuityConfig::default();
    config.session.proxy_template = Some("http://proxy.example/p?u={url}".to_string());
    let mut surface = MockSurface::new();
    let (mut engine, _) =
        ContinuityEngine::play(direct_item(), config, LoadToken::default(), &mut surface, now);
    surface.time = 42.;

    let error = PlaybackError::new(ErrorKind::Network, ErrorDetail::FragmentLoad);
    signal(&mut engine, &mut surface, now, Signal::Error(error));

    let attached = surface.attached();
    assert_eq!(attached.len(), 2);
    assert_eq!(attached[1].host_str(), Some("proxy.example"));
    assert_eq!(engine.position(&surface), 0.);

    surface.duration = Some(600.);
    signal(&mut engine, &mut surface, now, Signal::MetadataLoaded);
    assert_eq!(surface.seeks(), vec![42.]);
}

#[test]
fn non_fatal_errors_are_tolerated() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);

    let error = PlaybackError::new(ErrorKind::Network, ErrorDetail::FragmentLoad).non_fatal();
    let effects = signal(&mut engine, &mut surface, now, Signal::Error(error));
    assert!(effects.is_empty());
    assert_eq!(engine.status(), PlaybackStatus::Loading);

    let stall = PlaybackError::new(ErrorKind::Media, ErrorDetail::BufferStall).non_fatal();
    signal(&mut engine, &mut surface, now + secs(1.), Signal::Error(stall));
    assert_eq!(engine.consecutive_stalls(), 1);
    assert_eq!(engine.status(), PlaybackStatus::Buffering);
}

#[test]
fn healthy_playback_is_monotonic() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);
    signal(&mut engine, &mut surface, now, Signal::Playing);

    let mut last = engine.position(&surface);
    for step in 1..=30 {
        surface.time = step as f64 * 0.25;
        signal(
            &mut engine,
            &mut surface,
            now + secs(step as f64 * 0.25),
            Signal::TimeUpdate,
        );
        let position = engine.position(&surface);
        assert!(position >= last);
        last = position;
    }
    assert!(surface.seeks().is_empty());
}

#[test]
fn probe_seeds_known_duration() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);
    assert_eq!(engine.duration(&surface), 0.);

    engine.handle(
        &mut surface,
        now,
        Event::ProbeSettled(Ok(MediaInfo {
            duration_seconds: Some(5400.),
            ..Default::default()
        })),
    );
    assert_eq!(engine.duration(&surface), 5400.);

    // refreshed periodically while playing
    let effects = engine.handle(&mut surface, now + secs(61.), Event::Tick);
    assert!(effects.contains(&Effect::Probe { source: source() }));
}

#[test]
fn progress_is_throttled_but_pause_is_forced() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);
    signal(&mut engine, &mut surface, now, Signal::Playing);

    let reports = |effects: &[Effect]| {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::SaveProgress(report) => Some(report.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
    };

    surface.time = 1.;
    let effects = signal(&mut engine, &mut surface, now + secs(1.), Signal::TimeUpdate);
    assert!(reports(&effects).is_empty());

    surface.time = 5.5;
    let effects = signal(&mut engine, &mut surface, now + secs(5.5), Signal::TimeUpdate);
    assert_eq!(reports(&effects).len(), 1);

    surface.paused = true;
    let effects = signal(&mut engine, &mut surface, now + secs(5.6), Signal::Paused);
    let paused = reports(&effects);
    assert_eq!(paused.len(), 1);
    assert_eq!(paused[0].reason, ProgressReason::Pause);
    assert_eq!(paused[0].absolute_position_seconds, 5.5);
    assert_eq!(engine.status(), PlaybackStatus::Paused);
}

#[test]
fn ended_item_counts_down_to_next() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item().followed_by("episode-2"), now);

    let effects = signal(&mut engine, &mut surface, now, Signal::Ended);
    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::SaveProgress(report) if report.completed
    )));
    assert_eq!(engine.next_deadline(), Some(now + secs(10.)));

    assert!(engine.handle(&mut surface, now + secs(5.), Event::Tick).is_empty());
    let effects = engine.handle(&mut surface, now + secs(10.), Event::Tick);
    assert!(effects.contains(&Effect::AdvanceToNext {
        item_id: "episode-2".to_string()
    }));
}

#[test]
fn toggle_play_pauses_and_resumes() {
    let now = Instant::now();
    let (mut engine, mut surface, _) = start(direct_item(), now);
    assert!(!surface.paused);

    engine.handle(&mut surface, now, Event::TogglePlay);
    assert!(surface.paused);
    engine.handle(&mut surface, now, Event::TogglePlay);
    assert!(!surface.paused);
}

#[test]
fn stop_tears_down_session_and_reports() {
    let now = Instant::now();
    let (engine, mut surface) = playing_session(now);
    let token = engine.token();

    let teardown = engine.stop(&mut surface, now + secs(1.));
    assert!(teardown.token > token);
    assert!(surface.did(&SurfaceCommand::Detach));
    assert!(teardown.effects.contains(&Effect::Session(SessionOp::Stop {
        session_id: "s1".to_string()
    })));
    assert!(teardown.effects.iter().any(|e| matches!(
        e,
        Effect::SaveProgress(report) if report.reason == ProgressReason::Stop
    )));
}
