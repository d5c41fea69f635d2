//! The continuity engine: one value per playback item.
//!
//! ```text
//!  intents ─┐                      ┌─► Timeline   (local or remote seek)
//!  signals ─┼─► handle(event) ─────┼─► MotionGuard (veto impossible motion)
//!  ticks   ─┤                      ├─► StallDetector + ladder
//!  results ─┘                      └─► SessionManager
//!                     │
//!                     └─► Vec<Effect>  (network work, progress, status)
//! ```
//!
//! The engine is synchronous. Anything that needs the network is returned as
//! an [`Effect`]; its result comes back later as an [`Event`].

use std::time::Instant;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    api::MediaInfo,
    config::ContinuityConfig,
    guard::{MotionGuard, Verdict},
    progress::{ProgressReason, ProgressReport, ProgressThrottle},
    session::{
        FatalAction, RestartReason, SessionHandle, SessionManager, SessionOp, SessionOptions,
        SessionOutcome, SessionPurpose,
    },
    stall::{ladder, LadderInput, Reinit, StallDetector, StallPhase, StallReason},
    surface::{buffered_ahead, ErrorDetail, LoadToken, PlaybackError, Signal, Surface},
    timeline::{SeekPlan, SurfaceView, Timeline},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackItem {
    pub id: String,
    pub source: Url,
    /// Play through a remote transcode session with these options.
    #[serde(default)]
    pub transcode: Option<SessionOptions>,
    /// Absolute position to resume from.
    #[serde(default)]
    pub resume_at: Option<f64>,
    /// Duration learned elsewhere, e.g. from the catalog.
    #[serde(default)]
    pub known_duration: Option<f64>,
    /// Item to advance to once this one ends.
    #[serde(default)]
    pub next: Option<String>,
}

impl PlaybackItem {
    pub fn new(id: impl Into<String>, source: Url) -> Self {
        Self {
            id: id.into(),
            source,
            transcode: None,
            resume_at: None,
            known_duration: None,
            next: None,
        }
    }

    pub fn with_transcode(mut self, options: SessionOptions) -> Self {
        self.transcode = Some(options);
        self
    }

    pub fn resume_at(mut self, position: f64) -> Self {
        self.resume_at = Some(position);
        self
    }

    pub fn with_known_duration(mut self, duration: f64) -> Self {
        self.known_duration = Some(duration);
        self
    }

    pub fn followed_by(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Idle,
    Loading,
    Playing,
    Paused,
    Buffering,
    Ended,
    /// Recovery gave up. The only state worth showing to the user.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Signal from the surface, captured under `token`.
    Signal(LoadToken, Signal),
    /// Health monitor and timer deadlines.
    Tick,
    Seek(f64),
    Skip(f64),
    TogglePlay,
    SessionSettled(Result<SessionHandle, String>),
    ProbeSettled(Result<MediaInfo, String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Session(SessionOp),
    Probe { source: Url },
    SaveProgress(ProgressReport),
    Status(PlaybackStatus),
    /// The next-item countdown expired.
    AdvanceToNext { item_id: String },
}

/// What is left of an engine after [`ContinuityEngine::stop`].
#[derive(Debug)]
pub struct Teardown {
    /// Last token the engine issued; nothing captured under it is live anymore.
    pub token: LoadToken,
    pub effects: Vec<Effect>,
}

#[derive(Debug)]
pub struct ContinuityEngine {
    config: ContinuityConfig,
    item_id: String,
    next_item: Option<String>,

    token: LoadToken,
    attached: bool,
    timeline: Timeline,
    guard: MotionGuard,
    stall: StallDetector,
    session: SessionManager,
    progress: ProgressThrottle,
    status: PlaybackStatus,

    /// Absolute position to restore once the attached manifest has metadata.
    resume_at: Option<f64>,
    /// Target of the remote reseek in flight.
    pending_seek: Option<f64>,
    wants_play: bool,

    probe_in_flight: bool,
    last_probe_at: Option<Instant>,
    countdown: Option<Instant>,
}

impl ContinuityEngine {
    /// Starts playing `item`. `token` is the last token issued by whoever
    /// drove the previous item.
    pub fn play<S>(
        item: PlaybackItem,
        config: ContinuityConfig,
        token: LoadToken,
        surface: &mut S,
        now: Instant,
    ) -> (Self, Vec<Effect>)
    where
        S: Surface + ?Sized,
    {
        let resume_at = item.resume_at.filter(|p| p.is_finite() && *p > 0.);
        let transcode = item.transcode.map(|options| match resume_at {
            Some(position) => options.with_seek_offset(position.floor() as u64),
            None => options,
        });

        let mut engine = Self {
            item_id: item.id,
            next_item: item.next,
            token,
            attached: false,
            timeline: Timeline::new(item.known_duration),
            guard: MotionGuard::new(config.guard.clone()),
            stall: StallDetector::new(config.stall.clone(), now, 0.),
            session: SessionManager::new(config.session.clone(), item.source.clone(), transcode),
            progress: ProgressThrottle::new(config.progress.clone()),
            status: PlaybackStatus::Idle,
            resume_at,
            pending_seek: None,
            wants_play: true,
            probe_in_flight: false,
            last_probe_at: None,
            countdown: None,
            config,
        };

        tracing::info!(item = %engine.item_id, source = %item.source, "Starting playback");

        let mut effects = Vec::new();
        engine.set_status(PlaybackStatus::Loading, &mut effects);
        match engine.session.begin() {
            Some(op) => effects.push(Effect::Session(op)),
            None => engine.attach(surface, item.source.clone(), now),
        }
        engine.request_probe(now, &mut effects);
        engine.report(now, surface, ProgressReason::Start, &mut effects);

        (engine, effects)
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn token(&self) -> LoadToken {
        self.token
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn guard(&self) -> &MotionGuard {
        &self.guard
    }

    pub fn stall_phase(&self) -> StallPhase {
        self.stall.phase()
    }

    pub fn consecutive_stalls(&self) -> u8 {
        self.stall.consecutive_stalls()
    }

    /// Absolute position for progress bars.
    pub fn position<S>(&self, surface: &S) -> f64
    where
        S: Surface + ?Sized,
    {
        if let Some(target) = self.pending_seek {
            return target;
        }
        if !self.attached {
            return self
                .resume_at
                .unwrap_or_else(|| self.timeline.base_offset());
        }
        self.timeline.absolute_time(surface.current_time())
    }

    /// Seekable duration, zero if unknown.
    pub fn duration<S>(&self, surface: &S) -> f64
    where
        S: Surface + ?Sized,
    {
        let local = if self.attached {
            SurfaceView::capture(surface).local_duration
        } else {
            None
        };
        self.timeline.seekable_duration(local)
    }

    /// Earliest timer the engine wants a [`Event::Tick`] for.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.stall.next_deadline().into_iter().chain(self.countdown).min()
    }

    pub fn handle<S>(&mut self, surface: &mut S, now: Instant, event: Event) -> Vec<Effect>
    where
        S: Surface + ?Sized,
    {
        let mut effects = Vec::new();
        match event {
            Event::Signal(token, signal) => {
                if token != self.token {
                    tracing::trace!(
                        %token,
                        current = %self.token,
                        ?signal,
                        "Dropping stale signal"
                    );
                } else if self.status != PlaybackStatus::Failed {
                    self.on_signal(surface, now, signal, &mut effects);
                }
            }
            Event::Tick => self.on_tick(surface, now, &mut effects),
            Event::Seek(target) => self.seek(surface, now, target, &mut effects),
            Event::Skip(delta) => {
                let target = self.position(surface) + delta;
                self.seek(surface, now, target, &mut effects);
            }
            Event::TogglePlay => self.toggle_play(surface, now, &mut effects),
            Event::SessionSettled(result) => self.on_session(surface, now, result, &mut effects),
            Event::ProbeSettled(result) => self.on_probe(result),
        }
        effects
    }

    /// Tears the item down. The engine is consumed; late callbacks die with it.
    pub fn stop<S>(mut self, surface: &mut S, now: Instant) -> Teardown
    where
        S: Surface + ?Sized,
    {
        let mut effects = Vec::new();
        if self.status != PlaybackStatus::Failed {
            self.report(now, surface, ProgressReason::Stop, &mut effects);
        }
        if let Some(op) = self.session.stop() {
            effects.push(Effect::Session(op));
        }
        surface.detach();
        tracing::info!(item = %self.item_id, "Playback stopped");

        Teardown {
            token: self.token.next(),
            effects,
        }
    }

    fn set_status(&mut self, status: PlaybackStatus, effects: &mut Vec<Effect>) {
        if self.status != status {
            tracing::debug!(from = ?self.status, to = ?status, "Playback status changed");
            self.status = status;
            effects.push(Effect::Status(status));
        }
    }

    fn report<S>(
        &mut self,
        now: Instant,
        surface: &S,
        reason: ProgressReason,
        effects: &mut Vec<Effect>,
    ) where
        S: Surface + ?Sized,
    {
        let position = self.position(surface);
        if self.progress.should_write(now, position, reason) {
            effects.push(Effect::SaveProgress(ProgressReport {
                item_id: self.item_id.clone(),
                absolute_position_seconds: position,
                duration_seconds: self.duration(surface),
                reason,
                completed: reason == ProgressReason::Completed,
            }));
        }
    }

    fn request_probe(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        if self.probe_in_flight {
            return;
        }
        self.probe_in_flight = true;
        self.last_probe_at = Some(now);
        effects.push(Effect::Probe {
            source: self.session.source().clone(),
        });
    }

    /// Loads `url` under a fresh token. Local time restarts at zero.
    fn attach<S>(&mut self, surface: &mut S, url: Url, now: Instant)
    where
        S: Surface + ?Sized,
    {
        self.token = self.token.next();
        tracing::debug!(token = %self.token, %url, "Attaching manifest");
        surface.attach(&url, self.token);
        self.session.set_resolved_url(url);
        self.attached = true;

        self.guard.reset_baseline(0., now);
        self.guard.arm_long(now);
        self.stall.rebase(now, 0.);
        if self.wants_play {
            surface.play();
        }
    }

    fn on_signal<S>(
        &mut self,
        surface: &mut S,
        now: Instant,
        signal: Signal,
        effects: &mut Vec<Effect>,
    ) where
        S: Surface + ?Sized,
    {
        match signal {
            Signal::MetadataLoaded => {
                if self.guard.check_rate(now, surface.playback_rate(), true) {
                    surface.set_playback_rate(1.);
                }
                if let Some(position) = self.resume_at.take() {
                    let view = SurfaceView::capture(surface);
                    let target = self.timeline.clamp(position, view.local_duration);
                    let mut local = self.timeline.to_local(target).max(0.);
                    if let Some(duration) = view.local_duration {
                        local = local.min(duration);
                    }
                    tracing::debug!(position = target, local, "Restoring position");
                    self.guard.arm_long(now);
                    surface.set_current_time(local);
                    self.guard.reset_baseline(local, now);
                    self.stall.rebase(now, local);
                }
            }
            Signal::TimeUpdate => self.on_progress(surface, now, effects),
            Signal::Playing => {
                self.wants_play = true;
                self.countdown = None;
                self.set_status(PlaybackStatus::Playing, effects);
            }
            Signal::Paused => {
                if self.status != PlaybackStatus::Ended {
                    self.wants_play = false;
                    self.set_status(PlaybackStatus::Paused, effects);
                    self.report(now, surface, ProgressReason::Pause, effects);
                }
            }
            Signal::Ended => {
                self.set_status(PlaybackStatus::Ended, effects);
                self.stall.cancel_deferred();
                self.report(now, surface, ProgressReason::Completed, effects);
                if self.next_item.is_some() {
                    self.countdown = Some(now + self.config.timers.next_item_countdown);
                }
            }
            Signal::Waiting => {
                self.stall.defer(now, StallReason::Waiting);
                self.set_status(PlaybackStatus::Buffering, effects);
            }
            Signal::Stalled => {
                self.stall.defer(now, StallReason::Stalled);
                self.set_status(PlaybackStatus::Buffering, effects);
            }
            Signal::BufferStall => self.on_stall(surface, now, StallReason::BufferStall, effects),
            Signal::Seeking => self.guard.seek_started(now),
            Signal::Seeked => {
                let local = surface.current_time();
                let duration = SurfaceView::capture(surface).local_duration;
                if let Verdict::Revert { to } = self.guard.seek_finished(now, local, duration) {
                    surface.set_current_time(to);
                }
                self.stall.rebase(now, surface.current_time());
            }
            Signal::RateChange => {
                if self.guard.check_rate(now, surface.playback_rate(), false) {
                    tracing::debug!(
                        rate = surface.playback_rate(),
                        "Forcing playback rate back to 1.0"
                    );
                    surface.set_playback_rate(1.);
                }
            }
            Signal::Error(error) if error.fatal => self.on_fatal(surface, now, error, effects),
            Signal::Error(error) => {
                if error.detail == ErrorDetail::BufferStall {
                    self.on_stall(surface, now, StallReason::BufferStall, effects);
                } else {
                    tracing::debug!(%error, "Non-fatal playback error");
                }
            }
        }
    }

    fn on_progress<S>(&mut self, surface: &mut S, now: Instant, effects: &mut Vec<Effect>)
    where
        S: Surface + ?Sized,
    {
        if surface.is_paused() || surface.is_seeking() {
            return;
        }

        let local = surface.current_time();
        if let Verdict::Revert { to } = self.guard.check_progress(now, local) {
            surface.set_current_time(to);
            self.stall.rebase(now, to);
            return;
        }

        if self.stall.observe(now, local) {
            self.session.note_healthy();
            if matches!(
                self.status,
                PlaybackStatus::Buffering | PlaybackStatus::Loading
            ) {
                self.set_status(PlaybackStatus::Playing, effects);
            }
        }

        if self.guard.check_rate(now, surface.playback_rate(), false) {
            surface.set_playback_rate(1.);
        }
        self.report(now, surface, ProgressReason::Periodic, effects);
    }

    fn on_tick<S>(&mut self, surface: &mut S, now: Instant, effects: &mut Vec<Effect>)
    where
        S: Surface + ?Sized,
    {
        if let Some(due) = self.countdown {
            if now >= due {
                self.countdown = None;
                if let Some(next) = self.next_item.clone() {
                    tracing::info!(next = %next, "Advancing to next item");
                    effects.push(Effect::AdvanceToNext { item_id: next });
                }
            }
        }
        if matches!(self.status, PlaybackStatus::Failed | PlaybackStatus::Ended) || !self.attached
        {
            return;
        }

        let refresh = self.config.timers.probe_refresh_interval;
        if self
            .last_probe_at
            .is_some_and(|at| now.saturating_duration_since(at) >= refresh)
        {
            self.request_probe(now, effects);
        }

        if let Some(reason) = self.stall.take_due(now) {
            self.on_stall(surface, now, reason, effects);
            return;
        }

        let playing = self.wants_play && !surface.is_paused() && !surface.is_seeking();
        if !playing {
            return;
        }
        if self.stall.observe(now, surface.current_time()) {
            return;
        }
        if self.stall.is_frozen(now) {
            self.on_stall(surface, now, StallReason::FrozenPlayhead, effects);
        } else if !surface.ready_state().is_usable() && !self.guard.is_expected(now) {
            self.on_stall(surface, now, StallReason::NotReady, effects);
        }
    }

    fn on_stall<S>(
        &mut self,
        surface: &mut S,
        now: Instant,
        reason: StallReason,
        effects: &mut Vec<Effect>,
    ) where
        S: Surface + ?Sized,
    {
        let Some(stalls) = self.stall.register(now, reason) else {
            return;
        };
        self.set_status(PlaybackStatus::Buffering, effects);

        let local = surface.current_time();
        let ahead = buffered_ahead(&surface.buffered(), local);
        let mut remedies = ladder(
            &LadderInput {
                consecutive_stalls: stalls,
                buffered_ahead: ahead,
                quality: surface.quality(),
                session_active: self.session.is_active(),
            },
            &self.config.stall,
        );
        if remedies.reinit == Some(Reinit::Session) && self.session.in_flight().is_some() {
            // a fresh session is already on its way
            remedies.reinit = None;
        }
        tracing::warn!(?reason, stalls, buffered_ahead = ahead, ?remedies, "Playback stalled");

        if remedies.reinit.is_some() && self.stall.is_exhausted() {
            self.fail("recovery ladder exhausted", effects);
            return;
        }

        self.guard.note_recovery(now);
        if let Some(nudge) = remedies.nudge {
            self.guard.arm_short(now);
            surface.set_current_time(local + nudge);
        }
        if let Some(level) = remedies.step_down_to {
            surface.force_level(level);
        }
        if remedies.recover_media {
            self.guard.arm_long(now);
            surface.recover_media_error();
        }
        if remedies.reload {
            self.guard.arm_long(now);
            surface.reload_from((local - self.config.stall.reload_backoff).max(0.));
        }

        let reinitialized = match remedies.reinit {
            Some(Reinit::Session) => self.restart(surface, now, RestartReason::Stall, effects),
            Some(Reinit::Surface) => self.reinitialize(surface, now),
            None => false,
        };
        self.stall.begin_recovery(reinitialized);
    }

    fn on_fatal<S>(
        &mut self,
        surface: &mut S,
        now: Instant,
        error: PlaybackError,
        effects: &mut Vec<Effect>,
    ) where
        S: Surface + ?Sized,
    {
        let action = self.session.classify(&error);
        tracing::warn!(%error, ?action, "Fatal playback error");

        match action {
            FatalAction::Restart(reason) => {
                self.restart(surface, now, reason, effects);
            }
            FatalAction::ProxyRetry(url) => {
                self.resume_at = Some(self.position(surface));
                surface.detach();
                self.attach(surface, url, now);
            }
            FatalAction::RecoverMedia => {
                self.guard.note_recovery(now);
                self.guard.arm_long(now);
                surface.recover_media_error();
            }
            FatalAction::Reinitialize => {
                self.reinitialize(surface, now);
            }
            FatalAction::Ignore => {}
            FatalAction::Fail => self.fail(&error.to_string(), effects),
        }
    }

    /// Returns whether a restart was actually requested.
    fn restart<S>(
        &mut self,
        surface: &mut S,
        now: Instant,
        reason: RestartReason,
        effects: &mut Vec<Effect>,
    ) -> bool
    where
        S: Surface + ?Sized,
    {
        let position = self.position(surface);
        let Some(op) = self.session.request_restart(now, reason, position) else {
            return false;
        };
        self.set_status(PlaybackStatus::Buffering, effects);
        effects.push(Effect::Session(op));
        // the old manifest is not expected to move until the new one arrives
        self.stall.rebase(now, surface.current_time());
        true
    }

    /// Recreates the surface against the last resolved URL, keeping the position.
    fn reinitialize<S>(&mut self, surface: &mut S, now: Instant) -> bool
    where
        S: Surface + ?Sized,
    {
        let Some(url) = self.session.resolved_url().cloned() else {
            return false;
        };
        tracing::info!(%url, "Reinitialising playback surface");
        self.resume_at = Some(self.position(surface));
        surface.detach();
        self.attach(surface, url, now);
        true
    }

    fn fail(&mut self, reason: &str, effects: &mut Vec<Effect>) {
        tracing::error!(item = %self.item_id, reason, "Playback failed");
        self.set_status(PlaybackStatus::Failed, effects);
        self.stall.cancel_deferred();
        if let Some(op) = self.session.stop() {
            effects.push(Effect::Session(op));
        }
    }

    fn seek<S>(&mut self, surface: &mut S, now: Instant, target: f64, effects: &mut Vec<Effect>)
    where
        S: Surface + ?Sized,
    {
        if self.status == PlaybackStatus::Failed {
            return;
        }
        if !self.attached {
            // nothing loaded yet, remember where to start
            self.resume_at = Some(self.timeline.clamp(target, None));
            return;
        }

        if let Some(pending) = self.pending_seek {
            tracing::debug!(target, pending, "Reseek already in flight, dropping seek");
            return;
        }

        let view = SurfaceView::capture(surface);
        let plan =
            self.timeline
                .plan_seek(target, &view, self.session.is_active(), &self.config.timeline);
        self.guard
            .arm_intentional(now, self.config.timeline.intentional_window);
        self.countdown = None;

        match plan {
            SeekPlan::Local { target, local } => {
                tracing::debug!(target, local, "Seeking within loaded manifest");
                surface.set_current_time(local);
                self.stall.rebase(now, local);
                if self.status == PlaybackStatus::Ended {
                    self.set_status(PlaybackStatus::Paused, effects);
                }
            }
            SeekPlan::Remote { target, offset } => {
                match self.session.request_reseek(now, target) {
                    Some(op) => {
                        tracing::info!(target, offset, "Seeking through a new transcode session");
                        self.pending_seek = Some(offset as f64);
                        self.set_status(PlaybackStatus::Buffering, effects);
                        effects.push(Effect::Session(op));
                    }
                    None => tracing::debug!(target, "Reseek already in flight, dropping seek"),
                }
            }
        }
    }

    fn toggle_play<S>(&mut self, surface: &mut S, now: Instant, effects: &mut Vec<Effect>)
    where
        S: Surface + ?Sized,
    {
        if surface.is_paused() {
            self.wants_play = true;
            if self.status == PlaybackStatus::Ended {
                self.seek(surface, now, 0., effects);
            }
            surface.play();
        } else {
            self.wants_play = false;
            surface.pause();
        }
    }

    fn on_session<S>(
        &mut self,
        surface: &mut S,
        now: Instant,
        result: Result<SessionHandle, String>,
        effects: &mut Vec<Effect>,
    ) where
        S: Surface + ?Sized,
    {
        match self.session.complete(result) {
            SessionOutcome::Started {
                purpose,
                manifest_url,
                base_offset,
            } => {
                self.timeline.set_base_offset(base_offset);
                self.pending_seek = None;
                // the session itself starts at the resume point
                self.resume_at = None;
                if self.attached {
                    surface.detach();
                }
                self.attach(surface, manifest_url, now);
                if let SessionPurpose::Reseek { .. } = purpose {
                    self.guard
                        .arm_intentional(now, self.config.timeline.intentional_window);
                }
            }
            SessionOutcome::Direct { url } => self.attach(surface, url, now),
            SessionOutcome::Failed { purpose } => {
                if let SessionPurpose::Reseek { target } = purpose {
                    tracing::warn!(target, "Reseek failed, staying at current position");
                    self.pending_seek = None;
                    if self.status == PlaybackStatus::Buffering {
                        self.set_status(PlaybackStatus::Playing, effects);
                    }
                }
            }
            SessionOutcome::Unexpected => {
                tracing::debug!("Session result arrived with nothing in flight");
            }
        }
    }

    fn on_probe(&mut self, result: Result<MediaInfo, String>) {
        self.probe_in_flight = false;
        match result {
            Ok(info) => {
                if let Some(duration) = info.duration_seconds {
                    tracing::debug!(duration, "Probed media duration");
                    self.timeline.set_known_duration(duration);
                }
            }
            Err(error) => tracing::debug!(%error, "Metadata probe failed"),
        }
    }
}
