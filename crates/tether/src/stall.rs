//! Stall detection and the escalation ladder.

use std::time::Instant;

use crate::{config::StallConfig, surface::QualityState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallReason {
    /// The surface is waiting for data.
    Waiting,
    /// The surface reported that fetching stopped delivering.
    Stalled,
    /// The adaptive-bitrate layer ran dry.
    BufferStall,
    /// Playing, but the position did not move.
    FrozenPlayhead,
    /// Playing, but not enough data decoded to advance.
    NotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallPhase {
    Healthy,
    Stalled(StallReason),
    Recovering,
    Reinitializing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthState {
    pub consecutive_stalls: u8,
    pub last_movement_at: Instant,
    pub last_observed_position: f64,
}

#[derive(Debug)]
pub struct StallDetector {
    config: StallConfig,
    health: HealthState,
    phase: StallPhase,

    last_handled_at: Option<Instant>,
    last_decay_at: Option<Instant>,
    reinit_attempts: u8,
    debounced: Option<(Instant, StallReason)>,
}

impl StallDetector {
    pub fn new(config: StallConfig, now: Instant, position: f64) -> Self {
        Self {
            config,
            health: HealthState {
                consecutive_stalls: 0,
                last_movement_at: now,
                last_observed_position: position,
            },
            phase: StallPhase::Healthy,
            last_handled_at: None,
            last_decay_at: None,
            reinit_attempts: 0,
            debounced: None,
        }
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    pub fn phase(&self) -> StallPhase {
        self.phase
    }

    pub fn consecutive_stalls(&self) -> u8 {
        self.health.consecutive_stalls
    }

    pub fn reset(&mut self, now: Instant, position: f64) {
        *self = Self::new(self.config.clone(), now, position);
    }

    /// Restarts the frozen-playhead clock, e.g. after a new manifest was attached.
    pub fn rebase(&mut self, now: Instant, position: f64) {
        self.health.last_movement_at = now;
        self.health.last_observed_position = position;
        self.debounced = None;
    }

    /// Feeds a position sample. Returns whether it counts as genuine movement.
    pub fn observe(&mut self, now: Instant, position: f64) -> bool {
        let delta = position - self.health.last_observed_position;
        if delta < 0. {
            // jumped backwards, nothing to learn about progress
            self.health.last_observed_position = position;
            return false;
        }
        if delta < self.config.movement_threshold {
            return false;
        }

        self.health.last_movement_at = now;
        self.health.last_observed_position = position;
        self.debounced = None;

        if self.phase != StallPhase::Healthy {
            tracing::debug!(
                stalls = self.health.consecutive_stalls,
                "Playback moving again"
            );
            self.phase = StallPhase::Healthy;
            self.reinit_attempts = 0;
        }
        self.decay(now);
        true
    }

    fn decay(&mut self, now: Instant) {
        if self.health.consecutive_stalls == 0 {
            return;
        }
        let quiet_since = match (self.last_handled_at, self.last_decay_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let quiet_enough = quiet_since
            .map_or(true, |at| now.saturating_duration_since(at) >= self.config.decay_interval);
        if quiet_enough {
            self.health.consecutive_stalls -= 1;
            self.last_decay_at = Some(now);
        }
    }

    pub fn is_frozen(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.health.last_movement_at) >= self.config.frozen_after
    }

    /// Arms the debounce timer for a waiting/stalled signal.
    pub fn defer(&mut self, now: Instant, reason: StallReason) {
        if self.debounced.is_none() {
            self.debounced = Some((now + self.config.debounce, reason));
        }
    }

    /// A deferred stall whose debounce expired without movement.
    pub fn take_due(&mut self, now: Instant) -> Option<StallReason> {
        match self.debounced {
            Some((due, reason)) if now >= due => {
                self.debounced = None;
                Some(reason)
            }
            _ => None,
        }
    }

    pub fn cancel_deferred(&mut self) {
        self.debounced = None;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debounced.map(|(due, _)| due)
    }

    /// Enters [`StallPhase::Stalled`]. Returns the new stall count, or `None`
    /// when the previous stall was handled too recently.
    pub fn register(&mut self, now: Instant, reason: StallReason) -> Option<u8> {
        if let Some(at) = self.last_handled_at {
            if now.saturating_duration_since(at) < self.config.handling_cooldown {
                return None;
            }
        }

        self.last_handled_at = Some(now);
        self.health.consecutive_stalls = self
            .health
            .consecutive_stalls
            .saturating_add(1)
            .min(self.config.max_consecutive_stalls);
        self.phase = StallPhase::Stalled(reason);
        Some(self.health.consecutive_stalls)
    }

    /// Only reinitialisations that were actually issued count towards exhaustion.
    pub fn begin_recovery(&mut self, reinitialized: bool) {
        if reinitialized {
            self.phase = StallPhase::Reinitializing;
            self.reinit_attempts = self.reinit_attempts.saturating_add(1);
        } else {
            self.phase = StallPhase::Recovering;
        }
    }

    /// All reinitialisations were spent without any movement in between.
    pub fn is_exhausted(&self) -> bool {
        self.reinit_attempts >= self.config.max_reinit_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reinit {
    /// Recreate the surface against the last resolved URL.
    Surface,
    /// The manifest itself may be stale: ask for a fresh transcode session.
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LadderInput {
    pub consecutive_stalls: u8,
    pub buffered_ahead: f64,
    pub quality: QualityState,
    pub session_active: bool,
}

/// What to do about one stall. Remedies are layered, not exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Remedies {
    /// Seconds to skip forward over a buffer seam.
    pub nudge: Option<f64>,
    pub step_down_to: Option<usize>,
    pub recover_media: bool,
    pub reload: bool,
    pub reinit: Option<Reinit>,
}

pub fn ladder(input: &LadderInput, config: &StallConfig) -> Remedies {
    let stalls = input.consecutive_stalls;

    let nudge = (input.buffered_ahead > config.nudge_min_ahead)
        .then(|| config.nudge_max.min(input.buffered_ahead - config.nudge_margin))
        .filter(|nudge| *nudge > config.nudge_min);

    let step_down_to = if stalls >= config.step_down_after && input.quality.auto {
        input.quality.current.and_then(|level| level.checked_sub(1))
    } else {
        None
    };

    let reinit = (stalls >= config.reinit_after).then_some(if input.session_active {
        Reinit::Session
    } else {
        Reinit::Surface
    });

    Remedies {
        nudge,
        step_down_to,
        recover_media: stalls >= config.media_recovery_after,
        reload: true,
        reinit,
    }
}
