//! Expected-motion guard.
//!
//! Surfaces sometimes move their clock on their own: a decoder skipping
//! ahead after a dropped keyframe, a rate change nobody asked for. The guard
//! compares every reported position with what real-time playback could have
//! produced and pulls the playhead back when the difference is impossible.
//! Legitimate jumps are announced beforehand by arming a [`SeekWindows`].

use std::time::{Duration, Instant};

use crate::config::GuardConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekWindows {
    intentional_until: Option<Instant>,
    system_until: Option<Instant>,
}

impl SeekWindows {
    /// User-initiated seek.
    pub fn arm_intentional(&mut self, now: Instant, length: Duration) {
        self.intentional_until = Self::extend(self.intentional_until, now + length);
    }

    /// Seek issued by recovery or by the guard itself.
    pub fn arm_system(&mut self, now: Instant, length: Duration) {
        self.system_until = Self::extend(self.system_until, now + length);
    }

    pub fn is_expected(&self, now: Instant) -> bool {
        self.intentional_until
            .into_iter()
            .chain(self.system_until)
            .max()
            .is_some_and(|until| now <= until)
    }

    fn extend(current: Option<Instant>, until: Instant) -> Option<Instant> {
        Some(current.map_or(until, |current| current.max(until)))
    }
}

/// A seek that started while nothing announced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingSeek {
    pub from: f64,
    pub armed_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Accept,
    /// Move the surface back to this local position.
    Revert { to: f64 },
}

#[derive(Debug)]
pub struct MotionGuard {
    config: GuardConfig,
    windows: SeekWindows,

    last_check: Option<Instant>,
    last_position: Option<f64>,
    pending: Option<PendingSeek>,

    last_recovery_at: Option<Instant>,
    last_rate_fix: Option<Instant>,
}

impl MotionGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            windows: SeekWindows::default(),
            last_check: None,
            last_position: None,
            pending: None,
            last_recovery_at: None,
            last_rate_fix: None,
        }
    }

    pub fn windows(&self) -> &SeekWindows {
        &self.windows
    }

    pub fn arm_intentional(&mut self, now: Instant, length: Duration) {
        self.windows.arm_intentional(now, length);
    }

    pub fn arm_system(&mut self, now: Instant, length: Duration) {
        self.windows.arm_system(now, length);
    }

    pub fn arm_short(&mut self, now: Instant) {
        self.windows.arm_system(now, self.config.short_system_window);
    }

    pub fn arm_long(&mut self, now: Instant) {
        self.windows.arm_system(now, self.config.long_system_window);
    }

    pub fn is_expected(&self, now: Instant) -> bool {
        self.windows.is_expected(now)
    }

    /// Records that the stall ladder just acted on the surface.
    pub fn note_recovery(&mut self, now: Instant) {
        self.last_recovery_at = Some(now);
    }

    pub fn last_position(&self) -> Option<f64> {
        self.last_position
    }

    /// Forgets history, e.g. after a new manifest has been attached.
    pub fn reset_baseline(&mut self, position: f64, now: Instant) {
        self.last_position = Some(position);
        self.last_check = Some(now);
        self.pending = None;
    }

    fn is_impossible(&self, elapsed_wall: f64, delta_media: f64) -> bool {
        let expected_max_forward = self
            .config
            .min_forward_allowance
            .max(elapsed_wall * self.config.forward_rate_factor + self.config.forward_slack);

        delta_media > expected_max_forward.max(self.config.max_unexpected_forward)
            || delta_media < -self.config.max_unexpected_backward
    }

    /// Judges a periodic progress report. Only call while playing and not seeking.
    pub fn check_progress(&mut self, now: Instant, position: f64) -> Verdict {
        let (Some(last_position), Some(last_check)) = (self.last_position, self.last_check) else {
            self.reset_baseline(position, now);
            return Verdict::Accept;
        };

        let elapsed_wall = now.saturating_duration_since(last_check).as_secs_f64();
        let delta_media = position - last_position;

        if !self.is_expected(now) && self.is_impossible(elapsed_wall, delta_media) {
            let to = last_position
                + self
                    .config
                    .revert_max_step
                    .min(elapsed_wall * self.config.revert_rate_factor);
            tracing::warn!(
                from = last_position,
                reported = position,
                elapsed_wall,
                reverted_to = to,
                "Unexpected timeline jump, reverting"
            );
            self.arm_short(now);
            self.reset_baseline(to, now);
            return Verdict::Revert { to };
        }

        self.last_position = Some(position);
        self.last_check = Some(now);
        Verdict::Accept
    }

    pub fn seek_started(&mut self, now: Instant) {
        if self.is_expected(now) || self.pending.is_some() {
            return;
        }
        if let Some(from) = self.last_position {
            self.pending = Some(PendingSeek { from, armed_at: now });
        }
    }

    pub fn pending_seek(&self) -> Option<&PendingSeek> {
        self.pending.as_ref()
    }

    /// Judges where a seek landed. `duration` is the local duration, if known.
    pub fn seek_finished(&mut self, now: Instant, to: f64, duration: Option<f64>) -> Verdict {
        let pending = self.pending.take();

        let after_recovery = self.last_recovery_at.is_some_and(|at| {
            now.saturating_duration_since(at) <= self.config.recovery_seek_grace
        });
        if after_recovery {
            self.arm_short(now);
            self.reset_baseline(to, now);
            return Verdict::Accept;
        }

        let pending = match pending {
            Some(pending) if !self.is_expected(now) => pending,
            _ => {
                self.reset_baseline(to, now);
                return Verdict::Accept;
            }
        };

        let elapsed_wall = now.saturating_duration_since(pending.armed_at).as_secs_f64();
        if !self.is_impossible(elapsed_wall, to - pending.from) {
            self.reset_baseline(to, now);
            return Verdict::Accept;
        }

        let mut target = pending.from + 1.;
        if let Some(duration) = duration {
            if target > duration {
                target = duration - 0.5;
            }
        }
        let target = target.max(0.);
        tracing::warn!(
            from = pending.from,
            landed = to,
            reverted_to = target,
            "Seek nobody asked for, reverting"
        );
        self.arm_short(now);
        self.reset_baseline(target, now);
        Verdict::Revert { to: target }
    }

    /// Whether `rate` has to be forced back to 1.0 now.
    pub fn check_rate(&mut self, now: Instant, rate: f64, forced: bool) -> bool {
        if (rate - 1.).abs() <= self.config.rate_tolerance {
            return false;
        }
        let debounced = self
            .last_rate_fix
            .is_some_and(|at| now.saturating_duration_since(at) < self.config.rate_debounce);
        if debounced && !forced {
            return false;
        }
        self.last_rate_fix = Some(now);
        true
    }
}
