use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::ProgressConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressReason {
    Start,
    Periodic,
    Pause,
    Stop,
    Completed,
}

impl ProgressReason {
    /// Transitions that are always persisted, throttle or not.
    pub fn is_forced(self) -> bool {
        !matches!(self, ProgressReason::Periodic)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub item_id: String,
    pub absolute_position_seconds: f64,
    /// Zero when unknown.
    pub duration_seconds: f64,
    pub reason: ProgressReason,
    pub completed: bool,
}

#[derive(Debug)]
pub struct ProgressThrottle {
    config: ProgressConfig,
    last_write: Option<(f64, Instant)>,
}

impl ProgressThrottle {
    pub fn new(config: ProgressConfig) -> Self {
        Self {
            config,
            last_write: None,
        }
    }

    /// Decides whether a write should happen now, and records it if so.
    pub fn should_write(&mut self, now: Instant, position: f64, reason: ProgressReason) -> bool {
        let due = match self.last_write {
            _ if reason.is_forced() => true,
            None => true,
            Some((last_position, last_at)) => {
                (position - last_position).abs() >= self.config.min_position_delta
                    || now.saturating_duration_since(last_at) >= self.config.max_interval
            }
        };
        if due {
            self.last_write = Some((position, now));
        }
        due
    }
}
