//! Tunable policy for the continuity engine.
//!
//! Every threshold below was tuned empirically against real decode engines
//! and transcode backends. None of them is a correctness requirement, so they
//! are all overridable (for example from the `[continuity]` table of
//! `tether.toml`). Durations are written as fractional seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuityConfig {
    pub timeline: TimelineConfig,
    pub guard: GuardConfig,
    pub stall: StallConfig,
    pub session: SessionConfig,
    pub progress: ProgressConfig,
    pub timers: TimerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Seeks closer than this to the current position never leave the loaded manifest.
    pub local_seek_radius: f64,
    /// Tolerance around a buffered range when deciding whether a target is buffered.
    pub buffered_padding: f64,
    #[serde(with = "secs")]
    pub intentional_window: Duration,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            local_seek_radius: 20.,
            buffered_padding: 1.5,
            intentional_window: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub min_forward_allowance: f64,
    pub forward_rate_factor: f64,
    pub forward_slack: f64,
    /// Floor of the forward jump threshold, whatever the elapsed wall time.
    pub max_unexpected_forward: f64,
    pub max_unexpected_backward: f64,
    pub revert_max_step: f64,
    pub revert_rate_factor: f64,
    #[serde(with = "secs")]
    pub short_system_window: Duration,
    #[serde(with = "secs")]
    pub long_system_window: Duration,
    /// Seeks completing this soon after a recovery action are trusted.
    #[serde(with = "secs")]
    pub recovery_seek_grace: Duration,
    pub rate_tolerance: f64,
    #[serde(with = "secs")]
    pub rate_debounce: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            min_forward_allowance: 6.,
            forward_rate_factor: 4.,
            forward_slack: 2.,
            max_unexpected_forward: 45.,
            max_unexpected_backward: 12.,
            revert_max_step: 2.,
            revert_rate_factor: 1.5,
            short_system_window: Duration::from_millis(1800),
            long_system_window: Duration::from_secs(4),
            recovery_seek_grace: Duration::from_millis(4500),
            rate_tolerance: 0.001,
            rate_debounce: Duration::from_millis(400),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StallConfig {
    /// Smallest forward advance that counts as genuine movement.
    pub movement_threshold: f64,
    #[serde(with = "secs")]
    pub frozen_after: Duration,
    /// Stall handling closer than this to the previous one is ignored.
    #[serde(with = "secs")]
    pub handling_cooldown: Duration,
    #[serde(with = "secs")]
    pub decay_interval: Duration,
    /// Waiting/stalled signals are only acted upon if playback is still stuck after this delay.
    #[serde(with = "secs")]
    pub debounce: Duration,
    pub max_consecutive_stalls: u8,

    pub nudge_min_ahead: f64,
    pub nudge_max: f64,
    pub nudge_margin: f64,
    pub nudge_min: f64,
    pub reload_backoff: f64,

    pub step_down_after: u8,
    pub media_recovery_after: u8,
    pub reinit_after: u8,
    /// Full reinitialisations allowed without any healthy movement in between.
    pub max_reinit_attempts: u8,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            movement_threshold: 0.1,
            frozen_after: Duration::from_millis(3500),
            handling_cooldown: Duration::from_secs(1),
            decay_interval: Duration::from_millis(1500),
            debounce: Duration::from_millis(500),
            max_consecutive_stalls: 8,

            nudge_min_ahead: 0.75,
            nudge_max: 0.35,
            nudge_margin: 0.25,
            nudge_min: 0.05,
            reload_backoff: 1.,

            step_down_after: 2,
            media_recovery_after: 3,
            reinit_after: 5,
            max_reinit_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(with = "secs")]
    pub restart_cooldown: Duration,
    /// Path segment after which transcode manifest URLs carry their session id.
    pub session_path_marker: String,
    /// Alternate route for direct sources, e.g. `https://proxy.example/fetch?url={url}`.
    pub proxy_template: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            restart_cooldown: Duration::from_millis(1500),
            session_path_marker: "transcode".to_string(),
            proxy_template: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub min_position_delta: f64,
    #[serde(with = "secs")]
    pub max_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            min_position_delta: 5.,
            max_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    #[serde(with = "secs")]
    pub health_interval: Duration,
    #[serde(with = "secs")]
    pub teardown_grace: Duration,
    #[serde(with = "secs")]
    pub probe_refresh_interval: Duration,
    #[serde(with = "secs")]
    pub next_item_countdown: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(1),
            teardown_grace: Duration::from_millis(1500),
            probe_refresh_interval: Duration::from_secs(60),
            next_item_countdown: Duration::from_secs(10),
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds)
            .map_err(|_| D::Error::custom(format!("invalid duration in seconds: {seconds}")))
    }
}
