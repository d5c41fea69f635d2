//! Absolute ⇄ local position mapping.
//!
//! A transcode session started at offset `N` produces a manifest whose local
//! time zero is absolute second `N`. The surface only ever sees local time,
//! the user (and resume points) only ever see absolute time.

use crate::{
    config::TimelineConfig,
    surface::{Surface, TimeRange},
};

/// Snapshot of the surface values the timeline needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceView {
    pub local_time: f64,
    pub local_duration: Option<f64>,
    pub buffered: Vec<TimeRange>,
}

impl SurfaceView {
    pub fn capture<S>(surface: &S) -> Self
    where
        S: Surface + ?Sized,
    {
        Self {
            local_time: surface.current_time(),
            local_duration: surface.duration().filter(|d| d.is_finite() && *d > 0.),
            buffered: surface.buffered(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekPlan {
    /// The loaded manifest can serve the target: move the surface to `local`.
    Local { target: f64, local: f64 },
    /// A new session must be requested starting at `offset`.
    Remote { target: f64, offset: u64 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    base_offset: f64,
    known_duration: f64,
}

impl Timeline {
    pub fn new(known_duration: Option<f64>) -> Self {
        let mut timeline = Self::default();
        if let Some(duration) = known_duration {
            timeline.set_known_duration(duration);
        }
        timeline
    }

    pub fn base_offset(&self) -> f64 {
        self.base_offset
    }

    pub(crate) fn set_base_offset(&mut self, offset: f64) {
        self.base_offset = offset.max(0.);
    }

    pub fn known_duration(&self) -> Option<f64> {
        (self.known_duration > 0.).then_some(self.known_duration)
    }

    pub fn set_known_duration(&mut self, duration: f64) {
        if duration.is_finite() && duration > 0. {
            self.known_duration = duration;
        }
    }

    pub fn absolute_time(&self, local_time: f64) -> f64 {
        (self.base_offset + local_time).max(0.)
    }

    pub fn to_local(&self, absolute: f64) -> f64 {
        absolute - self.base_offset
    }

    /// Zero means the duration is unknown.
    pub fn seekable_duration(&self, local_duration: Option<f64>) -> f64 {
        match (self.known_duration(), local_duration) {
            (Some(known), local) => known.max(self.base_offset + local.unwrap_or(0.).max(0.)),
            (None, Some(local)) => (self.base_offset + local).max(0.),
            (None, None) => 0.,
        }
    }

    pub fn is_buffered_at(&self, buffered: &[TimeRange], target: f64, padding: f64) -> bool {
        buffered
            .iter()
            .map(|range| range.shifted(self.base_offset))
            .any(|range| range.contains(target, padding))
    }

    /// Clamps an absolute target into the seekable window.
    pub fn clamp(&self, target: f64, local_duration: Option<f64>) -> f64 {
        let target = if target.is_finite() { target } else { 0. };
        match self.seekable_duration(local_duration) {
            duration if duration > 0. => target.clamp(0., duration),
            _ => target.max(0.),
        }
    }

    /// Decides how a seek to `target` (absolute seconds) should be carried out.
    pub fn plan_seek(
        &self,
        target: f64,
        view: &SurfaceView,
        session_active: bool,
        config: &TimelineConfig,
    ) -> SeekPlan {
        let target = self.clamp(target, view.local_duration);
        let delta = (target - self.base_offset - view.local_time).abs();

        if !session_active
            || delta <= config.local_seek_radius
            || self.is_buffered_at(&view.buffered, target, config.buffered_padding)
        {
            let mut local = self.to_local(target).max(0.);
            if let Some(duration) = view.local_duration {
                local = local.min(duration);
            }
            SeekPlan::Local { target, local }
        } else {
            SeekPlan::Remote {
                target,
                offset: target.floor() as u64,
            }
        }
    }
}
