use std::{fmt, time::Instant};

use crate::{
    api::MediaInfo,
    config::ContinuityConfig,
    engine::{ContinuityEngine, Effect, Event, PlaybackItem, PlaybackStatus},
    session::{SessionHandle, SessionOp},
    surface::{LoadToken, Signal, Surface},
};

/// Identity of one `play()` call, used to route network results back.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackId(u64);

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "playback-{}", self.0)
    }
}

/// Result of a network effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Session(Result<SessionHandle, String>),
    Probe(Result<MediaInfo, String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    /// Captured under a superseded load or item.
    Stale,
    /// Teardown artifact, expected after `stop()`.
    Suppressed,
    /// Nothing is playing.
    Idle,
}

/// Owns the playback surface and the engine of the item currently playing.
pub struct Controller<S> {
    config: ContinuityConfig,
    surface: S,
    engine: Option<(PlaybackId, ContinuityEngine)>,

    last_token: LoadToken,
    last_playback: PlaybackId,
    grace_until: Option<Instant>,
}

impl<S> Controller<S>
where
    S: Surface,
{
    pub fn new(surface: S, config: ContinuityConfig) -> Self {
        Self {
            config,
            surface,
            engine: None,
            last_token: LoadToken::default(),
            last_playback: PlaybackId::default(),
            grace_until: None,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn engine(&self) -> Option<&ContinuityEngine> {
        self.engine.as_ref().map(|(_, engine)| engine)
    }

    pub fn playback(&self) -> Option<PlaybackId> {
        self.engine.as_ref().map(|(id, _)| *id)
    }

    pub fn status(&self) -> PlaybackStatus {
        self.engine()
            .map_or(PlaybackStatus::Idle, ContinuityEngine::status)
    }

    pub fn position(&self) -> f64 {
        self.engine()
            .map_or(0., |engine| engine.position(&self.surface))
    }

    pub fn duration(&self) -> f64 {
        self.engine()
            .map_or(0., |engine| engine.duration(&self.surface))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.engine().and_then(ContinuityEngine::next_deadline)
    }

    /// Replaces whatever is playing with `item`.
    pub fn play(&mut self, item: PlaybackItem, now: Instant) -> Vec<Effect> {
        let mut effects = self.stop(now);

        self.last_playback = PlaybackId(self.last_playback.0 + 1);
        let (engine, started) = ContinuityEngine::play(
            item,
            self.config.clone(),
            self.last_token,
            &mut self.surface,
            now,
        );
        self.engine = Some((self.last_playback, engine));
        effects.extend(started);
        effects
    }

    pub fn stop(&mut self, now: Instant) -> Vec<Effect> {
        let Some((_, engine)) = self.engine.take() else {
            return Vec::new();
        };
        let teardown = engine.stop(&mut self.surface, now);
        self.last_token = teardown.token;
        self.grace_until = Some(now + self.config.timers.teardown_grace);
        teardown.effects
    }

    pub fn dispatch(&mut self, now: Instant, event: Event) -> (Disposition, Vec<Effect>) {
        if let Event::Signal(token, signal) = &event {
            let current = self.engine().map(ContinuityEngine::token);
            if current != Some(*token) {
                return (self.unrouted(now, *token, signal), Vec::new());
            }
        }

        match &mut self.engine {
            Some((_, engine)) => (
                Disposition::Handled,
                engine.handle(&mut self.surface, now, event),
            ),
            None => (Disposition::Idle, Vec::new()),
        }
    }

    /// Routes a network result to the engine that asked for it.
    pub fn settle(
        &mut self,
        now: Instant,
        playback: PlaybackId,
        completion: Completion,
    ) -> (Disposition, Vec<Effect>) {
        if self.playback() != Some(playback) {
            tracing::debug!(%playback, "Result for a finished playback");
            // a session created for an item nobody watches anymore
            let effects = match completion {
                Completion::Session(Ok(handle)) => vec![Effect::Session(SessionOp::Stop {
                    session_id: handle.session_id,
                })],
                _ => Vec::new(),
            };
            return (Disposition::Stale, effects);
        }

        let event = match completion {
            Completion::Session(result) => Event::SessionSettled(result),
            Completion::Probe(result) => Event::ProbeSettled(result),
        };
        self.dispatch(now, event)
    }

    fn unrouted(&self, now: Instant, token: LoadToken, signal: &Signal) -> Disposition {
        let in_grace = self.grace_until.is_some_and(|until| now <= until);
        match signal {
            Signal::Error(error) if in_grace => {
                tracing::debug!(%token, %error, "Suppressed teardown error");
                Disposition::Suppressed
            }
            Signal::Error(error) if self.engine.is_none() => {
                tracing::warn!(%token, %error, "Playback error with nothing playing");
                Disposition::Idle
            }
            _ if self.engine.is_none() => Disposition::Idle,
            _ => {
                tracing::trace!(%token, ?signal, "Dropping stale signal");
                Disposition::Stale
            }
        }
    }
}
