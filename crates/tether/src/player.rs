//! Async runtime around a [`Controller`].
//!
//! All playback logic runs on the task executing [`Player::run`]. Network
//! calls are spawned and report back over a channel, so a slow transcode
//! backend never blocks health checks or surface signals.

use std::{sync::Arc, time::Instant};

use tokio::{
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};

use crate::{
    api::RemoteApi,
    config::ContinuityConfig,
    controller::{Completion, Controller, PlaybackId},
    engine::{Effect, Event, PlaybackItem, PlaybackStatus},
    error::{TetherError, TetherResult},
    session::SessionOp,
    surface::{LoadToken, Signal, Surface},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play(PlaybackItem),
    Stop,
    Seek(f64),
    Skip(f64),
    TogglePlay,
    Signal(LoadToken, Signal),
    Shutdown,
}

/// Read-only view for progress bars and status indicators.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub playback: Option<PlaybackId>,
    pub status: PlaybackStatus,
    pub position: f64,
    pub duration: f64,
    /// Transcode session currently serving the item.
    pub session: Option<String>,
    /// Set when the next-item countdown of the previous item expired.
    pub advance_to: Option<String>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            playback: None,
            status: PlaybackStatus::Idle,
            position: 0.,
            duration: 0.,
            session: None,
            advance_to: None,
        }
    }
}

#[derive(Clone)]
pub struct PlayerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PlayerState>,
}

impl PlayerHandle {
    pub fn send(&self, command: Command) -> TetherResult<()> {
        self.commands
            .send(command)
            .map_err(|_| TetherError::PlayerClosed)
    }

    pub fn play(&self, item: PlaybackItem) -> TetherResult<()> {
        self.send(Command::Play(item))
    }

    pub fn stop(&self) -> TetherResult<()> {
        self.send(Command::Stop)
    }

    pub fn seek(&self, position: f64) -> TetherResult<()> {
        self.send(Command::Seek(position))
    }

    pub fn skip(&self, delta: f64) -> TetherResult<()> {
        self.send(Command::Skip(delta))
    }

    pub fn toggle_play(&self) -> TetherResult<()> {
        self.send(Command::TogglePlay)
    }

    /// Entry point for surface implementations.
    pub fn signal(&self, token: LoadToken, signal: Signal) -> TetherResult<()> {
        self.send(Command::Signal(token, signal))
    }

    pub fn shutdown(&self) -> TetherResult<()> {
        self.send(Command::Shutdown)
    }

    pub fn state(&self) -> PlayerState {
        self.state.borrow().clone()
    }

    /// Waits for the next published state.
    pub async fn changed(&mut self) -> TetherResult<PlayerState> {
        self.state
            .changed()
            .await
            .map_err(|_| TetherError::PlayerClosed)?;
        Ok(self.state.borrow_and_update().clone())
    }
}

pub struct Player<S, A> {
    controller: Controller<S>,
    api: Arc<A>,
    config: ContinuityConfig,

    commands: mpsc::UnboundedReceiver<Command>,
    completions: mpsc::UnboundedReceiver<(PlaybackId, Completion)>,
    completion_sender: mpsc::UnboundedSender<(PlaybackId, Completion)>,
    state: watch::Sender<PlayerState>,
    advance_to: Option<String>,
}

impl<S, A> Player<S, A>
where
    S: Surface,
    A: RemoteApi,
{
    pub fn new(surface: S, api: A, config: ContinuityConfig) -> (Self, PlayerHandle) {
        let (command_sender, commands) = mpsc::unbounded_channel();
        let (completion_sender, completions) = mpsc::unbounded_channel();
        let (state, state_receiver) = watch::channel(PlayerState::default());

        let player = Self {
            controller: Controller::new(surface, config.clone()),
            api: Arc::new(api),
            config,
            commands,
            completions,
            completion_sender,
            state,
            advance_to: None,
        };
        let handle = PlayerHandle {
            commands: command_sender,
            state: state_receiver,
        };
        (player, handle)
    }

    pub fn controller(&self) -> &Controller<S> {
        &self.controller
    }

    /// Runs until [`Command::Shutdown`] or until every handle is dropped.
    pub async fn run(mut self) {
        let health_interval = self.config.timers.health_interval;
        let mut health = tokio::time::interval(health_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.controller.next_deadline();
            let sleep = tokio::time::sleep_until(
                deadline
                    .map(tokio::time::Instant::from_std)
                    .unwrap_or_else(|| tokio::time::Instant::now() + health_interval),
            );

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some((playback, completion)) = self.completions.recv() => {
                    let (_, effects) = self.controller.settle(Instant::now(), playback, completion);
                    self.execute(effects);
                }
                _ = health.tick() => self.tick(),
                _ = sleep, if deadline.is_some() => self.tick(),
            }

            self.publish();
        }

        let effects = self.controller.stop(Instant::now());
        self.execute(effects);
        self.publish();
        tracing::info!("Player shut down");
    }

    fn on_command(&mut self, command: Command) {
        let now = Instant::now();
        let effects = match command {
            Command::Play(item) => {
                self.advance_to = None;
                self.controller.play(item, now)
            }
            Command::Stop => self.controller.stop(now),
            Command::Seek(position) => self.controller.dispatch(now, Event::Seek(position)).1,
            Command::Skip(delta) => self.controller.dispatch(now, Event::Skip(delta)).1,
            Command::TogglePlay => self.controller.dispatch(now, Event::TogglePlay).1,
            Command::Signal(token, signal) => {
                self.controller
                    .dispatch(now, Event::Signal(token, signal))
                    .1
            }
            Command::Shutdown => Vec::new(),
        };
        self.execute(effects);
    }

    fn tick(&mut self) {
        let (_, effects) = self.controller.dispatch(Instant::now(), Event::Tick);
        self.execute(effects);
    }

    fn publish(&self) {
        let state = PlayerState {
            playback: self.controller.playback(),
            status: self.controller.status(),
            position: self.controller.position(),
            duration: self.controller.duration(),
            session: self
                .controller
                .engine()
                .and_then(|engine| engine.session().session_id())
                .map(str::to_string),
            advance_to: self.advance_to.clone(),
        };
        self.state.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Session(op) => self.spawn_session(op),
                Effect::Probe { source } => {
                    let Some(playback) = self.controller.playback() else {
                        continue;
                    };
                    let api = self.api.clone();
                    let sender = self.completion_sender.clone();
                    tokio::spawn(async move {
                        let result = api.probe(&source).await.map_err(|e| e.to_string());
                        _ = sender.send((playback, Completion::Probe(result)));
                    });
                }
                Effect::SaveProgress(report) => {
                    let api = self.api.clone();
                    tokio::spawn(async move {
                        if let Err(e) = api.save_progress(&report).await {
                            tracing::warn!(
                                item = %report.item_id,
                                error = %e,
                                "Failed to save progress"
                            );
                        }
                    });
                }
                Effect::Status(status) => {
                    tracing::info!(?status, "Playback status");
                }
                Effect::AdvanceToNext { item_id } => {
                    self.advance_to = Some(item_id);
                }
            }
        }
    }

    fn spawn_session(&self, op: SessionOp) {
        let api = self.api.clone();

        if let SessionOp::Stop { session_id } = op {
            // teardown is never awaited by playback
            tokio::spawn(async move {
                if let Err(e) = api.destroy_session(&session_id).await {
                    tracing::warn!(%session_id, error = %e, "Failed to destroy transcode session");
                }
            });
            return;
        }

        let Some(playback) = self.controller.playback() else {
            return;
        };
        let sender = self.completion_sender.clone();
        tokio::spawn(async move {
            let (source, options) = match op {
                SessionOp::Start { source, options } => (source, options),
                SessionOp::Restart {
                    previous,
                    source,
                    options,
                } => {
                    if let Err(e) = api.destroy_session(&previous).await {
                        tracing::warn!(
                            session_id = %previous,
                            error = %e,
                            "Failed to destroy transcode session"
                        );
                    }
                    (source, options)
                }
                SessionOp::Stop { .. } => return,
            };
            let result = api
                .create_session(&source, &options)
                .await
                .map_err(|e| e.to_string());
            _ = sender.send((playback, Completion::Session(result)));
        });
    }
}
