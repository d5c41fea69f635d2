//! A headless playback surface: media time advances with the wall clock and
//! signals are delivered through the player handle.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tether::{
    surface::{QualityState, ReadyState, TimeRange},
    LoadToken, PlayerHandle, Signal, Surface,
};
use url::Url;

/// Seconds of media the simulated network keeps ahead of the playhead.
const READ_AHEAD: f64 = 30.;

#[derive(Debug)]
struct SimState {
    loaded: Option<(Url, LoadToken)>,
    length: f64,
    time: f64,
    rate: f64,
    paused: bool,
    ended: bool,
    level: usize,
    pending: Vec<(LoadToken, Signal)>,
}

impl SimState {
    fn emit(&mut self, signal: Signal) {
        if let Some((_, token)) = &self.loaded {
            self.pending.push((*token, signal));
        }
    }
}

#[derive(Clone)]
pub struct SimSurface {
    state: Arc<Mutex<SimState>>,
}

impl SimSurface {
    /// Every manifest attached to this surface is `length` seconds long.
    pub fn new(length: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                loaded: None,
                length,
                time: 0.,
                rate: 1.,
                paused: true,
                ended: false,
                level: 3,
                pending: Vec::new(),
            })),
        }
    }

    /// Advances media time by `elapsed` and collects the signals to deliver.
    fn advance(&self, elapsed: Duration) -> Vec<(LoadToken, Signal)> {
        let mut state = self.state.lock();
        if state.loaded.is_some() && !state.paused && !state.ended {
            state.time = (state.time + elapsed.as_secs_f64() * state.rate).min(state.length);
            state.emit(Signal::TimeUpdate);
            if state.time >= state.length {
                state.ended = true;
                state.paused = true;
                state.emit(Signal::Ended);
            }
        }
        std::mem::take(&mut state.pending)
    }
}

impl Surface for SimSurface {
    fn attach(&mut self, manifest: &Url, token: LoadToken) {
        let mut state = self.state.lock();
        log::info!("Attaching {manifest} ({token})");
        state.loaded = Some((manifest.clone(), token));
        state.time = 0.;
        state.ended = false;
        state.emit(Signal::MetadataLoaded);
    }

    fn detach(&mut self) {
        let mut state = self.state.lock();
        state.loaded = None;
        state.pending.clear();
    }

    fn current_time(&self) -> f64 {
        self.state.lock().time
    }

    fn set_current_time(&mut self, seconds: f64) {
        let mut state = self.state.lock();
        state.emit(Signal::Seeking);
        state.time = seconds.clamp(0., state.length);
        state.ended = false;
        state.emit(Signal::Seeked);
    }

    fn duration(&self) -> Option<f64> {
        let state = self.state.lock();
        state.loaded.as_ref().map(|_| state.length)
    }

    fn buffered(&self) -> Vec<TimeRange> {
        let state = self.state.lock();
        match state.loaded {
            Some(_) => vec![TimeRange::new(
                state.time,
                (state.time + READ_AHEAD).min(state.length),
            )],
            None => Vec::new(),
        }
    }

    fn playback_rate(&self) -> f64 {
        self.state.lock().rate
    }

    fn set_playback_rate(&mut self, rate: f64) {
        let mut state = self.state.lock();
        state.rate = rate;
        state.emit(Signal::RateChange);
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn is_seeking(&self) -> bool {
        false
    }

    fn ready_state(&self) -> ReadyState {
        match self.state.lock().loaded {
            Some(_) => ReadyState::EnoughData,
            None => ReadyState::Nothing,
        }
    }

    fn play(&mut self) {
        let mut state = self.state.lock();
        if state.paused {
            state.paused = false;
            state.emit(Signal::Playing);
        }
    }

    fn pause(&mut self) {
        let mut state = self.state.lock();
        if !state.paused {
            state.paused = true;
            state.emit(Signal::Paused);
        }
    }

    fn recover_media_error(&mut self) {
        log::debug!("Simulated media recovery");
    }

    fn reload_from(&mut self, seconds: f64) {
        log::debug!("Simulated reload from {seconds:.1}s");
    }

    fn quality(&self) -> QualityState {
        QualityState {
            auto: true,
            current: Some(self.state.lock().level),
        }
    }

    fn force_level(&mut self, level: usize) {
        self.state.lock().level = level;
    }
}

/// Feeds surface signals to the player until it shuts down.
pub async fn drive(surface: SimSurface, handle: PlayerHandle, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        for (token, signal) in surface.advance(tick) {
            if handle.signal(token, signal).is_err() {
                return;
            }
        }
    }
}
