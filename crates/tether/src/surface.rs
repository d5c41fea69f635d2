//! Contract of the decode/render engine the continuity engine drives.
//!
//! A surface plays one manifest at a time. Everything it reports is in
//! *local* coordinates, i.e. relative to the start of whatever manifest is
//! attached; translating to the absolute timeline is the job of
//! [`Timeline`](crate::timeline::Timeline).

use std::fmt;

use url::Url;

/// Identity of one manifest load. Signals captured under an older token are inert.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadToken(u64);

impl LoadToken {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for LoadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Mirrors the HTML media readiness levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Nothing,
    Metadata,
    CurrentData,
    FutureData,
    EnoughData,
}

impl ReadyState {
    /// Below this level the surface cannot advance on its own.
    pub fn is_usable(self) -> bool {
        self >= ReadyState::FutureData
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn shifted(self, offset: f64) -> Self {
        Self::new(self.start + offset, self.end + offset)
    }

    pub fn contains(&self, position: f64, padding: f64) -> bool {
        position >= self.start - padding && position <= self.end + padding
    }
}

/// Seconds of media buffered contiguously after `position`.
pub fn buffered_ahead(ranges: &[TimeRange], position: f64) -> f64 {
    ranges
        .iter()
        .filter(|r| r.start <= position && r.end > position)
        .map(|r| r.end - position)
        .fold(0., f64::max)
}

/// Adaptive quality selection as exposed by the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QualityState {
    pub auto: bool,
    /// Rendition index chosen by the automatic selector, 0 being the lowest.
    pub current: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Media,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetail {
    ManifestLoad,
    LevelLoad,
    FragmentLoad,
    KeyLoad,
    BufferStall,
    Decode,
    Other(String),
}

impl ErrorDetail {
    pub fn is_manifest_load(&self) -> bool {
        matches!(self, ErrorDetail::ManifestLoad | ErrorDetail::LevelLoad)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackError {
    pub kind: ErrorKind,
    pub detail: ErrorDetail,
    pub fatal: bool,
    /// HTTP status of the failing request, when the transport exposes one.
    pub status: Option<u16>,
    /// The resource that failed to load.
    pub url: Option<Url>,
}

impl PlaybackError {
    pub fn new(kind: ErrorKind, detail: ErrorDetail) -> Self {
        Self {
            kind,
            detail,
            fatal: true,
            status: None,
            url: None,
        }
    }

    pub fn non_fatal(mut self) -> Self {
        self.fatal = false;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }
}

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.kind, self.detail)?;
        if let Some(status) = self.status {
            write!(f, " status={status}")?;
        }
        if let Some(url) = &self.url {
            write!(f, " url={url}")?;
        }
        Ok(())
    }
}

/// Notifications emitted by the surface.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    MetadataLoaded,
    TimeUpdate,
    Playing,
    Paused,
    Ended,
    Waiting,
    Stalled,
    /// The adaptive-bitrate layer ran out of buffer.
    BufferStall,
    Seeking,
    Seeked,
    RateChange,
    Error(PlaybackError),
}

pub trait Surface {
    /// Loads a manifest. Signals caused by this load must carry `token`.
    fn attach(&mut self, manifest: &Url, token: LoadToken);

    /// Clears the playback surface.
    fn detach(&mut self);

    fn current_time(&self) -> f64;

    fn set_current_time(&mut self, seconds: f64);

    /// `None` while unknown or unbounded (live).
    fn duration(&self) -> Option<f64>;

    fn buffered(&self) -> Vec<TimeRange>;

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&mut self, rate: f64);

    fn is_paused(&self) -> bool;

    fn is_seeking(&self) -> bool;

    fn ready_state(&self) -> ReadyState;

    fn play(&mut self);

    fn pause(&mut self);

    /// Engine-level media error recovery (decoder flush and re-append).
    fn recover_media_error(&mut self);

    /// Re-requests segments starting at `seconds`.
    fn reload_from(&mut self, seconds: f64);

    fn quality(&self) -> QualityState;

    /// Pins the next rendition to `level`.
    fn force_level(&mut self, level: usize);
}
