//! Remote transcode session lifecycle.
//!
//! The manager never performs I/O itself. It hands out [`SessionOp`]s for
//! the runtime to execute and is told about their outcome through
//! [`SessionManager::complete`]. At most one start/restart is in flight.

use std::{fmt, time::Instant};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    config::SessionConfig,
    error::{TetherError, TetherResult},
    surface::{ErrorKind, PlaybackError},
};

/// Parameters forwarded verbatim to the transcode backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    #[serde(default)]
    pub seek_offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    /// Backend specific keys we know nothing about.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SessionOptions {
    pub fn with_seek_offset(&self, seek_offset: u64) -> Self {
        Self {
            seek_offset,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub session_id: String,
    pub manifest_url: Url,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionDescriptor {
    /// `None` means direct playback.
    pub session_id: Option<String>,
    pub options: SessionOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// The stall ladder ran out of lighter remedies.
    Stall,
    /// A manifest from a superseded session failed.
    StaleManifest,
    /// The backend no longer knows the session (404/410).
    ManifestExpired,
    /// Manifest load failed without a usable status.
    ManifestUnavailable,
    NetworkError,
    MediaError,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RestartReason::Stall => "stall",
            RestartReason::StaleManifest => "stale manifest",
            RestartReason::ManifestExpired => "manifest expired",
            RestartReason::ManifestUnavailable => "manifest unavailable",
            RestartReason::NetworkError => "network error",
            RestartReason::MediaError => "media error",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionPurpose {
    Initial,
    /// User seek that the loaded manifest could not satisfy.
    Reseek { target: f64 },
    Restart(RestartReason),
}

/// Network work requested by the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOp {
    Start {
        source: Url,
        options: SessionOptions,
    },
    /// Stop `previous`, then start a new session.
    Restart {
        previous: String,
        source: Url,
        options: SessionOptions,
    },
    Stop {
        session_id: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Started {
        purpose: SessionPurpose,
        manifest_url: Url,
        base_offset: f64,
    },
    /// Session creation failed, the source is played directly.
    Direct { url: Url },
    /// A restart or reseek failed; the caller keeps its current state.
    Failed { purpose: SessionPurpose },
    /// Nothing was in flight.
    Unexpected,
}

/// What to do about a fatal surface error.
#[derive(Debug, Clone, PartialEq)]
pub enum FatalAction {
    Restart(RestartReason),
    /// Retry the direct source through the configured proxy.
    ProxyRetry(Url),
    RecoverMedia,
    Reinitialize,
    /// Refers to a load that is no longer relevant.
    Ignore,
    Fail,
}

#[derive(Debug)]
pub struct SessionManager {
    config: SessionConfig,
    source: Url,
    /// `None` when the item is played directly.
    requested: Option<SessionOptions>,

    descriptor: SessionDescriptor,
    in_flight: Option<(SessionPurpose, SessionOptions)>,
    last_restart_at: Option<Instant>,
    resolved_url: Option<Url>,

    proxy_attempted: bool,
    media_recovery_attempted: bool,
    reinit_attempted: bool,
}

impl SessionManager {
    pub fn new(config: SessionConfig, source: Url, options: Option<SessionOptions>) -> Self {
        Self {
            config,
            source,
            requested: options,
            descriptor: SessionDescriptor::default(),
            in_flight: None,
            last_restart_at: None,
            resolved_url: None,
            proxy_attempted: false,
            media_recovery_attempted: false,
            reinit_attempted: false,
        }
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    pub fn descriptor(&self) -> &SessionDescriptor {
        &self.descriptor
    }

    pub fn session_id(&self) -> Option<&str> {
        self.descriptor.session_id.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.descriptor.session_id.is_some()
    }

    pub fn in_flight(&self) -> Option<SessionPurpose> {
        self.in_flight.as_ref().map(|(purpose, _)| *purpose)
    }

    /// The URL the surface was last attached to.
    pub fn resolved_url(&self) -> Option<&Url> {
        self.resolved_url.as_ref()
    }

    /// First step of a new item: either a session request or direct playback.
    pub fn begin(&mut self) -> Option<SessionOp> {
        match self.requested.clone() {
            Some(options) => {
                self.in_flight = Some((SessionPurpose::Initial, options.clone()));
                Some(SessionOp::Start {
                    source: self.source.clone(),
                    options,
                })
            }
            None => {
                self.resolved_url = Some(self.source.clone());
                None
            }
        }
    }

    /// New session starting at `target`. Dropped while another request is in flight.
    pub fn request_reseek(&mut self, now: Instant, target: f64) -> Option<SessionOp> {
        if let Some((purpose, _)) = &self.in_flight {
            tracing::debug!(?purpose, target, "Session request in flight, dropping reseek");
            return None;
        }
        let previous = self.descriptor.session_id.clone()?;

        let options = self.descriptor.options.with_seek_offset(target.floor() as u64);
        self.in_flight = Some((SessionPurpose::Reseek { target }, options.clone()));
        self.last_restart_at = Some(now);
        Some(SessionOp::Restart {
            previous,
            source: self.source.clone(),
            options,
        })
    }

    /// Replaces the current session with one starting at `absolute_time`.
    pub fn request_restart(
        &mut self,
        now: Instant,
        reason: RestartReason,
        absolute_time: f64,
    ) -> Option<SessionOp> {
        if self.in_flight.is_some() {
            tracing::debug!(%reason, "Session request in flight, ignoring restart");
            return None;
        }
        if let Some(at) = self.last_restart_at {
            if now.saturating_duration_since(at) < self.config.restart_cooldown {
                tracing::debug!(%reason, "Session restarted too recently, ignoring");
                return None;
            }
        }
        let previous = self.descriptor.session_id.clone()?;

        tracing::info!(
            %reason,
            session_id = %previous,
            position = absolute_time,
            "Restarting transcode session"
        );
        let options = self
            .descriptor
            .options
            .with_seek_offset(absolute_time.max(0.).floor() as u64);
        self.in_flight = Some((SessionPurpose::Restart(reason), options.clone()));
        self.last_restart_at = Some(now);
        Some(SessionOp::Restart {
            previous,
            source: self.source.clone(),
            options,
        })
    }

    /// Applies the result of the last [`SessionOp::Start`] or [`SessionOp::Restart`].
    pub fn complete(&mut self, result: Result<SessionHandle, String>) -> SessionOutcome {
        let Some((purpose, options)) = self.in_flight.take() else {
            return SessionOutcome::Unexpected;
        };

        match result {
            Ok(handle) => {
                tracing::info!(
                    session_id = %handle.session_id,
                    seek_offset = options.seek_offset,
                    ?purpose,
                    "Transcode session ready"
                );
                let base_offset = options.seek_offset as f64;
                self.descriptor = SessionDescriptor {
                    session_id: Some(handle.session_id),
                    options,
                };
                self.resolved_url = Some(handle.manifest_url.clone());
                SessionOutcome::Started {
                    purpose,
                    manifest_url: handle.manifest_url,
                    base_offset,
                }
            }
            Err(error) if purpose == SessionPurpose::Initial => {
                tracing::warn!(
                    %error,
                    "Failed to start transcode session, playing source directly"
                );
                self.descriptor = SessionDescriptor::default();
                self.resolved_url = Some(self.source.clone());
                SessionOutcome::Direct {
                    url: self.source.clone(),
                }
            }
            Err(error) => {
                tracing::warn!(%error, ?purpose, "Transcode session request failed");
                SessionOutcome::Failed { purpose }
            }
        }
    }

    /// Forgets the current session. Idempotent.
    pub fn stop(&mut self) -> Option<SessionOp> {
        self.in_flight = None;
        self.descriptor
            .session_id
            .take()
            .map(|session_id| SessionOp::Stop { session_id })
    }

    /// Playback moved again, earlier remedies may be tried anew.
    pub fn note_healthy(&mut self) {
        self.media_recovery_attempted = false;
        self.reinit_attempted = false;
    }

    pub(crate) fn set_resolved_url(&mut self, url: Url) {
        self.resolved_url = Some(url);
    }

    pub fn proxy_url(&self) -> TetherResult<Option<Url>> {
        let Some(template) = &self.config.proxy_template else {
            return Ok(None);
        };
        if !template.contains("{url}") {
            return Err(TetherError::InvalidProxyTemplate(template.clone()));
        }
        let encoded: String =
            url::form_urlencoded::byte_serialize(self.source.as_str().as_bytes()).collect();
        Ok(Some(Url::parse(&template.replace("{url}", &encoded))?))
    }

    pub fn classify(&mut self, error: &PlaybackError) -> FatalAction {
        let expired = matches!(error.status, Some(404 | 410));
        let embedded = error
            .url
            .as_ref()
            .and_then(|url| embedded_session_id(url, &self.config.session_path_marker));

        if let Some(embedded) = embedded {
            match self.descriptor.session_id.as_deref() {
                Some(current) if current != embedded => {
                    return FatalAction::Restart(RestartReason::StaleManifest)
                }
                Some(_) if expired => return FatalAction::Restart(RestartReason::ManifestExpired),
                Some(_) => {}
                None => return FatalAction::Ignore,
            }
        }

        if self.is_active() {
            if error.detail.is_manifest_load() {
                match error.status {
                    None => return FatalAction::Restart(RestartReason::ManifestUnavailable),
                    Some(_) if expired => {
                        return FatalAction::Restart(RestartReason::ManifestExpired)
                    }
                    Some(_) => {}
                }
            }
            return match error.kind {
                ErrorKind::Network => FatalAction::Restart(RestartReason::NetworkError),
                ErrorKind::Media if !self.media_recovery_attempted => {
                    self.media_recovery_attempted = true;
                    FatalAction::RecoverMedia
                }
                ErrorKind::Media => FatalAction::Restart(RestartReason::MediaError),
                ErrorKind::Other => FatalAction::Fail,
            };
        }

        match error.kind {
            ErrorKind::Network if !self.proxy_attempted => {
                self.proxy_attempted = true;
                match self.proxy_url() {
                    Ok(Some(url)) => FatalAction::ProxyRetry(url),
                    Ok(None) => FatalAction::Fail,
                    Err(e) => {
                        tracing::warn!(error = %e, "Proxy fallback unavailable");
                        FatalAction::Fail
                    }
                }
            }
            ErrorKind::Media if !self.media_recovery_attempted => {
                self.media_recovery_attempted = true;
                FatalAction::RecoverMedia
            }
            ErrorKind::Media if !self.reinit_attempted => {
                self.reinit_attempted = true;
                FatalAction::Reinitialize
            }
            _ => FatalAction::Fail,
        }
    }
}

/// Session id carried by a transcode manifest URL: the path segment after
/// `marker`, or a `session`/`sessionId` query parameter.
pub fn embedded_session_id(url: &Url, marker: &str) -> Option<String> {
    let from_path = url.path_segments().and_then(|mut segments| {
        segments
            .by_ref()
            .find(|segment| *segment == marker)
            .and_then(|_| segments.next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    });

    from_path.or_else(|| {
        url.query_pairs()
            .find(|(key, _)| key == "session" || key == "sessionId")
            .map(|(_, value)| value.into_owned())
    })
}
