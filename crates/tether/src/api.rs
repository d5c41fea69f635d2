//! Remote collaborators: transcode sessions, metadata probe, progress store.

use std::future::Future;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::TetherResult,
    progress::ProgressReport,
    session::{SessionHandle, SessionOptions},
};

pub mod http;

pub use http::{HttpApi, HttpClient};

/// Result of a metadata probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub video_codec: Option<String>,
    #[serde(default)]
    pub audio_codec: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub trait TranscodeApi {
    fn create_session(
        &self,
        source: &Url,
        options: &SessionOptions,
    ) -> impl Future<Output = TetherResult<SessionHandle>> + Send;

    fn destroy_session(&self, session_id: &str) -> impl Future<Output = TetherResult<()>> + Send;
}

pub trait ProbeApi {
    fn probe(&self, source: &Url) -> impl Future<Output = TetherResult<MediaInfo>> + Send;
}

pub trait ProgressApi {
    fn save_progress(
        &self,
        report: &ProgressReport,
    ) -> impl Future<Output = TetherResult<()>> + Send;
}

/// Everything the [`Player`](crate::player::Player) talks to.
pub trait RemoteApi: TranscodeApi + ProbeApi + ProgressApi + Send + Sync + 'static {}

impl<T> RemoteApi for T where T: TranscodeApi + ProbeApi + ProgressApi + Send + Sync + 'static {}
