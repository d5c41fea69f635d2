use std::ops::Deref;

use reqwest::{Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    api::{MediaInfo, ProbeApi, ProgressApi, TranscodeApi},
    error::{TetherError, TetherResult},
    progress::ProgressReport,
    session::{SessionHandle, SessionOptions},
};

#[derive(Clone, Default)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> TetherResult<Self> {
        Ok(Self {
            client: builder.build()?,
        })
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    url: &'a str,
    options: &'a SessionOptions,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    session_id: Option<String>,
    manifest_url: Option<String>,
}

/// The dashboard backend: `POST /transcode`, `DELETE /transcode/{id}`,
/// `GET /probe?url=`, `POST /progress`, all relative to one base URL.
#[derive(Clone)]
pub struct HttpApi {
    client: HttpClient,
    base: Url,
}

impl HttpApi {
    pub fn new(client: HttpClient, mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { client, base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> TetherResult<Url> {
        Ok(self.base.join(path)?)
    }
}

impl TranscodeApi for HttpApi {
    async fn create_session(
        &self,
        source: &Url,
        options: &SessionOptions,
    ) -> TetherResult<SessionHandle> {
        log::info!(
            "Requesting transcode session for {source} at offset {}s.",
            options.seek_offset
        );

        let response = self
            .client
            .post(self.endpoint("transcode")?)
            .json(&CreateSessionRequest {
                url: source.as_str(),
                options,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            log::warn!("Transcode session request failed: {}", response.status());
            return Err(TetherError::HttpError(response.status()));
        }

        let body: CreateSessionResponse = serde_json::from_slice(&response.bytes().await?)?;
        let session_id = body
            .session_id
            .filter(|id| !id.is_empty())
            .ok_or(TetherError::InvalidSessionResponse("sessionId"))?;
        let manifest_url = body
            .manifest_url
            .ok_or(TetherError::InvalidSessionResponse("manifestUrl"))?;
        // the backend may answer with a path relative to itself
        let manifest_url = self.base.join(&manifest_url)?;

        log::info!("Transcode session {session_id} ready: {manifest_url}");
        Ok(SessionHandle {
            session_id,
            manifest_url,
        })
    }

    async fn destroy_session(&self, session_id: &str) -> TetherResult<()> {
        let url = self.endpoint(&format!("transcode/{session_id}"))?;
        let response = self.client.delete(url).send().await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            // already reaped by the backend
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                log::debug!("Transcode session {session_id} was already gone.");
                Ok(())
            }
            status => Err(TetherError::HttpError(status)),
        }
    }
}

impl ProbeApi for HttpApi {
    async fn probe(&self, source: &Url) -> TetherResult<MediaInfo> {
        let mut url = self.endpoint("probe")?;
        url.query_pairs_mut().append_pair("url", source.as_str());

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(TetherError::HttpError(response.status()));
        }
        Ok(serde_json::from_slice(&response.bytes().await?)?)
    }
}

impl ProgressApi for HttpApi {
    async fn save_progress(&self, report: &ProgressReport) -> TetherResult<()> {
        let response = self
            .client
            .post(self.endpoint("progress")?)
            .json(report)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TetherError::HttpError(response.status()));
        }
        Ok(())
    }
}
