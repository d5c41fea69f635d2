use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;
use clap::{Args, Subcommand};
use clap_handler::Handler;
use fake_user_agent::get_chrome_rua;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client,
};
use tether::{HttpApi, HttpClient, SessionOptions};
use url::Url;

use crate::config::Config;

mod probe;
mod session;
mod watch;

#[derive(Subcommand, Clone, Handler)]
pub enum TetherCommand {
    Probe(probe::ProbeCommand),
    Session(session::SessionCommand),
    Watch(watch::WatchCommand),
}

#[derive(Args, Clone, Debug)]
pub struct ApiOptions {
    /// Configuration file, defaults to ./tether.toml when present
    #[clap(short, long, env = "TETHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base URL of the transcode backend, overrides the configuration file
    #[clap(long, env = "TETHER_API")]
    pub api: Option<Url>,

    /// Additional HTTP headers
    #[clap(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// HTTP timeout, in seconds
    #[clap(short, long, default_value = "10")]
    pub timeout: u64,
}

impl ApiOptions {
    pub fn connect(&self) -> anyhow::Result<(Config, HttpApi)> {
        let config = Config::load(self.config.as_deref())?;
        let base = self
            .api
            .clone()
            .or_else(|| config.api.base_url.clone())
            .context("No API base URL, pass --api or set api.base_url")?;

        let mut headers = HeaderMap::new();
        for header in &self.headers {
            let (key, value) = header
                .split_once(':')
                .with_context(|| format!("Invalid header: {header}"))?;
            headers.insert(HeaderName::from_str(key.trim())?, HeaderValue::from_str(value.trim())?);
        }

        let client = HttpClient::new(
            Client::builder()
                .default_headers(headers)
                .user_agent(get_chrome_rua())
                .timeout(Duration::from_secs(self.timeout)),
        )?;
        Ok((config, HttpApi::new(client, base)))
    }
}

#[derive(Args, Clone, Debug, Default)]
pub struct TranscodeOptions {
    /// Video handling requested from the backend, e.g. `copy` or `transcode`
    #[clap(long)]
    pub video_mode: Option<String>,

    #[clap(long)]
    pub video_codec: Option<String>,

    #[clap(long)]
    pub audio_codec: Option<String>,
}

impl TranscodeOptions {
    pub fn into_options(self) -> SessionOptions {
        SessionOptions {
            video_mode: self.video_mode,
            video_codec: self.video_codec,
            audio_codec: self.audio_codec,
            ..Default::default()
        }
    }
}
