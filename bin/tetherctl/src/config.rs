use std::path::Path;

use serde::{Deserialize, Serialize};
use tether::config::ContinuityConfig;
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub continuity: ContinuityConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Dashboard backend serving `/transcode`, `/probe` and `/progress`.
    pub base_url: Option<Url>,
    /// Proxy used when the direct source is unreachable, `{url}` is replaced
    /// by the percent-encoded source.
    pub proxy_template: Option<String>,
}

impl Config {
    /// Reads `path`, or `tether.toml` in the working directory if it exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => path,
            None if Path::new("tether.toml").exists() => Path::new("tether.toml"),
            None => return Ok(Self::default()),
        };
        let data = std::fs::read_to_string(file)?;
        let mut config: Config = toml::from_str(&data)?;

        if config.api.proxy_template.is_some() {
            config.continuity.session.proxy_template = config.api.proxy_template.clone();
        }
        log::debug!("Loaded configuration from {}", file.display());
        Ok(config)
    }
}
