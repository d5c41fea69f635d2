use clap::Parser;
use clap_handler::handler;
use tether::ProbeApi;
use url::Url;

use super::ApiOptions;

#[derive(Parser, Clone, Debug)]
#[clap(name = "probe")]
pub struct ProbeCommand {
    #[clap(flatten)]
    pub api: ApiOptions,

    /// Source to inspect
    pub url: Url,
}

#[handler(ProbeCommand)]
async fn handle_probe(this: ProbeCommand) -> anyhow::Result<()> {
    let (_, api) = this.api.connect()?;
    let info = api.probe(&this.url).await?;
    println!("{}", serde_json::to_string_pretty(&info)?);

    Ok(())
}
