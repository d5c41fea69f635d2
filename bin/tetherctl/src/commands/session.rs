use clap::{Parser, Subcommand};
use clap_handler::{handler, Handler};
use tether::TranscodeApi;
use url::Url;

use super::{ApiOptions, TranscodeOptions};

/// Manage transcode sessions by hand
#[derive(Parser, Clone, Handler)]
#[clap(name = "session")]
pub struct SessionCommand {
    #[clap(subcommand)]
    command: SessionSubcommand,
}

#[derive(Subcommand, Clone, Handler)]
pub enum SessionSubcommand {
    Start(StartCommand),
    Stop(StopCommand),
}

#[derive(Parser, Clone, Debug)]
#[clap(name = "start")]
pub struct StartCommand {
    #[clap(flatten)]
    pub api: ApiOptions,

    #[clap(flatten)]
    pub transcode: TranscodeOptions,

    /// Absolute second the session starts at
    #[clap(long, default_value = "0")]
    pub offset: u64,

    pub url: Url,
}

#[handler(StartCommand)]
async fn handle_start(this: StartCommand) -> anyhow::Result<()> {
    let (_, api) = this.api.connect()?;
    let options = this.transcode.into_options().with_seek_offset(this.offset);
    let handle = api.create_session(&this.url, &options).await?;

    println!("{}\t{}", handle.session_id, handle.manifest_url);
    Ok(())
}

#[derive(Parser, Clone, Debug)]
#[clap(name = "stop")]
pub struct StopCommand {
    #[clap(flatten)]
    pub api: ApiOptions,

    pub session_id: String,
}

#[handler(StopCommand)]
async fn handle_stop(this: StopCommand) -> anyhow::Result<()> {
    let (_, api) = this.api.connect()?;
    api.destroy_session(&this.session_id).await?;
    log::info!("Session {} stopped.", this.session_id);

    Ok(())
}
