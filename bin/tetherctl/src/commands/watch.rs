use std::time::Duration;

use clap::Parser;
use clap_handler::handler;
use tether::{PlaybackItem, PlaybackStatus, Player};
use url::Url;

use super::{ApiOptions, TranscodeOptions};
use crate::sim::{self, SimSurface};

const SIM_TICK: Duration = Duration::from_millis(250);

/// Plays a source against a simulated surface and logs what the engine does
#[derive(Parser, Clone, Debug)]
#[clap(name = "watch")]
pub struct WatchCommand {
    #[clap(flatten)]
    pub api: ApiOptions,

    #[clap(flatten)]
    pub transcode: TranscodeOptions,

    /// Play through a transcode session instead of the source itself
    #[clap(long)]
    pub session: bool,

    /// Item id used for progress reports
    #[clap(long, default_value = "tetherctl")]
    pub id: String,

    /// Absolute position to resume from, in seconds
    #[clap(long)]
    pub resume: Option<f64>,

    /// Length of every simulated manifest, in seconds
    #[clap(long, default_value = "600")]
    pub length: f64,

    /// Seek to this absolute position once playback runs
    #[clap(long)]
    pub seek_to: Option<f64>,

    /// Delay before `--seek-to`, in seconds
    #[clap(long, default_value = "5")]
    pub seek_after: f64,

    pub url: Url,
}

impl WatchCommand {
    fn item(&self) -> PlaybackItem {
        let mut item = PlaybackItem::new(self.id.clone(), self.url.clone());
        if self.session {
            item = item.with_transcode(self.transcode.clone().into_options());
        }
        if let Some(position) = self.resume {
            item = item.resume_at(position);
        }
        item
    }
}

#[handler(WatchCommand)]
async fn handle_watch(this: WatchCommand) -> anyhow::Result<()> {
    let (config, api) = this.api.connect()?;

    let surface = SimSurface::new(this.length);
    let (player, mut handle) = Player::new(surface.clone(), api, config.continuity);
    let player = tokio::spawn(player.run());
    let driver = tokio::spawn(sim::drive(surface, handle.clone(), SIM_TICK));

    let control = handle.clone();
    control.play(this.item())?;

    let seek_delay = tokio::time::sleep(Duration::from_secs_f64(this.seek_after.max(0.)));
    tokio::pin!(seek_delay);
    let mut seek_to = this.seek_to;

    loop {
        tokio::select! {
            state = handle.changed() => {
                let state = state?;
                tracing::info!(
                    status = ?state.status,
                    position = state.position,
                    duration = state.duration,
                    session = state.session.as_deref().unwrap_or("-"),
                    "Player state"
                );
                if matches!(state.status, PlaybackStatus::Ended | PlaybackStatus::Failed) {
                    break;
                }
            }
            _ = &mut seek_delay, if seek_to.is_some() => {
                if let Some(target) = seek_to.take() {
                    tracing::info!(target, "Seeking");
                    control.seek(target)?;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    control.shutdown()?;
    player.await?;
    driver.abort();
    Ok(())
}
