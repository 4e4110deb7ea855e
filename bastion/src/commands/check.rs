use anyhow::{Context, Result};
use tracing::info;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    bastion_common::config::load(&cli.config).context("loading config")?;
    info!("no problems found");
    Ok(())
}
