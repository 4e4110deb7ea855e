use anyhow::{Context, Result};
use tracing::info;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let config = bastion_common::config::load(&cli.config).context("loading config")?;
    let store = bastion_store::Store::open(&config.db_path()).context("opening store")?;

    let result = bastion_store::seed_demo_data(&store).context("seeding demo data")?;
    info!(admin_username = %result.admin_username, "seeded demo data");
    println!("admin username: {}", result.admin_username);
    println!("admin password: {}", result.admin_password);
    println!("(this password is shown once; it is not recoverable)");
    Ok(())
}
