//! `bastion run`, grounded in this codebase's `commands/run.rs`: load
//! config, build services, start the frontend, wait on a signal.

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bastion_common::config::watch_config;
use bastion_common::types::ListenEndpoint;
use bastion_core::Services;
use bastion_ssh::server::BastionServices;
use tokio::sync::Mutex;
use tracing::{error, info};

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let config = bastion_common::config::load(&cli.config).context("loading config")?;
    let store = bastion_store::Store::open(&config.db_path()).context("opening store")?;
    let catalog: Arc<dyn bastion_core::Catalog> = Arc::new(store);

    crate::logging::init_with_catalog(cli.verbose, catalog.clone());
    let version = env!("CARGO_PKG_VERSION");
    info!(%version, "bastion starting");

    let config_shared = Arc::new(Mutex::new(config.clone()));
    let services: Arc<BastionServices> = Arc::new(Services::new(config_shared.clone(), catalog.clone()).await);

    let addr = format!("{}:{}", config.store.ssh.bind_host, config.store.ssh.sshd_port)
        .to_socket_addrs()
        .context("resolving bind address")?
        .next()
        .context("bind address did not resolve")?;
    let endpoint = ListenEndpoint(addr);

    tokio::spawn(watch_config(cli.config.clone(), config_shared));

    if console::user_attended() {
        info!("--------------------------------------------");
        info!(%addr, "bastion is now running");
        info!("--------------------------------------------");
    }

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;

    tokio::select! {
        result = bastion_ssh::run_server(services.clone(), &config, endpoint) => {
            if let Err(err) = result {
                tracing::error!(fatal = true, %err, "ssh frontend failed");
                return Err(err).context("ssh frontend failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
        _ = sigterm.recv() => {
            info!("received sigterm, shutting down");
        }
    }

    shutdown(&services).await;
    Ok(())
}

/// Terminates every live Bridge and waits up to 5 seconds for their tasks
/// to notice and finish their current read, per SPEC_FULL.md §6.
async fn shutdown(services: &Arc<BastionServices>) {
    services.sessions.terminate_all("shutdown").await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while services.sessions.len().await > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let remaining = services.sessions.len().await;
    if remaining > 0 {
        error!(remaining, "forcing shutdown with sessions still live");
    }
}
