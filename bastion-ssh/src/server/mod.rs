//! SSH frontend entry point (spec.md §4.9), grounded in this codebase's
//! `server/mod.rs`: builds the `russh::server::Config` once, then spawns
//! one protocol task per accepted connection.

mod handler;

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bastion_common::config::BastionConfig;
use bastion_common::types::ListenEndpoint;
use russh::keys::{Algorithm, HashAlg};
use russh::{MethodKind, MethodSet, Preferred};
use tracing::{error, info};

pub use handler::{BastionServices, ServerHandler};

use crate::keys::load_or_generate_host_key;

pub async fn run_server(services: Arc<BastionServices>, config: &BastionConfig, endpoint: ListenEndpoint) -> Result<()> {
    let terminal_config = services
        .catalog
        .get_terminal_config()
        .await
        .context("loading terminal config")?;

    let (host_key, generated_pem) = load_or_generate_host_key(&terminal_config)?;
    if let Some(pem) = generated_pem {
        info!("generated a fresh host key, persisting it so it stays stable across restarts");
        let mut updated = terminal_config.clone();
        updated.host_key = pem;
        services
            .catalog
            .set_terminal_config(&updated)
            .await
            .context("persisting generated host key")?;
    }

    let russh_config = Arc::new(russh::server::Config {
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        inactivity_timeout: Some(Duration::from_secs(config.store.ssh.ssh_timeout * 60)),
        keepalive_interval: Some(Duration::from_secs(config.store.ssh.client_alive_interval)),
        methods: MethodSet::from(&[MethodKind::PublicKey, MethodKind::Password, MethodKind::KeyboardInteractive][..]),
        keys: vec![host_key],
        event_buffer_size: 100,
        nodelay: true,
        preferred: Preferred {
            key: Cow::Borrowed(&[
                Algorithm::Ed25519,
                Algorithm::Rsa { hash: Some(HashAlg::Sha512) },
                Algorithm::Rsa { hash: Some(HashAlg::Sha256) },
                Algorithm::Rsa { hash: None },
            ]),
            ..Default::default()
        },
        ..Default::default()
    });

    let listener = endpoint.tcp_listener().await.context("binding listen endpoint")?;
    info!(addr = %endpoint.addr(), "ssh frontend listening");

    loop {
        let (stream, remote_addr) = listener.accept().await.context("accepting connection")?;
        let _ = stream.set_nodelay(true);
        let russh_config = russh_config.clone();
        let handler = ServerHandler::new(services.clone(), remote_addr);

        tokio::task::Builder::new()
            .name(&format!("ssh {remote_addr} protocol"))
            .spawn(async move {
                if let Err(err) = run_stream(russh_config, stream, handler).await {
                    error!(%err, %remote_addr, "session failed");
                }
            })?;
    }
}

async fn run_stream(
    config: Arc<russh::server::Config>,
    socket: tokio::net::TcpStream,
    handler: ServerHandler,
) -> Result<()> {
    let session = russh::server::run_stream(config, socket, handler).await?;
    session.await?;
    Ok(())
}
