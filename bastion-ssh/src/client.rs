//! Outbound SSH dialer (spec.md §4.5), grounded in this codebase's
//! `client/mod.rs` `RemoteClient`/`ClientHandler` split: a thin
//! `russh::client::Handler` for the protocol-level callbacks, and a
//! connect routine that assembles auth methods in the order the asset's
//! system user allows. The passphrase-then-plain key parse and the
//! keyboard-interactive fallback mirror `srvconn/ssh.go`'s
//! `AuthMethods()` in this retrieval pack's original source.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bastion_common::model::SystemUser;
use bytes::Bytes;
use russh::client::{Handle, Handler, KeyboardInteractiveAuthResponse, Msg};
use russh::keys::PrivateKey;
use russh::{Channel, ChannelId, Pty};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{classify_dial_error, SshError};

/// Host key verification is intentionally not performed: spec.md §9 flags
/// this as an open question (the original never verifies outbound host
/// keys either) rather than something silently hardened here. A
/// known_hosts-backed `ClientHandler` would replace this if the decision
/// changes; see DESIGN.md.
struct InsecureHandler;

#[async_trait]
impl Handler for InsecureHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &russh::keys::PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Parses `raw` as a private key, trying `passphrase`-based decryption
/// first when a passphrase is configured and falling back to a plain
/// parse — matching `AuthMethods()`'s "try with passphrase, then without"
/// order rather than giving up the moment the passphrase guess is wrong.
fn parse_private_key(raw: &str, passphrase: Option<&str>) -> Result<PrivateKey, russh::keys::Error> {
    let key = PrivateKey::from_openssh(raw)?;
    if let Some(passphrase) = passphrase {
        if key.is_encrypted() {
            if let Ok(decrypted) = key.clone().decrypt(passphrase.as_bytes()) {
                return Ok(decrypted);
            }
        }
    }
    Ok(key)
}

/// Answers every keyboard-interactive prompt with `password`, matching
/// the original's behavior when no explicit keyboard-interactive
/// responder is configured: assume the server is asking for the same
/// password again.
async fn authenticate_keyboard_interactive(
    handle: &mut Handle<InsecureHandler>,
    username: &str,
    password: &str,
) -> Result<bool, russh::Error> {
    let mut response = handle
        .authenticate_keyboard_interactive_start(username, None)
        .await?;
    loop {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure => return Ok(false),
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                let answers = vec![password.to_string(); prompts.len()];
                response = handle.authenticate_keyboard_interactive_respond(answers).await?;
            }
        }
    }
}

/// One outbound connection to an asset, reused across sessions per
/// spec.md §4.4's [`reuse_allowed`](bastion_core::client_cache::reuse_allowed)
/// predicate.
pub struct Dialer {
    handle: Mutex<Handle<InsecureHandler>>,
}

impl Dialer {
    /// Dials `addr` and authenticates as `sys_user`, trying publickey
    /// (passphrase-protected key first, then a plain parse), then
    /// password, then keyboard-interactive answering every prompt with
    /// the password, matching spec.md §4.5's auth-method assembly order.
    pub async fn connect(addr: SocketAddr, sys_user: &SystemUser) -> Result<Self, SshError> {
        let config = Arc::new(russh::client::Config::default());
        info!(%addr, username = %sys_user.username, "dialing asset");

        let mut handle = russh::client::connect(config, addr, InsecureHandler)
            .await
            .map_err(|err| SshError::Dial(classify_dial_error(&err.to_string())))?;

        let mut authenticated = false;

        if let Some(private_key) = &sys_user.private_key {
            match parse_private_key(private_key, sys_user.passphrase.as_deref()) {
                Ok(key) => {
                    let result = handle
                        .authenticate_publickey(&sys_user.username, Arc::new(key))
                        .await
                        .map_err(|err| SshError::Dial(classify_dial_error(&err.to_string())))?;
                    authenticated = result.success();
                }
                Err(err) => warn!(%err, "system user private key did not parse, falling back"),
            }
        }

        if !authenticated {
            if let Some(password) = &sys_user.password {
                let result = handle
                    .authenticate_password(&sys_user.username, password)
                    .await
                    .map_err(|err| SshError::Dial(classify_dial_error(&err.to_string())))?;
                authenticated = result.success();
            }
        }

        if !authenticated {
            if let Some(password) = &sys_user.password {
                authenticated = authenticate_keyboard_interactive(&mut handle, &sys_user.username, password)
                    .await
                    .map_err(|err| SshError::Dial(classify_dial_error(&err.to_string())))?;
            }
        }

        if !authenticated {
            return Err(SshError::Dial("Authentication failed".into()));
        }

        debug!(username = %sys_user.username, "authenticated to asset");
        Ok(Self {
            handle: Mutex::new(handle),
        })
    }

    /// Opens a pty-backed shell channel for the bridge to drive.
    pub async fn open_shell(&self, cols: u32, rows: u32) -> Result<Channel<Msg>, SshError> {
        let handle = self.handle.lock().await;
        let channel = handle.channel_open_session().await?;
        channel
            .request_pty(false, "xterm-256color", cols, rows, 0, 0, &[] as &[(Pty, u32)])
            .await?;
        channel.request_shell(false).await?;
        Ok(channel)
    }

    pub async fn window_change(&self, channel_id: ChannelId, cols: u32, rows: u32) -> Result<(), SshError> {
        let handle = self.handle.lock().await;
        handle
            .channel_window_change(channel_id, cols, rows, 0, 0)
            .await
            .map_err(SshError::from)
    }

    pub async fn send_data(&self, channel_id: ChannelId, data: Bytes) -> Result<(), SshError> {
        let handle = self.handle.lock().await;
        handle.data(channel_id, data.into()).await.map_err(SshError::from)
    }

    /// Sends an OpenSSH-style `keepalive@openssh.com` global request so
    /// idle-looking connections that are actually still alive don't get
    /// dropped by intermediate NATs/firewalls.
    pub async fn send_keepalive(&self) -> Result<(), SshError> {
        let handle = self.handle.lock().await;
        handle.send_keepalive(true).await.map_err(SshError::from)
    }
}

#[async_trait]
impl bastion_core::client_cache::CacheableClient for Dialer {
    async fn close(&self) {
        let mut handle = self.handle.lock().await;
        let _ = handle.disconnect(russh::Disconnect::ByApplication, "", "").await;
    }
}
