//! The `russh::server::Handler` impl (spec.md §4.9 Frontend). Grounded in
//! this codebase's `russh_handler.rs` method shapes, but without its
//! event-channel indirection to a separate session actor: one `Handler`
//! already exists per TCP connection, so it holds the per-connection
//! state (authenticated user, active bridge) directly.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bastion_common::model::{TicketState, User};
use bastion_core::auth_gate::{parse_direct_login, AuthAttempt, AuthOutcome};
use bastion_core::client_cache::reuse_allowed;
use bastion_core::recorder::Recorder;
use bastion_core::Services;
use bytes::Bytes;
use russh::keys::PublicKey;
use russh::server::{Auth, Handle, Msg, Session};
use russh::{Channel, ChannelId, Pty, Sig};
use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bridge::{Bridge, BridgeSink};
use crate::client::Dialer;

pub type BastionBridge = Bridge<HandleSink>;
pub type BastionServices = Services<Dialer, BastionBridge>;

/// Forwards asset output back onto the client-facing `russh` channel.
pub struct HandleSink {
    handle: Handle,
    channel: ChannelId,
}

#[async_trait]
impl BridgeSink for HandleSink {
    async fn connected_success(&self) {
        let _ = self
            .handle
            .data(self.channel, b"\r\nConnected.\r\n"[..].into())
            .await;
    }

    async fn connected_failed(&self, reason: &str) {
        let _ = self
            .handle
            .data(self.channel, format!("\r\nConnection failed: {reason}\r\n").into())
            .await;
    }

    async fn disconnected(&self) {
        let _ = self.handle.eof(self.channel).await;
        let _ = self.handle.close(self.channel).await;
    }

    async fn server_data(&self, data: Bytes) {
        let _ = self.handle.data(self.channel, data[..].into()).await;
    }
}

enum Mode {
    /// Authenticated, channel open, waiting for a shell/pty request.
    AwaitingShell,
    /// A login-confirmation ticket is pending; `Notify` cancels the wait
    /// when the client types `q`/`quit` or disconnects (spec.md §4.3).
    AwaitingApproval(Arc<Notify>),
    /// Bridged to an asset.
    Bridging(Arc<BastionBridge>),
    /// A role-gated admin console (spec.md §6).
    AdminConsole,
}

pub struct ServerHandler {
    pub services: Arc<BastionServices>,
    pub remote_addr: SocketAddr,
    pub user: Option<User>,
    pub session_id: Uuid,
    pub cols: u32,
    pub rows: u32,
    mode: Option<Mode>,
}

impl ServerHandler {
    pub fn new(services: Arc<BastionServices>, remote_addr: SocketAddr) -> Self {
        Self {
            services,
            remote_addr,
            user: None,
            session_id: Uuid::new_v4(),
            cols: 80,
            rows: 24,
            mode: None,
        }
    }

    async fn dispatch_direct_login(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
        user: &str,
        sysuser: &str,
        asset_name: &str,
    ) -> Result<()> {
        let current_user = self.user.clone().ok_or_else(|| anyhow!("not authenticated"))?;
        let catalog = self.services.catalog.clone();

        let asset = catalog.get_asset_by_name(asset_name).await?;
        let sys_users = catalog
            .get_system_users_for_permission(current_user.id, asset.id)
            .await?;
        let sys_user = sys_users
            .into_iter()
            .find(|s| s.username == sysuser)
            .ok_or_else(|| anyhow!("no permission for {sysuser}@{asset_name}"))?;

        let needs_confirm = catalog.needs_login_confirm(current_user.id, asset.id).await?;
        if needs_confirm {
            let machine = bastion_core::ticket_machine::TicketMachine::new(&*catalog);
            if let Some((ticket_id, _reviewers)) = machine
                .check_is_needed(current_user.id, asset.id, user, asset_name, sysuser)
                .await?
            {
                session
                    .data(channel_id, b"\r\nWaiting for approval, type q to cancel...\r\n"[..].into())
                    .ok();

                let cancel = Arc::new(Notify::new());
                self.mode = Some(Mode::AwaitingApproval(cancel.clone()));
                let outcome = machine.wait(ticket_id, cancel.notified()).await;
                self.mode = Some(Mode::AwaitingShell);

                match outcome {
                    bastion_core::ticket_machine::WaitOutcome::Approve { .. } => {}
                    bastion_core::ticket_machine::WaitOutcome::Reject { .. } => {
                        session
                            .data(channel_id, b"\r\nLogin request was not approved.\r\n"[..].into())
                            .ok();
                        return Ok(());
                    }
                    bastion_core::ticket_machine::WaitOutcome::Cancel => {
                        session
                            .data(channel_id, b"\r\nLogin request cancelled.\r\n"[..].into())
                            .ok();
                        return Ok(());
                    }
                }
            }
        }

        let config = self.services.config.lock().await.clone();
        let key = bastion_common::model::ClientKey::new(current_user.id, asset.id, sys_user.id, asset.ip, sysuser);
        let reuse = reuse_allowed(config.store.client_cache.reuse_connection, &asset.platform, &sys_user.protocol);

        let entry = if reuse {
            self.services.client_cache.lookup(key.clone()).await
        } else {
            None
        };

        let dialer = match entry {
            Some(entry) => {
                entry.acquire();
                entry.client.clone()
            }
            None => {
                let addr = std::net::SocketAddr::new(asset.ip, asset.protocol_port(&sys_user.protocol));
                let dialer = Arc::new(Dialer::connect(addr, &sys_user).await?);
                let entry = self.services.client_cache.store(key, dialer.clone()).await;
                if let Some(entry) = entry {
                    entry.acquire();
                }
                dialer
            }
        };

        let recorder = if config.store.recordings.disable_recorder {
            Recorder::disabled()
        } else {
            Recorder::start(
                &config.replay_path(),
                &current_user.username,
                asset_name,
                self.session_id,
                self.cols,
                self.rows,
            )
        };

        let sink = Arc::new(HandleSink {
            handle: session.handle(),
            channel: channel_id,
        });

        let terminal_config = catalog.get_terminal_config().await?;
        let bridge = Bridge::start(
            dialer,
            sink,
            recorder,
            catalog.clone(),
            current_user.id,
            asset.id,
            std::time::Duration::from_secs(terminal_config.max_idle_time * 60),
            std::time::Duration::from_secs(config.store.ssh.client_alive_interval),
            self.cols,
            self.rows,
        )
        .await?;

        self.services.sessions.add(self.session_id, bridge.clone()).await;
        self.mode = Some(Mode::Bridging(bridge));
        Ok(())
    }
}

#[async_trait]
impl russh::server::Handler for ServerHandler {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth> {
        let outcome = self
            .services
            .auth_gate
            .authenticate(AuthAttempt {
                username: user,
                password,
                public_key: None,
                remote_addr: self.remote_addr.ip(),
            })
            .await;
        match outcome {
            AuthOutcome::Success(user) => {
                self.user = Some(user);
                Ok(Auth::Accept)
            }
            AuthOutcome::Blocked => Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            }),
            AuthOutcome::Failed => Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            }),
        }
    }

    async fn auth_publickey_offered(&mut self, _user: &str, _key: &PublicKey) -> Result<Auth> {
        Ok(Auth::Accept)
    }

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth> {
        let encoded = key.to_openssh().unwrap_or_default();
        let outcome = self
            .services
            .auth_gate
            .authenticate(AuthAttempt {
                username: user,
                password: "",
                public_key: Some(&encoded),
                remote_addr: self.remote_addr.ip(),
            })
            .await;
        match outcome {
            AuthOutcome::Success(user) => {
                self.user = Some(user);
                Ok(Auth::Accept)
            }
            _ => Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            }),
        }
    }

    async fn channel_open_session(&mut self, _channel: Channel<Msg>, _session: &mut Session) -> Result<bool> {
        self.mode = Some(Mode::AwaitingShell);
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        _channel: ChannelId,
        _term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<()> {
        self.cols = col_width;
        self.rows = row_height;
        session.channel_success(_channel)?;
        Ok(())
    }

    async fn shell_request(&mut self, channel_id: ChannelId, session: &mut Session) -> Result<()> {
        session.channel_success(channel_id)?;
        let username = self
            .user
            .as_ref()
            .map(|u| u.username.clone())
            .unwrap_or_default();
        let (effective_user, triplet) = parse_direct_login(&username);
        match triplet {
            Some(t) => {
                if let Err(err) = self
                    .dispatch_direct_login(channel_id, session, &effective_user, &t.sysuser, &t.asset)
                    .await
                {
                    warn!(%err, "direct login dispatch failed");
                    session
                        .data(channel_id, format!("\r\nerror: {err}\r\n").into())
                        .ok();
                    session.close(channel_id)?;
                }
            }
            None => {
                let is_admin = self.user.as_ref().map(|u| matches!(u.role, bastion_common::model::Role::Admin)).unwrap_or(false);
                if is_admin {
                    self.mode = Some(Mode::AdminConsole);
                    session
                        .data(
                            channel_id,
                            b"\r\nbastion admin console. type `help` for commands.\r\n> "[..].into(),
                        )
                        .ok();
                } else {
                    session
                        .data(
                            channel_id,
                            b"\r\nlog in as user@sysuser@asset to connect directly.\r\n"[..].into(),
                        )
                        .ok();
                    session.close(channel_id)?;
                }
            }
        }
        Ok(())
    }

    async fn data(&mut self, channel_id: ChannelId, data: &[u8], session: &mut Session) -> Result<()> {
        match &self.mode {
            Some(Mode::Bridging(bridge)) => {
                bridge.send_client_data(Bytes::copy_from_slice(data)).await;
            }
            Some(Mode::AdminConsole) => {
                self.handle_admin_command(channel_id, session, data).await?;
            }
            Some(Mode::AwaitingApproval(cancel)) => {
                if data.iter().any(|b| *b == b'q' || *b == b'Q') {
                    cancel.notify_one();
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        _channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<()> {
        self.cols = col_width;
        self.rows = row_height;
        if let Some(Mode::Bridging(bridge)) = &self.mode {
            bridge.window_change(col_width, row_height).await;
        }
        Ok(())
    }

    async fn signal(&mut self, _channel: ChannelId, _signal_name: Sig, _session: &mut Session) -> Result<()> {
        Ok(())
    }

    async fn channel_close(&mut self, _channel: ChannelId, _session: &mut Session) -> Result<()> {
        if let Some(Mode::AwaitingApproval(cancel)) = &self.mode {
            cancel.notify_one();
        }
        self.services.sessions.remove(self.session_id).await;
        Ok(())
    }
}

impl ServerHandler {
    async fn handle_admin_command(&mut self, channel_id: ChannelId, session: &mut Session, data: &[u8]) -> Result<()> {
        let line = String::from_utf8_lossy(data);
        let line = line.trim();
        let reply = match line {
            "help" => {
                "commands: list users|assets|tickets, approve <id>, reject <id>, otp <username>, terminate <session>, exit"
                    .to_string()
            }
            "exit" | "quit" | "q" => {
                session.close(channel_id)?;
                return Ok(());
            }
            other if other.starts_with("approve ") => {
                self.resolve_ticket(&other[8..], TicketState::Approved).await
            }
            other if other.starts_with("reject ") => {
                self.resolve_ticket(&other[7..], TicketState::Rejected).await
            }
            other if other.starts_with("otp ") => {
                let username = other[4..].trim();
                let code = self.services.auth_gate.generate_otp(username).await;
                format!("otp for {username}: {code}")
            }
            other if other.starts_with("terminate ") => self.terminate_session(&other[10..]).await,
            _ => "unrecognized command, type `help`".to_string(),
        };
        session.data(channel_id, format!("\r\n{reply}\r\n> ").into()).ok();
        Ok(())
    }

    async fn resolve_ticket(&self, id_str: &str, state: TicketState) -> String {
        let admin = self.user.as_ref().map(|u| u.username.clone()).unwrap_or_default();
        match id_str.trim().parse::<Uuid>() {
            Ok(id) => match self.services.catalog.update_ticket_state(id, state, &admin).await {
                Ok(()) => format!("ticket {id} updated"),
                Err(err) => format!("error: {err}"),
            },
            Err(_) => "invalid ticket id".to_string(),
        }
    }

    /// Admin "terminate" (spec.md §6, C8): resolves a session id and
    /// cancels its Bridge, observed within the next idle tick (≤30s).
    async fn terminate_session(&self, id_str: &str) -> String {
        let admin = self.user.as_ref().map(|u| u.username.clone()).unwrap_or_default();
        match id_str.trim().parse::<Uuid>() {
            Ok(id) => {
                if self.services.sessions.terminate(id, &admin).await {
                    format!("session {id} terminated")
                } else {
                    format!("no live session {id}")
                }
            }
            Err(_) => "invalid session id".to_string(),
        }
    }
}

impl Drop for ServerHandler {
    fn drop(&mut self) {
        info!(session = %self.session_id, "connection closed");
    }
}
