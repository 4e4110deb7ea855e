//! End-to-end coverage for spec.md §4.6's idle-timeout behavior (part of
//! scenario family around S5/S6's session lifecycle), driven against a
//! minimal in-process SSH server standing in for a real asset rather than
//! a live network host.
//!
//! The bridge's idle tick is a fixed 30s interval (see `bridge.rs`'s
//! `IDLE_TICK`), so this test configures a near-zero `max_idle_time` and
//! waits past the first tick rather than trying to shrink the interval
//! itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bastion_common::model::{SystemUser, TerminalConfig};
use bastion_core::catalog::{Catalog, CatalogResult};
use bastion_ssh::bridge::{Bridge, BridgeSink};
use bastion_ssh::client::Dialer;
use bytes::Bytes;
use russh::keys::{Algorithm, PrivateKey};
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, Pty};
use uuid::Uuid;

/// Accepts any password and keeps an opened shell channel alive without
/// ever writing to it, so the bridge under test only ever sees silence
/// and its idle timer is the only thing that can end the session.
struct SilentAssetHandler;

#[async_trait]
impl russh::server::Handler for SilentAssetHandler {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, _user: &str, _password: &str) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn channel_open_session(&mut self, _channel: Channel<Msg>, _session: &mut Session) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        Ok(())
    }
}

/// A `Catalog` stub returning a permission that never expires, since this
/// test exercises the idle-timeout branch of the Bridge's idle tick, not
/// the permission-expiry branch.
struct NeverExpiresCatalog;

#[async_trait]
impl Catalog for NeverExpiresCatalog {
    async fn get_user(&self, _name: &str) -> CatalogResult<bastion_common::model::User> {
        unimplemented!("not exercised by this test")
    }
    async fn get_user_secret(&self, _user_id: Uuid) -> CatalogResult<bastion_common::model::UserSecret> {
        unimplemented!("not exercised by this test")
    }
    async fn get_asset(&self, _id: Uuid) -> CatalogResult<bastion_common::model::Asset> {
        unimplemented!("not exercised by this test")
    }
    async fn get_asset_by_name(&self, _name: &str) -> CatalogResult<bastion_common::model::Asset> {
        unimplemented!("not exercised by this test")
    }
    async fn get_all_permitted_assets(&self, _node_ids: &[String]) -> CatalogResult<Vec<bastion_common::model::Asset>> {
        unimplemented!("not exercised by this test")
    }
    async fn get_system_users_for_permission(
        &self,
        _user_id: Uuid,
        _asset_id: Uuid,
    ) -> CatalogResult<Vec<SystemUser>> {
        unimplemented!("not exercised by this test")
    }
    async fn get_permission_expiry(&self, _user_id: Uuid, _asset_id: Uuid) -> CatalogResult<i64> {
        Ok(0)
    }
    async fn needs_login_confirm(&self, _user_id: Uuid, _asset_id: Uuid) -> CatalogResult<bool> {
        Ok(false)
    }
    async fn create_ticket(&self, _ticket: bastion_common::model::LoginTicket) -> CatalogResult<()> {
        unimplemented!("not exercised by this test")
    }
    async fn get_ticket_state(&self, _ticket_id: Uuid) -> CatalogResult<(bastion_common::model::TicketState, String)> {
        unimplemented!("not exercised by this test")
    }
    async fn update_ticket_state(
        &self,
        _ticket_id: Uuid,
        _state: bastion_common::model::TicketState,
        _actor: &str,
    ) -> CatalogResult<()> {
        unimplemented!("not exercised by this test")
    }
    async fn get_reviewers(&self) -> CatalogResult<Vec<String>> {
        unimplemented!("not exercised by this test")
    }
    async fn get_terminal_config(&self) -> CatalogResult<TerminalConfig> {
        Ok(TerminalConfig::default())
    }
    async fn set_terminal_config(&self, _config: &TerminalConfig) -> CatalogResult<()> {
        unimplemented!("not exercised by this test")
    }
    async fn append_audit_log(&self, _kind: &str, _username: &str, _message: &str) -> CatalogResult<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct FlagSink(Arc<AtomicBool>);

#[async_trait]
impl BridgeSink for FlagSink {
    async fn connected_success(&self) {}
    async fn connected_failed(&self, _reason: &str) {}
    async fn disconnected(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    async fn server_data(&self, _data: Bytes) {}
}

#[tokio::test]
async fn bridge_ends_the_session_after_the_idle_timeout() {
    let host_key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).expect("host key");
    let server_config = Arc::new(russh::server::Config {
        keys: vec![host_key],
        ..Default::default()
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let _ = russh::server::run_stream(server_config, stream, SilentAssetHandler)
            .await
            .expect("server session")
            .await;
    });

    let sys_user = SystemUser {
        id: Uuid::new_v4(),
        username: "root".into(),
        priority: 0,
        protocol: "ssh".into(),
        password: Some("anything".into()),
        private_key: None,
        passphrase: None,
        comment: String::new(),
    };

    let dialer = Arc::new(Dialer::connect(addr, &sys_user).await.expect("dial mock asset"));
    let sink_flag = Arc::new(AtomicBool::new(false));
    let sink = Arc::new(FlagSink(sink_flag.clone()));
    let catalog: Arc<dyn Catalog> = Arc::new(NeverExpiresCatalog);

    let _bridge = Bridge::start(
        dialer,
        sink,
        bastion_core::recorder::Recorder::disabled(),
        catalog,
        Uuid::new_v4(),
        Uuid::new_v4(),
        Duration::from_millis(50),
        Duration::from_secs(3600),
        80,
        24,
    )
    .await
    .expect("start bridge");

    // The idle tick fires every 30s regardless of max_idle_time; wait past
    // the first one to observe the timeout taking effect.
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(sink_flag.load(Ordering::SeqCst), "bridge should have disconnected after the idle timeout");
}
