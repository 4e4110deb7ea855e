//! Connects one client-facing `russh` channel to one outbound [`Dialer`]
//! channel (spec.md §4.6), grounded in this codebase's server session
//! event loop idiom: a single `tokio::select!` driving reads from both
//! sides plus timer and control channels, rather than dedicated up/down
//! tasks — the three logical data paths (client->asset, asset->client,
//! control) still exist, just multiplexed onto one task per spec.md §5's
//! "Bridge: one task per session" resource model.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use bastion_core::catalog::Catalog;
use bastion_core::recorder::Recorder;
use bastion_core::session_registry::Terminable;
use bytes::Bytes;
use russh::ChannelId;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::Dialer;
use crate::error::SshError;

const IDLE_TICK: Duration = Duration::from_secs(30);

pub enum BridgeEvent {
    /// Data arriving from the client-facing channel, to be forwarded to
    /// the asset.
    ClientData(Bytes),
    WindowChange { cols: u32, rows: u32 },
    Eof,
}

/// Lifecycle callbacks a Frontend registers to reflect Bridge state back
/// onto the client-facing `russh::server::Handle` (spec.md §4.6).
#[async_trait::async_trait]
pub trait BridgeSink: Send + Sync {
    async fn connected_success(&self);
    async fn connected_failed(&self, reason: &str);
    async fn disconnected(&self);
    async fn server_data(&self, data: Bytes);
}

pub struct Bridge<S: BridgeSink> {
    dialer: Arc<Dialer>,
    asset_channel: ChannelId,
    sink: Arc<S>,
    recorder: Recorder,
    catalog: Arc<dyn Catalog>,
    user_id: Uuid,
    asset_id: Uuid,
    client_events: mpsc::Sender<BridgeEvent>,
    terminated_by: Mutex<Option<String>>,
    /// Last time either direction carried data; both the idle timeout and
    /// the keep-alive gate read this, so activity in either direction
    /// resets both (spec.md §4.6).
    last_active: StdMutex<Instant>,
    max_idle_time: Duration,
}

impl<S: BridgeSink + 'static> Bridge<S> {
    /// Opens the outbound shell and starts the bridging task. Calls
    /// `sink.connected_success`/`connected_failed` exactly once before
    /// returning, matching spec.md §4.6's pre-bridge lifecycle.
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        dialer: Arc<Dialer>,
        sink: Arc<S>,
        recorder: Recorder,
        catalog: Arc<dyn Catalog>,
        user_id: Uuid,
        asset_id: Uuid,
        max_idle_time: Duration,
        keep_alive_interval: Duration,
        cols: u32,
        rows: u32,
    ) -> Result<Arc<Self>, SshError> {
        let channel = match dialer.open_shell(cols, rows).await {
            Ok(channel) => channel,
            Err(err) => {
                sink.connected_failed(&err.to_string()).await;
                return Err(err);
            }
        };
        sink.connected_success().await;

        let (tx, rx) = mpsc::channel(256);
        let asset_channel = channel.id();
        let bridge = Arc::new(Self {
            dialer,
            asset_channel,
            sink,
            recorder,
            catalog,
            user_id,
            asset_id,
            client_events: tx,
            terminated_by: Mutex::new(None),
            last_active: StdMutex::new(Instant::now()),
            max_idle_time,
        });

        tokio::spawn(Self::run(bridge.clone(), channel, rx, keep_alive_interval));
        Ok(bridge)
    }

    fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_active.lock().unwrap_or_else(|e| e.into_inner()).elapsed()
    }

    /// Forwards one chunk of client-typed bytes to the asset.
    pub async fn send_client_data(&self, data: Bytes) {
        let _ = self.client_events.send(BridgeEvent::ClientData(data)).await;
        self.touch();
    }

    pub async fn window_change(&self, cols: u32, rows: u32) {
        let _ = self.client_events.send(BridgeEvent::WindowChange { cols, rows }).await;
    }

    async fn run(
        self_: Arc<Self>,
        mut channel: russh::Channel<russh::client::Msg>,
        mut client_rx: mpsc::Receiver<BridgeEvent>,
        keep_alive_interval: Duration,
    ) {
        let mut idle_tick = tokio::time::interval(IDLE_TICK);
        let mut keep_alive_tick = tokio::time::interval(keep_alive_interval.min(IDLE_TICK));
        idle_tick.tick().await;
        keep_alive_tick.tick().await;

        loop {
            tokio::select! {
                event = client_rx.recv() => {
                    match event {
                        Some(BridgeEvent::ClientData(data)) => {
                            if let Err(err) = channel.data(&data[..]).await {
                                warn!(%err, "failed writing to asset channel");
                                break;
                            }
                        }
                        Some(BridgeEvent::WindowChange { cols, rows }) => {
                            if let Err(err) = self_.dialer.window_change(self_.asset_channel, cols, rows).await {
                                warn!(%err, "window-change forward failed");
                            }
                        }
                        Some(BridgeEvent::Eof) | None => break,
                    }
                }
                msg = channel.wait() => {
                    match msg {
                        Some(russh::ChannelMsg::Data { data }) => {
                            let bytes = Bytes::copy_from_slice(&data);
                            self_.recorder.record(bytes.clone()).await;
                            self_.sink.server_data(bytes).await;
                            self_.touch();
                        }
                        Some(russh::ChannelMsg::ExtendedData { data, .. }) => {
                            let bytes = Bytes::copy_from_slice(&data);
                            self_.recorder.record(bytes.clone()).await;
                            self_.sink.server_data(bytes).await;
                            self_.touch();
                        }
                        Some(russh::ChannelMsg::Eof) | Some(russh::ChannelMsg::Close) | None => break,
                        _ => {}
                    }
                }
                _ = idle_tick.tick() => {
                    if self_.idle_for() >= self_.max_idle_time {
                        info!("idle timeout reached, terminating bridge");
                        break;
                    }
                    match self_.catalog.get_permission_expiry(self_.user_id, self_.asset_id).await {
                        Ok(expire_at) if expire_at != 0 && expire_at <= chrono::Utc::now().timestamp() => {
                            info!("permission expired mid-session, terminating bridge");
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => warn!(%err, "permission expiry check failed, keeping bridge open"),
                    }
                }
                _ = keep_alive_tick.tick() => {
                    if self_.idle_for() >= keep_alive_interval {
                        if let Err(err) = self_.dialer.send_keepalive().await {
                            warn!(%err, "keepalive failed, assuming asset connection lost");
                            break;
                        }
                    }
                }
            }

            if self_.terminated_by.lock().await.is_some() {
                break;
            }
        }

        self_.recorder.end().await;
        self_.sink.disconnected().await;
    }
}

impl<S: BridgeSink> Terminable for Bridge<S> {
    fn terminate(&self, admin: &str) {
        let admin = admin.to_string();
        if let Ok(mut guard) = self.terminated_by.try_lock() {
            if guard.is_none() {
                *guard = Some(admin);
            }
        }
    }
}
