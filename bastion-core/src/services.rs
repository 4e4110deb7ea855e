//! Aggregates the long-lived, process-wide handles every connection needs,
//! grounded in this codebase's `services.rs`. Generic over the concrete
//! outbound-client and bridge types so this crate stays decoupled from
//! `bastion-ssh`, which supplies both and instantiates `Services` once at
//! startup.

use std::sync::Arc;
use std::time::Duration;

use bastion_common::config::BastionConfig;
use tokio::sync::Mutex;

use crate::auth_gate::{AuthGate, AuthGateConfig};
use crate::catalog::Catalog;
use crate::client_cache::{CacheableClient, ClientCache};
use crate::session_registry::{SessionRegistry, Terminable};

pub struct Services<C: CacheableClient, B: Terminable> {
    pub catalog: Arc<dyn Catalog>,
    pub auth_gate: Arc<AuthGate>,
    pub client_cache: ClientCache<C>,
    pub sessions: Arc<SessionRegistry<B>>,
    /// The live, hot-reloaded config (`bastion_common::config::watch_config`
    /// writes into this). Connection handling reads through it instead of
    /// a snapshot so `ReuseConnection`/`DisableRecorder`/timeouts track a
    /// config file edited while the bastion is running.
    pub config: Arc<Mutex<BastionConfig>>,
}

impl<C: CacheableClient, B: Terminable> Services<C, B> {
    pub async fn new(config: Arc<Mutex<BastionConfig>>, catalog: Arc<dyn Catalog>) -> Self {
        let snapshot = config.lock().await.clone();
        let auth_gate = Arc::new(AuthGate::new(
            catalog.clone(),
            AuthGateConfig {
                max_try_login: snapshot.store.login_protection.max_try_login,
                login_block_time: Duration::from_secs(snapshot.store.login_protection.login_block_time * 60),
                otp_duration: Duration::from_secs(snapshot.store.login_protection.otp_duration),
            },
        ));

        Self {
            catalog,
            auth_gate,
            client_cache: ClientCache::spawn(),
            sessions: Arc::new(SessionRegistry::new()),
            config,
        }
    }
}
