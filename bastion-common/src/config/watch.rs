use std::path::PathBuf;
use std::sync::Arc;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use super::{load, BastionConfig};
use crate::error::BastionError;

/// Watches `path` for writes and reloads it into `current`, skipping fields
/// that are unsafe to change live (the host key path is baked into
/// `TerminalConfig` at startup and is not re-read here).
pub async fn watch_config(
    path: PathBuf,
    current: Arc<Mutex<BastionConfig>>,
) -> Result<(), BastionError> {
    let (tx, mut rx) = mpsc::channel(16);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                let _ = tx.blocking_send(());
            }
        }
    })
    .map_err(|e| BastionError::Config(format!("watcher init failed: {e}")))?;

    watcher
        .watch(&path, RecursiveMode::NonRecursive)
        .map_err(|e| BastionError::Config(format!("watch({path:?}) failed: {e}")))?;

    while rx.recv().await.is_some() {
        match load(&path) {
            Ok(new_config) => {
                *current.lock().await = new_config;
                info!(?path, "config reloaded");
            }
            Err(error) => {
                warn!(%error, "config reload failed, keeping previous config");
            }
        }
    }

    error!("config watch channel closed unexpectedly");
    Ok(())
}
