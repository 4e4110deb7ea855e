//! Host key load/generate, grounded in this codebase's `keys.rs`: the PEM
//! lives in `TerminalConfig.HostKey` and is generated once at install.

use bastion_common::model::TerminalConfig;
use russh::keys::{Algorithm, PrivateKey};
use tracing::info;

use crate::error::SshError;

/// Loads the host key from `TerminalConfig.HostKey`, generating and
/// returning a fresh Ed25519 key (PEM-encoded) when none is set yet —
/// callers are responsible for persisting the returned PEM back to the
/// catalog so the key is stable across restarts.
pub fn load_or_generate_host_key(config: &TerminalConfig) -> Result<(PrivateKey, Option<String>), SshError> {
    if config.host_key.trim().is_empty() {
        info!("no host key configured, generating a fresh Ed25519 key");
        let key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
            .map_err(|e| SshError::HostKey(e.to_string()))?;
        let pem = key
            .to_openssh(russh::keys::ssh_key::LineEnding::LF)
            .map_err(|e| SshError::HostKey(e.to_string()))?
            .to_string();
        return Ok((key, Some(pem)));
    }

    let key = PrivateKey::from_openssh(&config.host_key).map_err(|e| SshError::HostKey(e.to_string()))?;
    Ok((key, None))
}
