mod defaults;
mod watch;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use watch::watch_config;

use crate::error::BastionError;

use self::defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub bind_host: String,
    pub sshd_port: u16,
    pub ssh_timeout: u64,
    pub client_alive_interval: u64,
    pub retry_alive_count_max: u32,
    pub enable_local_port_forward: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            sshd_port: default_sshd_port(),
            ssh_timeout: default_ssh_timeout(),
            client_alive_interval: default_client_alive_interval(),
            retry_alive_count_max: default_retry_alive_count_max(),
            enable_local_port_forward: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientCacheConfig {
    pub reuse_connection: bool,
}

impl Default for ClientCacheConfig {
    fn default() -> Self {
        Self {
            reuse_connection: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingsConfig {
    pub disable_recorder: bool,
    pub replay_path: PathBuf,
}

impl Default for RecordingsConfig {
    fn default() -> Self {
        Self {
            disable_recorder: false,
            replay_path: PathBuf::from("./data/replays"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginProtectionConfig {
    pub max_try_login: u32,
    /// minutes
    pub login_block_time: u64,
    /// seconds
    pub otp_duration: u64,
}

impl Default for LoginProtectionConfig {
    fn default() -> Self {
        Self {
            max_try_login: default_max_try_login(),
            login_block_time: default_login_block_time(),
            otp_duration: default_otp_duration(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub log_file: Option<PathBuf>,
    pub log_level: LogLevel,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            log_level: LogLevel::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// field name is modern; on-disk env var keeps the legacy `GENJI_DB_PATH`
    /// name this codebase's upstream config used for its embedded store.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/bastion.db"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BastionConfigStore {
    pub ssh: SshConfig,
    pub client_cache: ClientCacheConfig,
    pub recordings: RecordingsConfig,
    pub login_protection: LoginProtectionConfig,
    pub log: LogConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone)]
pub struct BastionConfig {
    pub store: BastionConfigStore,
    pub paths_relative_to: PathBuf,
}

impl BastionConfig {
    pub fn replay_path(&self) -> PathBuf {
        self.resolve(&self.store.recordings.replay_path)
    }

    pub fn db_path(&self) -> PathBuf {
        self.resolve(&self.store.store.db_path)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.paths_relative_to.join(path)
        }
    }

    pub fn validate(&self) -> Result<(), BastionError> {
        if self.store.ssh.sshd_port == 0 {
            return Err(BastionError::Config("sshd_port must be nonzero".into()));
        }
        Ok(())
    }
}

/// Loads the YAML config file at `path`, falling back to an all-defaults
/// store when the file does not exist, then applies the `UPPER_SNAKE_CASE`
/// environment-variable override layer documented in spec.md §6.
pub fn load(path: &Path) -> Result<BastionConfig, BastionError> {
    let mut store: BastionConfigStore = if path.exists() {
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text)
            .map_err(|e| BastionError::Config(format!("{path:?}: {e}")))?
    } else {
        BastionConfigStore::default()
    };

    apply_env_overrides(&mut store);

    let paths_relative_to = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let config = BastionConfig {
        store,
        paths_relative_to,
    };
    config.validate()?;
    Ok(config)
}

fn apply_env_overrides(store: &mut BastionConfigStore) {
    use std::env::var;

    if let Ok(v) = var("BIND_HOST") {
        store.ssh.bind_host = v;
    }
    if let Ok(v) = var("SSHD_PORT").ok().and_then(|v| v.parse().ok()) {
        store.ssh.sshd_port = v;
    }
    if let Ok(v) = var("SSH_TIMEOUT").ok().and_then(|v| v.parse().ok()) {
        store.ssh.ssh_timeout = v;
    }
    if let Ok(v) = var("CLIENT_ALIVE_INTERVAL").ok().and_then(|v| v.parse().ok()) {
        store.ssh.client_alive_interval = v;
    }
    if let Ok(v) = var("RETRY_ALIVE_COUNT_MAX").ok().and_then(|v| v.parse().ok()) {
        store.ssh.retry_alive_count_max = v;
    }
    if let Ok(v) = var("ENABLE_LOCAL_PORT_FORWARD").ok().and_then(|v| v.parse().ok()) {
        store.ssh.enable_local_port_forward = v;
    }
    if let Ok(v) = var("REUSE_CONNECTION").ok().and_then(|v| v.parse().ok()) {
        store.client_cache.reuse_connection = v;
    }
    if let Ok(v) = var("DISABLE_RECORDER").ok().and_then(|v| v.parse().ok()) {
        store.recordings.disable_recorder = v;
    }
    if let Ok(v) = var("REPLAY_PATH") {
        store.recordings.replay_path = PathBuf::from(v);
    }
    if let Ok(v) = var("MAX_TRY_LOGIN").ok().and_then(|v| v.parse().ok()) {
        store.login_protection.max_try_login = v;
    }
    if let Ok(v) = var("LOGIN_BLOCK_TIME").ok().and_then(|v| v.parse().ok()) {
        store.login_protection.login_block_time = v;
    }
    if let Ok(v) = var("OTP_DURATION").ok().and_then(|v| v.parse().ok()) {
        store.login_protection.otp_duration = v;
    }
    if let Ok(v) = var("LOG_FILE") {
        store.log.log_file = Some(PathBuf::from(v));
    }
    if let Ok(v) = var("LOG_LEVEL") {
        if let Ok(level) = serde_yaml::from_str::<LogLevel>(&format!("\"{v}\"")) {
            store.log.log_level = level;
        }
    }
    if let Ok(v) = var("GENJI_DB_PATH") {
        store.store.db_path = PathBuf::from(v);
    }
}
