//! The catalog's data model (spec.md §3), persisted by `bastion-store` as
//! JSON documents and otherwise handled as plain Rust values by every other
//! crate.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    /// unix seconds; 0 means never expires
    pub expire_at: i64,
    pub otp_level: u8,
    pub is_active: bool,
    pub node_ids: Vec<String>,
    pub addr_allow_list: Vec<IpAddr>,
}

impl User {
    pub fn is_expired(&self) -> bool {
        self.expire_at != 0 && self.expire_at < now()
    }

    pub fn requires_otp(&self) -> bool {
        self.otp_level == 1
    }
}

/// Separated from [`User`] so the hot user record never carries credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSecret {
    pub user_id: Uuid,
    pub password_hash: String,
    pub authorized_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub name: String,
    pub hostname: String,
    pub ip: IpAddr,
    /// `name/port` entries, e.g. `ssh/22`.
    pub protocols: Vec<String>,
    pub platform: String,
    pub is_active: bool,
}

impl Asset {
    /// Returns the port for the first matching `name/port` entry, or 0.
    pub fn protocol_port(&self, name: &str) -> u16 {
        for entry in &self.protocols {
            if let Some((proto, port)) = entry.split_once('/') {
                if proto.eq_ignore_ascii_case(name) {
                    if let Ok(port) = port.parse() {
                        return port;
                    }
                }
            }
        }
        0
    }

    pub fn has_protocol(&self, name: &str) -> bool {
        self.protocols
            .iter()
            .any(|p| p.split('/').next() == Some(name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemUser {
    pub id: Uuid,
    pub username: String,
    pub priority: i32,
    pub protocol: String,
    pub password: Option<String>,
    pub private_key: Option<String>,
    /// Decrypts `private_key` when it is passphrase-protected; tried before
    /// falling back to a plain-text key parse.
    pub passphrase: Option<String>,
    pub comment: String,
}

/// The permission edge linking a [`User`] to an [`Asset`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetUserInfo {
    pub id: Uuid,
    pub user_id: Uuid,
    pub asset_id: Uuid,
    pub expire_at: i64,
    pub sys_user_ids: Vec<Uuid>,
    pub need_confirm: bool,
}

impl AssetUserInfo {
    pub fn is_expired(&self) -> bool {
        self.expire_at != 0 && self.expire_at < now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    Pending,
    Approved,
    Rejected,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginTicket {
    pub ticket_id: Uuid,
    pub state: TicketState,
    pub approver: String,
    pub application_date: i64,
    pub approve_date: i64,
    pub username: String,
    pub asset_name: String,
    pub sys_username: String,
}

impl LoginTicket {
    pub fn new(username: String, asset_name: String, sys_username: String) -> Self {
        Self {
            ticket_id: Uuid::new_v4(),
            state: TicketState::Pending,
            approver: String::new(),
            application_date: now(),
            approve_date: 0,
            username,
            asset_name,
            sys_username,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub asset_id: Uuid,
    pub asset_name: String,
    pub system_user_id: Uuid,
    pub system_user: String,
    pub protocol: String,
    pub login_from: String,
    pub remote_addr: String,
    pub date_start: i64,
}

/// Deterministic key identifying a reusable outbound client:
/// `userId_assetId_sysUserId_ip_sysUsername`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientKey(pub String);

impl ClientKey {
    pub fn new(user_id: Uuid, asset_id: Uuid, sys_user_id: Uuid, ip: IpAddr, sys_username: &str) -> Self {
        Self(format!(
            "{user_id}_{asset_id}_{sys_user_id}_{ip}_{sys_username}"
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    pub password_auth: bool,
    pub public_key_auth: bool,
    /// PEM-encoded host key.
    pub host_key: String,
    pub max_idle_time: u64,
    pub asset_list_page_size: u32,
    pub header_title: String,
    pub enable_session_share: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            password_auth: true,
            public_key_auth: true,
            host_key: String::new(),
            max_idle_time: 30,
            asset_list_page_size: 20,
            header_title: "bastion".into(),
            enable_session_share: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayEnv {
    #[serde(rename = "SHELL")]
    pub shell: String,
    #[serde(rename = "TERM")]
    pub term: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayHeader {
    pub version: u8,
    pub width: u32,
    pub height: u32,
    pub timestamp: i64,
    pub title: String,
    pub env: ReplayEnv,
}

impl ReplayHeader {
    pub fn new(width: u32, height: u32, title: String) -> Self {
        Self {
            version: 2,
            width,
            height,
            timestamp: now(),
            title,
            env: ReplayEnv {
                shell: "/bin/bash".into(),
                term: "xterm".into(),
            },
        }
    }
}
