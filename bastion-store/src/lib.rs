//! The embedded, schemaless document store backing [`Catalog`] (spec.md
//! §1, SPEC_FULL.md §4.10). Backed by `redb`: one table per entity kind,
//! JSON-serialized values, plus name-index tables for the two lookups that
//! need them. Grounded in the embeddable-store usage pattern from this
//! retrieval pack's `zvault-storage` crate, since the `warpgate` lineage
//! itself always assumed an external SQL database — a deliberate stack
//! deviation recorded in DESIGN.md.

mod seed;

pub use seed::seed_demo_data;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bastion_common::helpers::fs::{secure_directory, secure_file};
use bastion_common::model::{
    Asset, AssetUserInfo, LoginTicket, SystemUser, TerminalConfig, TicketState, User, UserSecret,
};
use bastion_core::catalog::{Catalog, CatalogError, CatalogResult};
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
const USERS_BY_NAME: TableDefinition<&str, &str> = TableDefinition::new("users_by_name");
const USER_SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("user_secrets");
const ASSETS: TableDefinition<&str, &[u8]> = TableDefinition::new("assets");
const ASSETS_BY_NAME: TableDefinition<&str, &str> = TableDefinition::new("assets_by_name");
const SYSTEM_USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("system_users");
const PERMISSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("permissions");
const TICKETS: TableDefinition<&str, &[u8]> = TableDefinition::new("tickets");
const AUDIT_LOG: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_log");
const CONFIG: TableDefinition<&str, &[u8]> = TableDefinition::new("config");

fn to_storage_error<E: std::fmt::Display>(err: E) -> CatalogError {
    CatalogError::Storage(err.to_string())
}

/// Opens the embedded store file, creating it (and every table) on first
/// run, mirroring an embedded database's usual "creates it if missing"
/// ergonomics.
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            secure_directory(parent)?;
        }
        let db = Database::create(path)?;
        secure_file(path)?;
        {
            let txn = db.begin_write()?;
            txn.open_table(USERS)?;
            txn.open_table(USERS_BY_NAME)?;
            txn.open_table(USER_SECRETS)?;
            txn.open_table(ASSETS)?;
            txn.open_table(ASSETS_BY_NAME)?;
            txn.open_table(SYSTEM_USERS)?;
            txn.open_table(PERMISSIONS)?;
            txn.open_table(TICKETS)?;
            txn.open_table(AUDIT_LOG)?;
            txn.open_table(CONFIG)?;
            txn.commit()?;
        }
        Ok(Self { db: Arc::new(db) })
    }

    pub fn put_user(&self, user: &User) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(user)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(USERS)?;
            table.insert(user.id.to_string().as_str(), bytes.as_slice())?;
            let mut by_name = txn.open_table(USERS_BY_NAME)?;
            by_name.insert(user.username.as_str(), user.id.to_string().as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn put_user_secret(&self, secret: &UserSecret) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(secret)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(USER_SECRETS)?;
            table.insert(secret.user_id.to_string().as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn put_asset(&self, asset: &Asset) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(asset)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ASSETS)?;
            table.insert(asset.id.to_string().as_str(), bytes.as_slice())?;
            let mut by_name = txn.open_table(ASSETS_BY_NAME)?;
            by_name.insert(asset.name.as_str(), asset.id.to_string().as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn put_system_user(&self, sys_user: &SystemUser) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(sys_user)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SYSTEM_USERS)?;
            table.insert(sys_user.id.to_string().as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn put_permission(&self, permission: &AssetUserInfo) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(permission)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(PERMISSIONS)?;
            table.insert(permission.id.to_string().as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

}

#[async_trait]
impl Catalog for Store {
    async fn get_user(&self, name: &str) -> CatalogResult<User> {
        let db = self.db.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(to_storage_error)?;
            let by_name = txn.open_table(USERS_BY_NAME).map_err(to_storage_error)?;
            let id = by_name
                .get(name.as_str())
                .map_err(to_storage_error)?
                .ok_or(CatalogError::NotFound)?
                .value()
                .to_string();
            let users = txn.open_table(USERS).map_err(to_storage_error)?;
            let bytes = users
                .get(id.as_str())
                .map_err(to_storage_error)?
                .ok_or(CatalogError::NotFound)?;
            serde_json::from_slice(bytes.value()).map_err(|e| CatalogError::Storage(e.to_string()))
        })
        .await
        .map_err(to_storage_error)?
    }

    async fn get_user_secret(&self, user_id: Uuid) -> CatalogResult<UserSecret> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(to_storage_error)?;
            let table = txn.open_table(USER_SECRETS).map_err(to_storage_error)?;
            let bytes = table
                .get(user_id.to_string().as_str())
                .map_err(to_storage_error)?
                .ok_or(CatalogError::NotFound)?;
            serde_json::from_slice(bytes.value()).map_err(|e| CatalogError::Storage(e.to_string()))
        })
        .await
        .map_err(to_storage_error)?
    }

    async fn get_asset(&self, id: Uuid) -> CatalogResult<Asset> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(to_storage_error)?;
            let table = txn.open_table(ASSETS).map_err(to_storage_error)?;
            let bytes = table
                .get(id.to_string().as_str())
                .map_err(to_storage_error)?
                .ok_or(CatalogError::NotFound)?;
            serde_json::from_slice(bytes.value()).map_err(|e| CatalogError::Storage(e.to_string()))
        })
        .await
        .map_err(to_storage_error)?
    }

    async fn get_asset_by_name(&self, name: &str) -> CatalogResult<Asset> {
        let db = self.db.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(to_storage_error)?;
            let by_name = txn.open_table(ASSETS_BY_NAME).map_err(to_storage_error)?;
            let id = by_name
                .get(name.as_str())
                .map_err(to_storage_error)?
                .ok_or(CatalogError::NotFound)?
                .value()
                .to_string();
            let assets = txn.open_table(ASSETS).map_err(to_storage_error)?;
            let bytes = assets
                .get(id.as_str())
                .map_err(to_storage_error)?
                .ok_or(CatalogError::NotFound)?;
            serde_json::from_slice(bytes.value()).map_err(|e| CatalogError::Storage(e.to_string()))
        })
        .await
        .map_err(to_storage_error)?
    }

    async fn get_all_permitted_assets(&self, node_ids: &[String]) -> CatalogResult<Vec<Asset>> {
        let db = self.db.clone();
        let node_ids: std::collections::HashSet<String> = node_ids.iter().cloned().collect();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(to_storage_error)?;
            let table = txn.open_table(ASSETS).map_err(to_storage_error)?;
            let mut assets = Vec::new();
            for row in table.iter().map_err(to_storage_error)? {
                let (_, value) = row.map_err(to_storage_error)?;
                let asset: Asset =
                    serde_json::from_slice(value.value()).map_err(|e| CatalogError::Storage(e.to_string()))?;
                if asset.is_active && (node_ids.is_empty() || node_ids.contains(&asset.id.to_string())) {
                    assets.push(asset);
                }
            }
            Ok(assets)
        })
        .await
        .map_err(to_storage_error)?
    }

    async fn get_system_users_for_permission(&self, user_id: Uuid, asset_id: Uuid) -> CatalogResult<Vec<SystemUser>> {
        let permissions = {
            let db = self.db.clone();
            tokio::task::spawn_blocking(move || permissions_for(&db, user_id, asset_id))
            .await
            .map_err(to_storage_error)?
            .map_err(to_storage_error)?
        };

        let db = self.db.clone();
        let sys_user_ids: Vec<Uuid> = permissions.into_iter().flat_map(|p| p.sys_user_ids).collect();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(to_storage_error)?;
            let table = txn.open_table(SYSTEM_USERS).map_err(to_storage_error)?;
            let mut out = Vec::new();
            for id in sys_user_ids {
                if let Some(bytes) = table.get(id.to_string().as_str()).map_err(to_storage_error)? {
                    let sys_user: SystemUser =
                        serde_json::from_slice(bytes.value()).map_err(|e| CatalogError::Storage(e.to_string()))?;
                    out.push(sys_user);
                }
            }
            out.sort_by_key(|u| u.priority);
            Ok(out)
        })
        .await
        .map_err(to_storage_error)?
    }

    async fn get_permission_expiry(&self, user_id: Uuid, asset_id: Uuid) -> CatalogResult<i64> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<i64> {
            let permissions = permissions_for(&db, user_id, asset_id)?;
            Ok(permissions.into_iter().map(|p| p.expire_at).max().unwrap_or(0))
        })
        .await
        .map_err(to_storage_error)?
        .map_err(to_storage_error)
    }

    async fn needs_login_confirm(&self, user_id: Uuid, asset_id: Uuid) -> CatalogResult<bool> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
            let permissions = permissions_for(&db, user_id, asset_id)?;
            Ok(permissions.iter().any(|p| p.need_confirm))
        })
        .await
        .map_err(to_storage_error)?
        .map_err(to_storage_error)
    }

    async fn create_ticket(&self, ticket: LoginTicket) -> CatalogResult<()> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let bytes = serde_json::to_vec(&ticket).map_err(|e| CatalogError::Storage(e.to_string()))?;
            let txn = db.begin_write().map_err(to_storage_error)?;
            {
                let mut table = txn.open_table(TICKETS).map_err(to_storage_error)?;
                table
                    .insert(ticket.ticket_id.to_string().as_str(), bytes.as_slice())
                    .map_err(to_storage_error)?;
            }
            txn.commit().map_err(to_storage_error)
        })
        .await
        .map_err(to_storage_error)?
    }

    async fn get_ticket_state(&self, ticket_id: Uuid) -> CatalogResult<(TicketState, String)> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(to_storage_error)?;
            let table = txn.open_table(TICKETS).map_err(to_storage_error)?;
            let bytes = table
                .get(ticket_id.to_string().as_str())
                .map_err(to_storage_error)?
                .ok_or(CatalogError::NotFound)?;
            let ticket: LoginTicket =
                serde_json::from_slice(bytes.value()).map_err(|e| CatalogError::Storage(e.to_string()))?;
            Ok((ticket.state, ticket.approver))
        })
        .await
        .map_err(to_storage_error)?
    }

    /// The CAS required by spec.md §4.1: a single redb write transaction
    /// reads the current ticket, verifies it is still `Pending`, and only
    /// then writes the transition — redb's single-writer model makes two
    /// concurrent callers race for the same write transaction rather than
    /// both reading `Pending` and both writing, so exactly one succeeds.
    async fn update_ticket_state(&self, ticket_id: Uuid, new_state: TicketState, approver: &str) -> CatalogResult<()> {
        let db = self.db.clone();
        let approver = approver.to_string();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_write().map_err(to_storage_error)?;
            {
                let mut table = txn.open_table(TICKETS).map_err(to_storage_error)?;
                let bytes = table
                    .get(ticket_id.to_string().as_str())
                    .map_err(to_storage_error)?
                    .ok_or(CatalogError::NotFound)?
                    .value()
                    .to_vec();
                let mut ticket: LoginTicket =
                    serde_json::from_slice(&bytes).map_err(|e| CatalogError::Storage(e.to_string()))?;
                if ticket.state != TicketState::Pending {
                    return Err(CatalogError::Conflict(format!(
                        "ticket {ticket_id} is no longer pending"
                    )));
                }
                ticket.state = new_state;
                ticket.approver = approver;
                ticket.approve_date = chrono::Utc::now().timestamp();
                let updated = serde_json::to_vec(&ticket).map_err(|e| CatalogError::Storage(e.to_string()))?;
                table
                    .insert(ticket_id.to_string().as_str(), updated.as_slice())
                    .map_err(to_storage_error)?;
            }
            txn.commit().map_err(to_storage_error)
        })
        .await
        .map_err(to_storage_error)?
    }

    async fn get_reviewers(&self) -> CatalogResult<Vec<String>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(to_storage_error)?;
            let table = txn.open_table(USERS).map_err(to_storage_error)?;
            let mut out = Vec::new();
            for row in table.iter().map_err(to_storage_error)? {
                let (_, value) = row.map_err(to_storage_error)?;
                let user: User =
                    serde_json::from_slice(value.value()).map_err(|e| CatalogError::Storage(e.to_string()))?;
                if matches!(user.role, bastion_common::model::Role::Admin) && user.is_active {
                    out.push(user.username);
                }
            }
            Ok(out)
        })
        .await
        .map_err(to_storage_error)?
    }

    async fn get_terminal_config(&self) -> CatalogResult<TerminalConfig> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(to_storage_error)?;
            let table = txn.open_table(CONFIG).map_err(to_storage_error)?;
            match table.get("terminal_config").map_err(to_storage_error)? {
                Some(bytes) => {
                    serde_json::from_slice(bytes.value()).map_err(|e| CatalogError::Storage(e.to_string()))
                }
                None => Ok(TerminalConfig::default()),
            }
        })
        .await
        .map_err(to_storage_error)?
    }

    async fn set_terminal_config(&self, config: &TerminalConfig) -> CatalogResult<()> {
        let db = self.db.clone();
        let config = config.clone();
        tokio::task::spawn_blocking(move || {
            let bytes = serde_json::to_vec(&config).map_err(|e| CatalogError::Storage(e.to_string()))?;
            let txn = db.begin_write().map_err(to_storage_error)?;
            {
                let mut table = txn.open_table(CONFIG).map_err(to_storage_error)?;
                table.insert("terminal_config", bytes.as_slice()).map_err(to_storage_error)?;
            }
            txn.commit().map_err(to_storage_error)
        })
        .await
        .map_err(to_storage_error)?
    }

    async fn append_audit_log(&self, kind: &str, username: &str, message: &str) -> CatalogResult<()> {
        let db = self.db.clone();
        let kind = kind.to_string();
        let username = username.to_string();
        let message = message.to_string();
        tokio::task::spawn_blocking(move || {
            let key = format!("{}_{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0), Uuid::new_v4());
            let entry = serde_json::json!({
                "kind": kind,
                "username": username,
                "message": message,
                "timestamp": chrono::Utc::now().timestamp(),
            });
            let bytes = serde_json::to_vec(&entry).map_err(|e| CatalogError::Storage(e.to_string()))?;
            let txn = db.begin_write().map_err(to_storage_error)?;
            {
                let mut table = txn.open_table(AUDIT_LOG).map_err(to_storage_error)?;
                table.insert(key.as_str(), bytes.as_slice()).map_err(to_storage_error)?;
            }
            txn.commit().map_err(to_storage_error)
        })
        .await
        .map_err(to_storage_error)?
    }
}

fn permissions_for(db: &Database, user_id: Uuid, asset_id: Uuid) -> anyhow::Result<Vec<AssetUserInfo>> {
    let txn = db.begin_read()?;
    let table = txn.open_table(PERMISSIONS)?;
    let mut out = Vec::new();
    for row in table.iter()? {
        let (_, value) = row?;
        let info: AssetUserInfo = serde_json::from_slice(value.value())?;
        if info.user_id == user_id && info.asset_id == asset_id {
            out.push(info);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_common::model::Role;
    use std::net::IpAddr;

    fn temp_store() -> Store {
        let path = std::env::temp_dir().join(format!("bastion-store-test-{}.redb", Uuid::new_v4()));
        Store::open(&path).unwrap()
    }

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "rick".into(),
            role: Role::User,
            expire_at: 0,
            otp_level: 0,
            is_active: true,
            node_ids: vec![],
            addr_allow_list: vec![],
        }
    }

    #[tokio::test]
    async fn get_user_round_trips_through_the_name_index() {
        let store = temp_store();
        let user = sample_user();
        store.put_user(&user).unwrap();

        let fetched = store.get_user("rick").await.unwrap();
        assert_eq!(fetched.id, user.id);

        assert!(matches!(store.get_user("nobody").await, Err(CatalogError::NotFound)));
    }

    #[tokio::test]
    async fn ticket_cas_only_succeeds_once_from_pending() {
        let store = temp_store();
        let ticket = LoginTicket::new("rick".into(), "elastic2".into(), "root".into());
        let id = ticket.ticket_id;
        store.create_ticket(ticket).await.unwrap();

        store
            .update_ticket_state(id, TicketState::Approved, "admin")
            .await
            .unwrap();

        let second = store.update_ticket_state(id, TicketState::Rejected, "admin2").await;
        assert!(matches!(second, Err(CatalogError::Conflict(_))));

        let (state, approver) = store.get_ticket_state(id).await.unwrap();
        assert_eq!(state, TicketState::Approved);
        assert_eq!(approver, "admin");
    }

    #[tokio::test]
    async fn addr_allow_list_roundtrip() {
        let store = temp_store();
        let mut user = sample_user();
        user.addr_allow_list = vec!["10.0.0.1".parse::<IpAddr>().unwrap()];
        store.put_user(&user).unwrap();
        let fetched = store.get_user("rick").await.unwrap();
        assert_eq!(fetched.addr_allow_list.len(), 1);
    }
}
