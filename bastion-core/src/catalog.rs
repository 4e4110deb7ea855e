//! The narrow contract (spec.md §4.1) between the connection-mediation core
//! and whatever backs the operational store. `bastion-store` is the only
//! implementation, but components here depend on the trait, not on redb,
//! so the storage choice stays an implementation detail behind §1's
//! explicit externalization of storage.

use async_trait::async_trait;
use uuid::Uuid;

use bastion_common::model::{Asset, AssetUserInfo, LoginTicket, SystemUser, TerminalConfig, TicketState, User, UserSecret};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_user(&self, name: &str) -> CatalogResult<User>;
    async fn get_user_secret(&self, user_id: Uuid) -> CatalogResult<UserSecret>;
    async fn get_asset(&self, id: Uuid) -> CatalogResult<Asset>;
    async fn get_asset_by_name(&self, name: &str) -> CatalogResult<Asset>;
    async fn get_all_permitted_assets(&self, node_ids: &[String]) -> CatalogResult<Vec<Asset>>;
    async fn get_system_users_for_permission(
        &self,
        user_id: Uuid,
        asset_id: Uuid,
    ) -> CatalogResult<Vec<SystemUser>>;
    async fn get_permission_expiry(&self, user_id: Uuid, asset_id: Uuid) -> CatalogResult<i64>;
    async fn needs_login_confirm(&self, user_id: Uuid, asset_id: Uuid) -> CatalogResult<bool>;

    async fn create_ticket(&self, ticket: LoginTicket) -> CatalogResult<()>;
    async fn get_ticket_state(&self, ticket_id: Uuid) -> CatalogResult<(TicketState, String)>;
    /// Succeeds only when the ticket's current state is `Pending`.
    async fn update_ticket_state(
        &self,
        ticket_id: Uuid,
        new_state: TicketState,
        approver: &str,
    ) -> CatalogResult<()>;

    async fn get_reviewers(&self) -> CatalogResult<Vec<String>>;
    async fn get_terminal_config(&self) -> CatalogResult<TerminalConfig>;
    /// Persists a freshly generated host key (or any other terminal
    /// setting change) so it is stable across restarts.
    async fn set_terminal_config(&self, config: &TerminalConfig) -> CatalogResult<()>;
    async fn append_audit_log(&self, kind: &str, username: &str, message: &str) -> CatalogResult<()>;
}
