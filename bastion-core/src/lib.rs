pub mod auth_gate;
pub mod catalog;
pub mod client_cache;
pub mod logging;
pub mod recorder;
pub mod services;
pub mod session_registry;
pub mod ticket_machine;

pub use catalog::{Catalog, CatalogError, CatalogResult};
pub use services::Services;
