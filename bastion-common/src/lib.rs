pub mod config;
pub mod error;
pub mod helpers;
pub mod model;
pub mod types;

pub use error::BastionError;
pub use types::secret::Secret;
