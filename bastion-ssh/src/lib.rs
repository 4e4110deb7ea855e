pub mod bridge;
pub mod client;
pub mod error;
pub mod keys;
pub mod server;

pub use client::Dialer;
pub use error::SshError;
pub use server::{run_server, BastionServices, ServerHandler};
