use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::net::TcpListener;

use crate::error::BastionError;

/// A `host:port` pair, deserialized from a plain string and resolved lazily.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenEndpoint(pub SocketAddr);

impl ListenEndpoint {
    pub fn addr(&self) -> SocketAddr {
        self.0
    }

    pub async fn tcp_listener(&self) -> Result<TcpListener, BastionError> {
        TcpListener::bind(self.0).await.map_err(BastionError::Io)
    }
}

impl fmt::Display for ListenEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ListenEndpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ListenEndpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let addr = s
            .to_socket_addrs()
            .map_err(|e| D::Error::custom(format!("invalid listen address {s}: {e}")))?
            .next()
            .ok_or_else(|| D::Error::custom(format!("could not resolve {s}")))?;
        Ok(Self(addr))
    }
}
