//! Server configuration types and defaults.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Configuration structure for the game server.
///
/// Contains the network settings the accept loop needs. Everything about
/// which handlers exist lives in the dispatch registry handed to
/// [`GameServer::new`](crate::GameServer::new).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// Largest inbound WebSocket message accepted, in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 6112)),
            max_connections: 1000,
            max_message_size: 64 * 1024, // 64KB
        }
    }
}
