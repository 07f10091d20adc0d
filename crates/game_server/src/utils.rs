//! Utility functions and helper methods for the game server.

use crate::{config::ServerConfig, server::GameServer};
use handler_system::DispatchRegistry;
use std::sync::Arc;

/// Creates a new game server with default configuration.
///
/// # Example
///
/// ```rust
/// use game_server::create_server;
/// use handler_system::DispatchRegistry;
/// use std::sync::Arc;
///
/// let server = create_server(Arc::new(DispatchRegistry::new()));
/// assert_eq!(server.config().max_connections, 1000);
/// ```
pub fn create_server(registry: Arc<DispatchRegistry>) -> GameServer {
    GameServer::new(ServerConfig::default(), registry)
}

/// Creates a new game server with custom configuration.
///
/// # Example
///
/// ```rust
/// use game_server::{create_server_with_config, ServerConfig};
/// use handler_system::DispatchRegistry;
/// use std::sync::Arc;
///
/// let config = ServerConfig {
///     bind_address: "0.0.0.0:9875".parse().unwrap(),
///     max_connections: 5000,
///     ..Default::default()
/// };
///
/// let server = create_server_with_config(config, Arc::new(DispatchRegistry::new()));
/// # let _ = server;
/// ```
pub fn create_server_with_config(config: ServerConfig, registry: Arc<DispatchRegistry>) -> GameServer {
    GameServer::new(config, registry)
}
