//! Connection manager for tracking and managing client connections.
//!
//! This module provides the central registry of live connections. It
//! enforces the connection cap, hands out connection IDs and asks every
//! connection to close at shutdown.

use super::{
    client::{ClientConnection, Outbound},
    ConnectionId,
};
use crate::error::ServerError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Central manager for all client connections.
///
/// # Architecture
///
/// * Uses `RwLock<HashMap>` for thread-safe connection storage
/// * Implements atomic connection ID generation
/// * Checks the cap and inserts under one write lock, so concurrent
///   handshakes can never overshoot `max_connections`
#[derive(Debug)]
pub struct ConnectionManager {
    /// Map of connection ID to client connection information
    connections: Arc<RwLock<HashMap<ConnectionId, ClientConnection>>>,

    /// Atomic counter for generating unique connection IDs
    next_id: Arc<AtomicU64>,

    max_connections: usize,
}

impl ConnectionManager {
    /// Creates a new connection manager admitting at most `max_connections`.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            max_connections,
        }
    }

    /// Adds a new connection and returns its unique ID.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Internal` when the server is already at its
    /// connection cap; nothing is registered in that case.
    pub async fn add_connection(
        &self,
        remote_addr: SocketAddr,
        outbound: UnboundedSender<Outbound>,
    ) -> Result<ConnectionId, ServerError> {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.max_connections {
            warn!(
                "🚫 Refusing connection from {}: limit of {} reached",
                remote_addr, self.max_connections
            );
            return Err(ServerError::Internal(format!(
                "connection limit of {} reached",
                self.max_connections
            )));
        }

        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        connections.insert(connection_id, ClientConnection::new(remote_addr, outbound));
        info!("🔗 Connection {} from {}", connection_id, remote_addr);
        Ok(connection_id)
    }

    /// Removes a connection from the manager.
    pub async fn remove_connection(&self, connection_id: ConnectionId) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.remove(&connection_id) {
            let lifetime = connection.connected_at.elapsed().unwrap_or_default();
            info!(
                "❌ Connection {} from {} disconnected after {:.1}s",
                connection_id,
                connection.remote_addr,
                lifetime.as_secs_f64()
            );
        }
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Asks every connection to send a close frame and stop.
    pub async fn close_all(&self) -> usize {
        let connections = self.connections.read().await;
        for connection in connections.values() {
            let _ = connection.outbound.send(Outbound::Close);
        }
        connections.len()
    }
}
