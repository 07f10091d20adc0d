//! Connection management for client connections.
//!
//! This module handles the lifecycle of client connections: registration
//! against the connection cap, the per-connection [`Session`] handed to
//! handlers, and the outbound queue each connection's writer drains.
//!
//! [`Session`]: handler_system::Session

pub mod client;
pub mod manager;

pub use client::{ClientConnection, ClientSession, Outbound};
pub use manager::ConnectionManager;

/// Type alias for connection identifiers.
///
/// Connection IDs are used to uniquely identify client connections
/// throughout their lifecycle on the server.
pub type ConnectionId = u64;
