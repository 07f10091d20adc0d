//! Error types for the game server.
//!
//! Failures are split into network problems (binding, handshakes, sockets)
//! and internal ones (anything on the server's own side of the connection).

/// Enumeration of possible server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Network-related errors such as binding failures or connection issues
    #[error("Network error: {0}")]
    Network(String),

    /// Internal server errors such as a full connection table
    #[error("Internal error: {0}")]
    Internal(String),
}
