//! Client connection representation and the session handlers write to.

use super::ConnectionId;
use handler_system::Session;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::SystemTime;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

/// Item queued for a connection's writer half.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A JSON message, sent as one text frame
    Message(Value),
    /// Send a close frame and stop writing
    Close,
}

/// Represents an individual client connection to the server.
///
/// # Fields
///
/// * `remote_addr` - The network address of the connected client
/// * `connected_at` - Timestamp when the connection was established
/// * `outbound` - Queue drained by the connection's writer task
#[derive(Debug)]
pub struct ClientConnection {
    /// The remote network address of the client
    pub remote_addr: SocketAddr,

    /// When this connection was established
    pub connected_at: SystemTime,

    /// Queue drained by the connection's writer task
    pub outbound: UnboundedSender<Outbound>,
}

impl ClientConnection {
    /// Creates a new client connection record stamped with the current time.
    pub fn new(remote_addr: SocketAddr, outbound: UnboundedSender<Outbound>) -> Self {
        Self {
            remote_addr,
            connected_at: SystemTime::now(),
            outbound,
        }
    }
}

/// [`Session`] implementation backed by a connection's outbound queue.
///
/// Sends never block: messages are queued and written by the connection's
/// writer task in order. Once the writer has gone away, sends are dropped.
#[derive(Debug, Clone)]
pub struct ClientSession {
    connection_id: ConnectionId,
    outbound: UnboundedSender<Outbound>,
}

impl ClientSession {
    pub fn new(connection_id: ConnectionId, outbound: UnboundedSender<Outbound>) -> Self {
        Self {
            connection_id,
            outbound,
        }
    }
}

impl Session for ClientSession {
    fn connection_id(&self) -> u64 {
        self.connection_id
    }

    fn send(&mut self, message: Value) {
        if self.outbound.send(Outbound::Message(message)).is_err() {
            trace!("Dropping message for closed connection {}", self.connection_id);
        }
    }

    fn close(&mut self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}
