//! # Game Server
//!
//! The network front of a Floe server. It accepts WebSocket clients, parses
//! each text frame as an action envelope and routes it through the shared
//! [`DispatchRegistry`](handler_system::DispatchRegistry).
//!
//! ## Design Philosophy
//!
//! The server core contains **no handler logic**. It only provides infrastructure:
//!
//! * **WebSocket connection management** - Accepts clients, enforces the connection cap
//! * **Per-message routing** - Every frame is looked up in the live route table
//! * **Graceful shutdown** - Shared [`ShutdownState`] stops the accept loop and closes clients
//!
//! Handlers live in handler modules discovered and hot-reloaded by
//! `handler_system`; the server only ever sees the routes they publish.
//!
//! ## Message Flow
//!
//! 1. Client sends a text frame `{"action": "...", "data": ...}`
//! 2. Server parses the envelope
//! 3. The action id is looked up in the registry's current snapshot
//! 4. The handler runs against the connection's [`ClientSession`](connection::ClientSession)
//! 5. Anything the handler sends is queued and written back in order
//!
//! Envelopes that cannot be served are answered with one of three distinct
//! replies: `malformed_message`, `unknown_action` or `handler_failed`.
//!
//! ## Error Handling
//!
//! The server uses structured error types ([`ServerError`]) to categorize failures:
//!
//! * **Network errors** - Binding, handshake and protocol issues
//! * **Internal errors** - Routing failures and a full connection table
//!
//! ## Thread Safety
//!
//! * Connection management uses `Arc<RwLock<HashMap>>` for thread-safe state
//! * Route lookups never lock; the reload coordinator swaps whole tables

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::GameServer;
pub use shutdown::ShutdownState;
pub use utils::{create_server, create_server_with_config};

pub mod config;
pub mod connection;
pub mod error;
pub mod messaging;
pub mod server;
pub mod shutdown;
pub mod utils;
