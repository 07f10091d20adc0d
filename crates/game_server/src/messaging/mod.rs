//! Message handling and routing for client-server communication.
//!
//! This module parses inbound envelopes and hands them to the dispatch
//! registry, replying to the client when an envelope cannot be served.

pub mod router;
pub mod types;

pub use router::route_client_message;
pub use types::{ClientMessage, ErrorReply};
