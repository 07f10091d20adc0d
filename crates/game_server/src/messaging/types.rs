//! Message type definitions for client-server communication.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A message sent from a client to the server.
///
/// # Fields
///
/// * `action` - The action id the dispatch registry routes on (e.g. `"verChk"`, `"j#j"`)
/// * `data` - The payload handed to the handler; `null` when omitted
///
/// # Examples
///
/// ```json
/// {
///   "action": "verChk",
///   "data": { "version": 153 }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// The action id that selects the handler
    pub action: String,

    /// The message payload as a JSON value
    #[serde(default)]
    pub data: Value,
}

/// Replies sent when an envelope could not be served.
///
/// The three cases are distinct on the wire so a client can tell a bad
/// frame from an action nobody handles from a handler that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorReply {
    MalformedMessage,
    UnknownAction(String),
    HandlerFailed(String),
}

impl ErrorReply {
    pub fn to_json(&self) -> Value {
        match self {
            ErrorReply::MalformedMessage => json!({ "error": "malformed_message" }),
            ErrorReply::UnknownAction(action) => json!({ "error": "unknown_action", "action": action }),
            ErrorReply::HandlerFailed(action) => json!({ "error": "handler_failed", "action": action }),
        }
    }
}
