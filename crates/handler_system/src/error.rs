//! Error types for handler discovery, loading, dispatch and reload.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HandlerSystemError {
    #[error("Handler tree error: {0}")]
    Discovery(String),

    #[error("Import of handler module {module} failed: {reason}")]
    ImportFailed { module: String, reason: String },

    #[error("Library loading error: {0}")]
    LibraryError(String),

    #[error("Handler module version mismatch: {0}")]
    VersionMismatch(String),

    #[error("Invalid plugin manifest {path}: {reason}")]
    Manifest { path: String, reason: String },

    #[error("Unknown handler module: {0}")]
    UnknownModule(String),

    #[error("Reload of {module} failed, {} action(s) left unroutable: {source}", unroutable.len())]
    ReloadFailed {
        module: String,
        unroutable: Vec<String>,
        source: Box<HandlerSystemError>,
    },

    #[error("File watcher error: {0}")]
    Watch(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failure raised from inside a handler or a module's registration code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

/// Result of routing one inbound action through the registry.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Handler for {action} failed: {source}")]
    Handler {
        action: String,
        #[source]
        source: HandlerError,
    },
}
