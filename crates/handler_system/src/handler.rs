//! Action identifiers, sessions and handler references.
//!
//! A [`HandlerRef`] is the unit the dispatch registry routes to. Two references
//! are equal only when they point at the same function object: matching is by
//! identity, never by name, so a reloaded module always produces references
//! that compare unequal to the previous generation's.

use crate::error::HandlerError;
use crate::module::ModulePath;
use libloading::Library;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

/// Opaque key naming the operation an inbound message requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ActionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for ActionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Severity of a message a handler logs through its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Target module log lines are emitted under.
pub const MODULE_LOG_TARGET: &str = "floe::module";

/// Per-connection context handed to a handler.
///
/// The network layer owns the concrete type; handlers only see this surface.
pub trait Session: Send {
    /// Identifier of the underlying connection.
    fn connection_id(&self) -> u64;

    /// Queues a message for delivery to the client.
    fn send(&mut self, message: Value);

    /// Requests that the connection be closed after pending messages flush.
    fn close(&mut self) {}

    /// Logs through the server's subscriber.
    ///
    /// Handler modules should log here rather than through their own
    /// `tracing`: a module library carries its own copy of the dispatcher,
    /// which the server never installs. This body is compiled with the
    /// session type, so it always runs in the host.
    fn log(&self, level: LogLevel, message: &str) {
        emit_module_log(level, self.connection_id(), message);
    }
}

/// Emits a handler's log line under [`MODULE_LOG_TARGET`].
pub fn emit_module_log(level: LogLevel, connection_id: u64, message: &str) {
    match level {
        LogLevel::Error => tracing::error!(target: MODULE_LOG_TARGET, connection_id, "{}", message),
        LogLevel::Warn => tracing::warn!(target: MODULE_LOG_TARGET, connection_id, "{}", message),
        LogLevel::Info => tracing::info!(target: MODULE_LOG_TARGET, connection_id, "{}", message),
        LogLevel::Debug => tracing::debug!(target: MODULE_LOG_TARGET, connection_id, "{}", message),
        LogLevel::Trace => tracing::trace!(target: MODULE_LOG_TARGET, connection_id, "{}", message),
    }
}

/// Signature every handler function satisfies.
pub type HandlerFn = dyn Fn(&mut dyn Session, &Value) -> Result<(), HandlerError> + Send + Sync;

/// Keeps the dynamic library a module generation came from mapped for as
/// long as any of its handler references are alive.
#[derive(Debug, Default)]
pub struct LibraryGuard {
    library: OnceLock<Library>,
}

impl LibraryGuard {
    pub(crate) fn hold(&self, library: Library) {
        if self.library.set(library).is_err() {
            tracing::warn!("Library guard already holds a library; ignoring the second one");
        }
    }
}

struct HandlerInner {
    // Field order matters: the function is dropped before its library guard.
    func: Box<HandlerFn>,
    name: String,
    origin: ModulePath,
    generation: u64,
    _library: Arc<LibraryGuard>,
}

/// Shared, identity-compared reference to one generation of a handler function.
#[derive(Clone)]
pub struct HandlerRef {
    inner: Arc<HandlerInner>,
}

impl HandlerRef {
    pub(crate) fn new(
        name: impl Into<String>,
        origin: ModulePath,
        generation: u64,
        func: Box<HandlerFn>,
        library: Arc<LibraryGuard>,
    ) -> Self {
        Self {
            inner: Arc::new(HandlerInner {
                func,
                name: name.into(),
                origin,
                generation,
                _library: library,
            }),
        }
    }

    /// Function name as declared by its module.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Module that defined this function.
    pub fn origin(&self) -> &ModulePath {
        &self.inner.origin
    }

    /// Generation of the defining module this function belongs to.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn invoke(&self, session: &mut dyn Session, data: &Value) -> Result<(), HandlerError> {
        (self.inner.func)(session, data)
    }

    /// True when both references point at the same function object.
    pub fn same_as(&self, other: &HandlerRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl PartialEq for HandlerRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for HandlerRef {}

impl Hash for HandlerRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRef")
            .field("name", &self.inner.name)
            .field("origin", &self.inner.origin)
            .field("generation", &self.inner.generation)
            .field("address", &format_args!("{:#x}", self.address()))
            .finish()
    }
}
