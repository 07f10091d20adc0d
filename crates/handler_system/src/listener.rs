//! The action listener table and the registrar modules write into.
//!
//! Every execution of a module's registration code goes through a
//! [`ModuleRegistrar`]. The registrar stages the module's listener descriptors
//! and hands them to the [`ListenerTable`] in one commit once the execution
//! has succeeded; a failed execution leaves the table untouched.

use crate::error::{HandlerError, HandlerSystemError};
use crate::handler::{ActionId, HandlerRef, LibraryGuard, Session};
use crate::module::{LoadedModule, ModulePath};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

/// Binds one action identifier to one handler.
#[derive(Debug, Clone)]
pub struct ListenerDescriptor {
    pub action: ActionId,
    pub handler: HandlerRef,
    /// Module whose execution produced this registration. Usually the
    /// handler's origin, but a module may listen with an imported handler.
    pub registered_by: ModulePath,
}

/// Process-wide `action -> [ListenerDescriptor]` table.
///
/// Owned by the host and handed to every module execution, so modules never
/// reach for a global of their own.
#[derive(Debug, Default)]
pub struct ListenerTable {
    listeners: DashMap<ActionId, Vec<ListenerDescriptor>>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a registration made outside of a module execution.
    pub fn register(&self, action: impl Into<ActionId>, handler: HandlerRef) {
        let action = action.into();
        let registered_by = handler.origin().clone();
        self.listeners
            .entry(action.clone())
            .or_default()
            .push(ListenerDescriptor {
                action,
                handler,
                registered_by,
            });
    }

    /// Descriptors registered for `action`, in registration order.
    pub fn listeners(&self, action: &str) -> Vec<ListenerDescriptor> {
        self.listeners
            .get(action)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Snapshot of every `(action, descriptors)` pair, sorted by action.
    pub fn iter(&self) -> Vec<(ActionId, Vec<ListenerDescriptor>)> {
        let mut pairs: Vec<_> = self
            .listeners
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs
    }

    /// Number of distinct actions with at least one listener.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Replaces everything `module` registered previously with `staged`.
    pub(crate) fn commit_module(&self, module: &ModulePath, staged: Vec<ListenerDescriptor>) {
        for mut entry in self.listeners.iter_mut() {
            entry.value_mut().retain(|d| &d.registered_by != module);
        }
        self.listeners.retain(|_, descriptors| !descriptors.is_empty());

        let count = staged.len();
        for descriptor in staged {
            self.listeners
                .entry(descriptor.action.clone())
                .or_default()
                .push(descriptor);
        }
        trace!("Committed {} listener(s) for {}", count, module);
    }
}

/// Handed to a module's registration entry point for one execution.
///
/// ```ignore
/// fn register(module: &mut ModuleRegistrar) {
///     module.handler("verChk", "handle_version_check", |session, data| {
///         session.send(serde_json::json!({ "ok": data["version"] == 153 }));
///         Ok(())
///     });
/// }
/// ```
#[derive(Debug)]
pub struct ModuleRegistrar {
    module: ModulePath,
    generation: u64,
    library: Arc<LibraryGuard>,
    namespace: Vec<HandlerRef>,
    staged: Vec<ListenerDescriptor>,
    failure: Option<String>,
}

impl ModuleRegistrar {
    pub fn new(module: ModulePath, generation: u64) -> Self {
        Self {
            module,
            generation,
            library: Arc::new(LibraryGuard::default()),
            namespace: Vec::new(),
            staged: Vec::new(),
            failure: None,
        }
    }

    /// Path of the module being executed.
    pub fn module(&self) -> &ModulePath {
        &self.module
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Defines a top-level handler function in this module.
    pub fn function<F>(&mut self, name: &str, f: F) -> HandlerRef
    where
        F: Fn(&mut dyn Session, &Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler = HandlerRef::new(
            name,
            self.module.clone(),
            self.generation,
            Box::new(f),
            self.library.clone(),
        );
        self.namespace.push(handler.clone());
        handler
    }

    /// Registers `handler` as a listener for `action`.
    pub fn listen(&mut self, action: impl Into<ActionId>, handler: &HandlerRef) {
        self.staged.push(ListenerDescriptor {
            action: action.into(),
            handler: handler.clone(),
            registered_by: self.module.clone(),
        });
    }

    /// Defines a function and registers it for `action` in one go.
    pub fn handler<F>(&mut self, action: impl Into<ActionId>, name: &str, f: F) -> HandlerRef
    where
        F: Fn(&mut dyn Session, &Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler = self.function(name, f);
        self.listen(action, &handler);
        handler
    }

    /// Brings a handler defined by another module into this namespace.
    pub fn import(&mut self, handler: &HandlerRef) {
        self.namespace.push(handler.clone());
    }

    /// Aborts this execution; nothing staged is committed.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Guard the loader parks the module's library in.
    pub(crate) fn keep_alive(&self) -> Arc<LibraryGuard> {
        self.library.clone()
    }

    /// Publishes the staged listeners and returns the executed module.
    pub fn commit(self, table: &ListenerTable) -> Result<LoadedModule, HandlerSystemError> {
        if let Some(reason) = self.failure {
            return Err(HandlerSystemError::ImportFailed {
                module: self.module.to_string(),
                reason,
            });
        }

        table.commit_module(&self.module, self.staged);
        Ok(LoadedModule {
            path: self.module,
            generation: self.generation,
            namespace: self.namespace,
        })
    }
}
