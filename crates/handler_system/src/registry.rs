//! Dispatch registry.
//!
//! The registry is the only routing source the network layer consults. It
//! holds an immutable [`RouteTable`] behind an [`ArcSwap`]: readers load the
//! current table without locking, and writers build a complete replacement
//! off to the side before swapping it in. A reader therefore observes either
//! the table before a write or the table after it, never a half-applied one.

use crate::error::{DispatchError, HandlerError};
use crate::handler::{ActionId, HandlerRef, Session};
use crate::listener::ListenerTable;
use crate::module::{LoadedModule, ModulePath};
use crate::scanner::scan_module;
use arc_swap::ArcSwap;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Which discovered units a build includes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFilter {
    /// Every discovered unit.
    All,
    /// Only the listed modules, or modules underneath a listed package.
    AllowList(BTreeSet<ModulePath>),
}

impl ScopeFilter {
    pub fn allow_list<I, P>(modules: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ModulePath>,
    {
        ScopeFilter::AllowList(modules.into_iter().map(Into::into).collect())
    }

    pub fn includes(&self, module: &ModulePath) -> bool {
        match self {
            ScopeFilter::All => true,
            ScopeFilter::AllowList(allowed) => allowed.iter().any(|a| module.is_within(a)),
        }
    }
}

/// One live route.
#[derive(Debug, Clone)]
pub struct DispatchEntry {
    pub action: ActionId,
    pub handler: HandlerRef,
    pub origin: ModulePath,
    pub generation: u64,
}

/// Immutable `action -> entry` mapping published by the registry.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<ActionId, DispatchEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, action: &str) -> Option<&DispatchEntry> {
        self.routes.get(action)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DispatchEntry> {
        self.routes.values()
    }

    /// All routed actions, sorted.
    pub fn actions(&self) -> Vec<ActionId> {
        let mut actions: Vec<ActionId> = self.routes.keys().cloned().collect();
        actions.sort();
        actions
    }

    /// Actions currently routed to functions of `module`, sorted.
    pub fn entries_from(&self, module: &ModulePath) -> Vec<ActionId> {
        let mut actions: Vec<ActionId> = self
            .routes
            .values()
            .filter(|e| &e.origin == module)
            .map(|e| e.action.clone())
            .collect();
        actions.sort();
        actions
    }

    /// Inserts `entry`, returning the entry it replaced.
    pub fn insert(&mut self, entry: DispatchEntry) -> Option<DispatchEntry> {
        self.routes.insert(entry.action.clone(), entry)
    }

    /// Removes and returns every entry whose origin is `module`.
    pub fn purge_module(&mut self, module: &ModulePath) -> Vec<DispatchEntry> {
        let actions = self.entries_from(module);
        actions
            .iter()
            .filter_map(|action| self.routes.remove(action.as_str()))
            .collect()
    }

    /// Inserts `entry`, warning when it takes an action away from another module.
    pub(crate) fn merge(&mut self, entry: DispatchEntry) {
        let (action, origin) = (entry.action.clone(), entry.origin.clone());
        if let Some(previous) = self.insert(entry) {
            if previous.origin != origin {
                warn!(
                    "⚠️ Action '{}' is served by both {} and {}; {} wins",
                    action, previous.origin, origin, origin
                );
            }
        }
    }
}

/// Matches a module's functions against the listener table by identity.
///
/// When several of the module's functions listen on one action, the last
/// registered listener wins.
pub fn match_module(functions: &[HandlerRef], listeners: &ListenerTable) -> Vec<DispatchEntry> {
    let owned: HashSet<&HandlerRef> = functions.iter().collect();
    let mut entries = Vec::new();

    for (action, descriptors) in listeners.iter() {
        let mut chosen: Option<&HandlerRef> = None;
        for descriptor in descriptors.iter().filter(|d| owned.contains(&d.handler)) {
            if let Some(previous) = chosen {
                if !previous.same_as(&descriptor.handler) {
                    debug!(
                        "Action '{}' bound twice in {}: {} replaces {}",
                        action,
                        descriptor.handler.origin(),
                        descriptor.handler.name(),
                        previous.name()
                    );
                }
            }
            chosen = Some(&descriptor.handler);
        }

        if let Some(handler) = chosen {
            entries.push(DispatchEntry {
                action: action.clone(),
                handler: handler.clone(),
                origin: handler.origin().clone(),
                generation: handler.generation(),
            });
        }
    }
    entries
}

/// Builds a route table from loaded modules given in discovery order.
///
/// Out-of-scope modules contribute nothing. For an action claimed by two
/// modules, the one discovered later wins and a warning is logged.
pub fn build(units: &[LoadedModule], listeners: &ListenerTable, scope: &ScopeFilter) -> RouteTable {
    let mut table = RouteTable::new();
    for module in units {
        if !scope.includes(&module.path) {
            debug!("⏭️ {} is out of scope", module.path);
            continue;
        }
        let functions = scan_module(module);
        let entries = match_module(&functions, listeners);
        debug!(
            "🔗 {}: {} function(s), {} route(s)",
            module.path,
            functions.len(),
            entries.len()
        );
        for entry in entries {
            table.merge(entry);
        }
    }
    table
}

/// The live, swappable routing table.
#[derive(Debug, Default)]
pub struct DispatchRegistry {
    routes: ArcSwap<RouteTable>,
    write_lock: Mutex<()>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_table(table: RouteTable) -> Self {
        Self {
            routes: ArcSwap::from_pointee(table),
            write_lock: Mutex::new(()),
        }
    }

    /// Handler currently serving `action`.
    pub fn lookup(&self, action: &str) -> Option<HandlerRef> {
        self.routes.load().get(action).map(|e| e.handler.clone())
    }

    pub fn entry(&self, action: &str) -> Option<DispatchEntry> {
        self.routes.load().get(action).cloned()
    }

    /// The currently published table.
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.routes.load_full()
    }

    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.load().is_empty()
    }

    pub fn actions(&self) -> Vec<ActionId> {
        self.routes.load().actions()
    }

    /// Looks up `action` and runs its handler.
    ///
    /// A miss is reported as [`DispatchError::UnknownAction`], distinct from
    /// a handler that ran and failed. Panics inside the handler are caught.
    pub fn dispatch(&self, action: &str, session: &mut dyn Session, data: &Value) -> Result<(), DispatchError> {
        let handler = self
            .lookup(action)
            .ok_or_else(|| DispatchError::UnknownAction(action.to_string()))?;

        let result = catch_unwind(AssertUnwindSafe(|| handler.invoke(session, data)))
            .unwrap_or_else(|panic_info| {
                let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                Err(HandlerError::Panicked(message))
            });

        result.map_err(|source| DispatchError::Handler {
            action: action.to_string(),
            source,
        })
    }

    /// Publishes `table` wholesale.
    pub fn replace(&self, table: RouteTable) {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.routes.store(Arc::new(table));
    }

    /// Applies `f` to a private copy of the table and publishes the result
    /// in one swap. Writers are serialized; readers are never blocked.
    pub fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut RouteTable) -> R,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut staged = RouteTable::clone(&self.routes.load());
        let result = f(&mut staged);
        self.routes.store(Arc::new(staged));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::RecordingSession;
    use crate::listener::ModuleRegistrar;
    use serde_json::json;

    fn noop(_: &mut dyn Session, _: &Value) -> Result<(), HandlerError> {
        Ok(())
    }

    fn load<F>(path: &str, listeners: &ListenerTable, register: F) -> LoadedModule
    where
        F: FnOnce(&mut ModuleRegistrar),
    {
        let mut registrar = ModuleRegistrar::new(ModulePath::new(path), 1);
        register(&mut registrar);
        registrar.commit(listeners).unwrap()
    }

    #[test]
    fn test_zero_matches_yields_no_entries() {
        let listeners = ListenerTable::new();
        let module = load("Handlers.Utils", &listeners, |m| {
            m.function("format_room_list", noop);
        });

        let table = build(&[module], &listeners, &ScopeFilter::All);
        assert!(table.is_empty());
    }

    #[test]
    fn test_scope_filter_restricts_build() {
        let listeners = ListenerTable::new();
        let handshake = load("Handlers.Login.Handshake", &listeners, |m| {
            m.handler("h#l", "handle_login", noop);
        });
        let join = load("Handlers.World.Join", &listeners, |m| {
            m.handler("j#j", "handle_join", noop);
        });
        let units = [handshake.clone(), join];

        let scoped = build(&units, &listeners, &ScopeFilter::allow_list(["Handlers.Login.Handshake"]));
        assert!(scoped.get("h#l").unwrap().handler.same_as(&handshake.namespace[0]));
        assert!(scoped.get("j#j").is_none());

        let full = build(&units, &listeners, &ScopeFilter::All);
        assert_eq!(full.len(), 2);

        assert!(ScopeFilter::allow_list(["Handlers.World"]).includes(&ModulePath::new("Handlers.World.Join")));
    }

    #[test]
    fn test_duplicate_action_later_unit_wins() {
        let listeners = ListenerTable::new();
        let first = load("Handlers.A", &listeners, |m| {
            m.handler("dup", "first", noop);
        });
        let second = load("Handlers.B", &listeners, |m| {
            m.handler("dup", "second", noop);
        });

        let table = build(&[first.clone(), second.clone()], &listeners, &ScopeFilter::All);
        let entry = table.get("dup").unwrap();
        assert!(entry.handler.same_as(&second.namespace[0]));
        assert_eq!(entry.origin.as_str(), "Handlers.B");

        let reversed = build(&[second, first.clone()], &listeners, &ScopeFilter::All);
        assert!(reversed.get("dup").unwrap().handler.same_as(&first.namespace[0]));
    }

    #[test]
    fn test_matching_is_by_identity_not_name() {
        let listeners = ListenerTable::new();
        // Same function name in two modules, only one of them listens.
        let login = load("Handlers.Login", &listeners, |m| {
            m.handler("l#l", "handle", noop);
        });
        let world = load("Handlers.World", &listeners, |m| {
            m.function("handle", noop);
        });

        let table = build(&[login.clone(), world], &listeners, &ScopeFilter::All);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("l#l").unwrap().origin.as_str(), "Handlers.Login");
        assert!(table.entries_from(&ModulePath::new("Handlers.World")).is_empty());
    }

    #[test]
    fn test_later_listener_wins_within_module() {
        let listeners = ListenerTable::new();
        let module = load("Handlers.Chat", &listeners, |m| {
            m.handler("m#sm", "send_message", noop);
            m.handler("m#sm", "send_message_filtered", noop);
        });

        let table = build(&[module.clone()], &listeners, &ScopeFilter::All);
        assert_eq!(table.get("m#sm").unwrap().handler.name(), "send_message_filtered");
    }

    #[test]
    fn test_update_publishes_in_one_swap() {
        let listeners = ListenerTable::new();
        let module = load("Handlers.Login.Handshake", &listeners, |m| {
            m.handler("verChk", "version", noop);
            m.handler("rndK", "random_key", noop);
        });
        let registry = DispatchRegistry::from_table(build(&[module], &listeners, &ScopeFilter::All));
        let before = registry.snapshot();

        let purged = registry.update(|routes| routes.purge_module(&ModulePath::new("Handlers.Login.Handshake")));

        assert_eq!(purged.len(), 2);
        assert_eq!(before.len(), 2);
        assert!(registry.is_empty());
        assert!(registry.lookup("verChk").is_none());
    }

    #[test]
    fn test_dispatch_distinguishes_miss_and_failure() {
        let listeners = ListenerTable::new();
        let module = load("Handlers.Login.Handshake", &listeners, |m| {
            m.handler("verChk", "version", |session: &mut dyn Session, data: &Value| {
                if data["version"] != json!(153) {
                    return Err(HandlerError::InvalidPayload("unsupported version".to_string()));
                }
                session.send(json!({"action": "apiOK"}));
                Ok(())
            });
            m.handler("boom", "explode", |_: &mut dyn Session, _: &Value| -> Result<(), HandlerError> {
                panic!("handler bug")
            });
        });
        let registry = DispatchRegistry::from_table(build(&[module], &listeners, &ScopeFilter::All));
        let mut session = RecordingSession::default();

        registry.dispatch("verChk", &mut session, &json!({"version": 153})).unwrap();
        assert_eq!(session.sent, vec![json!({"action": "apiOK"})]);

        assert!(matches!(
            registry.dispatch("nope", &mut session, &Value::Null),
            Err(DispatchError::UnknownAction(a)) if a == "nope"
        ));
        assert!(matches!(
            registry.dispatch("verChk", &mut session, &json!({"version": 1})),
            Err(DispatchError::Handler { source: HandlerError::InvalidPayload(_), .. })
        ));
        assert!(matches!(
            registry.dispatch("boom", &mut session, &Value::Null),
            Err(DispatchError::Handler { source: HandlerError::Panicked(_), .. })
        ));
    }
}
