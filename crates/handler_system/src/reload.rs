//! Reload coordinator.
//!
//! Owns the per-module descriptors and drives the walker, the loader and the
//! registry, both for the initial bootstrap and for single-module reloads
//! triggered by file changes.
//!
//! A reload of a module that is already routed stages its new entries before
//! touching the registry, then purges the old generation and inserts the new
//! one in a single swap. When the module's registration code fails, the purge
//! is still published: the module's actions become unroutable rather than
//! keep pointing at functions from a superseded generation.

use crate::error::HandlerSystemError;
use crate::handler::ActionId;
use crate::listener::ListenerTable;
use crate::loader::ModuleLoader;
use crate::module::{DiscoveryUnit, ModuleDescriptor, ModulePath};
use crate::registry::{build, match_module, DispatchRegistry, ScopeFilter};
use crate::scanner::scan_module;
use crate::walker::HandlerTree;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Generation assigned to a module on its first successful load.
pub const INITIAL_GENERATION: u64 = 1;

/// What a change notification resulted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A module seen for the first time was loaded and merged.
    Loaded {
        module: ModulePath,
        generation: u64,
        actions: Vec<ActionId>,
    },
    /// A routed module was re-executed and its routes replaced.
    Reloaded {
        module: ModulePath,
        generation: u64,
        added: Vec<ActionId>,
        removed: Vec<ActionId>,
    },
    /// The path is not a handler module.
    Ignored(PathBuf),
    /// The module exists but this server's scope excludes it.
    OutOfScope(ModulePath),
}

pub struct ReloadCoordinator {
    tree: HandlerTree,
    scope: ScopeFilter,
    loader: Arc<dyn ModuleLoader>,
    listeners: Arc<ListenerTable>,
    registry: Arc<DispatchRegistry>,
    modules: HashMap<ModulePath, ModuleDescriptor>,
}

impl ReloadCoordinator {
    pub fn new(
        tree: HandlerTree,
        scope: ScopeFilter,
        loader: Arc<dyn ModuleLoader>,
        listeners: Arc<ListenerTable>,
        registry: Arc<DispatchRegistry>,
    ) -> Self {
        Self {
            tree,
            scope,
            loader,
            listeners,
            registry,
            modules: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<DispatchRegistry> {
        &self.registry
    }

    pub fn listeners(&self) -> &Arc<ListenerTable> {
        &self.listeners
    }

    pub fn tree(&self) -> &HandlerTree {
        &self.tree
    }

    pub fn scope(&self) -> &ScopeFilter {
        &self.scope
    }

    pub fn module(&self, path: &ModulePath) -> Option<&ModuleDescriptor> {
        self.modules.get(path)
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Discovers, loads and routes every in-scope unit.
    ///
    /// Any discovery or import failure aborts the bootstrap; the registry is
    /// only published once every in-scope module has loaded.
    pub fn bootstrap(&mut self) -> Result<usize, HandlerSystemError> {
        let units = self.tree.walk()?;
        info!(
            "🔍 Found {} handler unit(s) in {} ({})",
            units.len(),
            self.tree.package(),
            self.tree.root().display()
        );

        let in_scope: Vec<DiscoveryUnit> = units
            .into_iter()
            .filter(|unit| {
                let included = self.scope.includes(unit.path());
                if !included {
                    debug!("⏭️ Skipping {} (out of scope)", unit.path());
                }
                included
            })
            .collect();

        if let ScopeFilter::AllowList(allowed) = &self.scope {
            for module in allowed {
                if !in_scope.iter().any(|unit| unit.path().is_within(module)) {
                    warn!("⚠️ Scoped module {} was not found in the handler tree", module);
                }
            }
        }

        let mut loaded = Vec::with_capacity(in_scope.len());
        for unit in &in_scope {
            let module = self.loader.load(unit, INITIAL_GENERATION, &self.listeners)?;
            loaded.push(module);
        }

        let table = build(&loaded, &self.listeners, &ScopeFilter::All);
        let routes = table.len();

        for (unit, module) in in_scope.into_iter().zip(&loaded) {
            let descriptor = ModuleDescriptor::new(unit, scan_module(module), INITIAL_GENERATION);
            self.modules.insert(descriptor.path.clone(), descriptor);
        }
        self.registry.replace(table);

        info!(
            "🎉 Handler bootstrap complete: {} module(s), {} route(s)",
            self.modules.len(),
            routes
        );
        Ok(routes)
    }

    /// Reacts to a created or modified file under the handler tree.
    pub fn handle_change(&mut self, path: &Path) -> Result<ReloadOutcome, HandlerSystemError> {
        let Some(unit) = self.tree.unit_for_path(path)? else {
            debug!("Ignoring change to {}", path.display());
            return Ok(ReloadOutcome::Ignored(path.to_path_buf()));
        };
        self.reload_unit(unit)
    }

    /// Reloads a module by dotted path.
    pub fn reload(&mut self, module: &ModulePath) -> Result<ReloadOutcome, HandlerSystemError> {
        let unit = self
            .tree
            .unit_for_module(module)?
            .ok_or_else(|| HandlerSystemError::UnknownModule(module.to_string()))?;
        self.reload_unit(unit)
    }

    fn reload_unit(&mut self, unit: DiscoveryUnit) -> Result<ReloadOutcome, HandlerSystemError> {
        if !self.scope.includes(unit.path()) {
            debug!("⏭️ Change to {} ignored (out of scope)", unit.path());
            return Ok(ReloadOutcome::OutOfScope(unit.path().clone()));
        }

        match self.modules.get(unit.path()).map(|d| d.generation) {
            Some(generation) => self.reload_existing(unit, generation),
            None => self.load_fresh(unit),
        }
    }

    fn load_fresh(&mut self, unit: DiscoveryUnit) -> Result<ReloadOutcome, HandlerSystemError> {
        let module_path = unit.path().clone();
        let loaded = self
            .loader
            .load(&unit, INITIAL_GENERATION, &self.listeners)
            .inspect_err(|e| error!("❌ Failed to load new handler module {}: {}", module_path, e))?;

        let functions = scan_module(&loaded);
        let entries = match_module(&functions, &self.listeners);
        let mut actions: Vec<ActionId> = entries.iter().map(|e| e.action.clone()).collect();
        actions.sort();

        self.registry.update(|routes| {
            for entry in entries {
                routes.merge(entry);
            }
        });
        self.modules.insert(
            module_path.clone(),
            ModuleDescriptor::new(unit, functions, INITIAL_GENERATION),
        );

        info!("✅ Loaded new handler module {} ({} route(s))", module_path, actions.len());
        Ok(ReloadOutcome::Loaded {
            module: module_path,
            generation: INITIAL_GENERATION,
            actions,
        })
    }

    fn reload_existing(&mut self, unit: DiscoveryUnit, previous: u64) -> Result<ReloadOutcome, HandlerSystemError> {
        let module_path = unit.path().clone();
        let generation = previous + 1;
        info!("🔄 Reloading {} (generation {} -> {})", module_path, previous, generation);

        let loaded = match self.loader.load(&unit, generation, &self.listeners) {
            Ok(loaded) => loaded,
            Err(source) => {
                let purged = self.registry.update(|routes| routes.purge_module(&module_path));
                let mut unroutable: Vec<String> = purged.iter().map(|e| e.action.to_string()).collect();
                unroutable.sort();
                error!(
                    "❌ Reload of {} failed: {}. {} action(s) are unroutable until the next successful reload: {:?}",
                    module_path,
                    source,
                    unroutable.len(),
                    unroutable
                );
                return Err(HandlerSystemError::ReloadFailed {
                    module: module_path.to_string(),
                    unroutable,
                    source: Box::new(source),
                });
            }
        };

        let functions = scan_module(&loaded);
        let entries = match_module(&functions, &self.listeners);
        let current: BTreeSet<ActionId> = entries.iter().map(|e| e.action.clone()).collect();

        let purged = self.registry.update(|routes| {
            let purged = routes.purge_module(&module_path);
            for entry in entries {
                routes.merge(entry);
            }
            purged
        });
        let previous_actions: BTreeSet<ActionId> = purged.into_iter().map(|e| e.action).collect();
        let added: Vec<ActionId> = current.difference(&previous_actions).cloned().collect();
        let removed: Vec<ActionId> = previous_actions.difference(&current).cloned().collect();

        if let Some(descriptor) = self.modules.get_mut(&module_path) {
            descriptor.advance(functions, generation);
            descriptor.unit = unit;
        }

        info!(
            "✅ Reloaded {} at generation {} ({} route(s), +{} -{})",
            module_path,
            generation,
            current.len(),
            added.len(),
            removed.len()
        );
        if !removed.is_empty() {
            warn!("⚠️ {} no longer serves: {:?}", module_path, removed);
        }

        Ok(ReloadOutcome::Reloaded {
            module: module_path,
            generation,
            added,
            removed,
        })
    }
}

impl std::fmt::Debug for ReloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadCoordinator")
            .field("tree", &self.tree)
            .field("scope", &self.scope)
            .field("modules", &self.modules.len())
            .field("routes", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::{HandlerRef, Session};
    use crate::listener::ModuleRegistrar;
    use crate::loader::StaticLoader;
    use crate::walker::module_file_name;
    use serde_json::Value;
    use std::fs;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn noop(_: &mut dyn Session, _: &Value) -> Result<(), HandlerError> {
        Ok(())
    }

    pub(crate) struct Fixture {
        pub _dir: TempDir,
        pub root: PathBuf,
        pub handshake: PathBuf,
        pub join: PathBuf,
        pub loader: Arc<StaticLoader>,
        pub coordinator: ReloadCoordinator,
    }

    impl Fixture {
        fn lookup(&self, action: &str) -> Option<HandlerRef> {
            self.coordinator.registry().lookup(action)
        }
    }

    fn define_handshake(loader: &StaticLoader) {
        loader.define("Handlers.Login.Handshake", |m: &mut ModuleRegistrar| {
            m.handler("verChk", "handle_version_check", noop);
            m.handler("h#l", "handle_login", noop);
        });
    }

    /// Handlers/Login/Handshake serves "verChk" and "h#l";
    /// Handlers/World/Join serves "j#j".
    pub(crate) fn fixture(scope: ScopeFilter) -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("Handlers");
        for (package, stem) in [("Login", "Handshake"), ("World", "Join")] {
            fs::create_dir_all(root.join(package)).unwrap();
            fs::write(root.join(package).join(module_file_name(stem)), b"v1").unwrap();
        }

        let loader = Arc::new(StaticLoader::new());
        define_handshake(&loader);
        loader.define("Handlers.World.Join", |m: &mut ModuleRegistrar| {
            m.handler("j#j", "handle_join", noop);
        });

        let coordinator = ReloadCoordinator::new(
            HandlerTree::new(root.clone(), "Handlers"),
            scope,
            loader.clone(),
            Arc::new(ListenerTable::new()),
            Arc::new(DispatchRegistry::new()),
        );
        Fixture {
            handshake: root.join("Login").join(module_file_name("Handshake")),
            join: root.join("World").join(module_file_name("Join")),
            root: root.clone(),
            _dir: dir,
            loader,
            coordinator,
        }
    }

    #[test]
    fn test_bootstrap_routes_every_module() {
        let mut fx = fixture(ScopeFilter::All);
        assert_eq!(fx.coordinator.bootstrap().unwrap(), 3);

        let entry = fx.coordinator.registry().entry("h#l").unwrap();
        assert_eq!(entry.origin.as_str(), "Handlers.Login.Handshake");
        assert_eq!(entry.generation, INITIAL_GENERATION);

        let descriptor = fx.coordinator.module(&ModulePath::new("Handlers.World.Join")).unwrap();
        assert_eq!(descriptor.parent, Some(ModulePath::new("Handlers.World")));
        assert_eq!(descriptor.functions.len(), 1);
        assert!(!descriptor.is_plugin_unit);
    }

    #[test]
    fn test_bootstrap_import_failure_is_fatal() {
        let mut fx = fixture(ScopeFilter::All);
        fx.loader.remove(&ModulePath::new("Handlers.World.Join"));

        assert!(matches!(
            fx.coordinator.bootstrap(),
            Err(HandlerSystemError::ImportFailed { .. })
        ));
        assert!(fx.coordinator.registry().is_empty());
    }

    #[test]
    fn test_scoped_bootstrap_skips_other_modules() {
        let mut fx = fixture(ScopeFilter::allow_list(["Handlers.Login.Handshake"]));
        // Out-of-scope modules are never executed.
        fx.loader.remove(&ModulePath::new("Handlers.World.Join"));
        fx.coordinator.bootstrap().unwrap();

        assert!(fx.lookup("h#l").is_some());
        assert!(fx.lookup("j#j").is_none());

        let outcome = fx.coordinator.handle_change(&fx.join).unwrap();
        assert_eq!(outcome, ReloadOutcome::OutOfScope(ModulePath::new("Handlers.World.Join")));
    }

    #[test]
    fn test_reload_preserves_routing_changes_identity() {
        let mut fx = fixture(ScopeFilter::All);
        fx.coordinator.bootstrap().unwrap();
        let first = fx.lookup("h#l").unwrap();
        let unrelated = fx.lookup("j#j").unwrap();

        fx.loader.define("Handlers.Login.Handshake", |m: &mut ModuleRegistrar| {
            m.handler("verChk", "handle_version_check", noop);
            m.handler("h#l", "handle_login", |session: &mut dyn Session, _: &Value| {
                session.send(serde_json::json!({"action": "l", "motd": "changed body"}));
                Ok(())
            });
        });
        let outcome = fx.coordinator.handle_change(&fx.handshake).unwrap();

        assert_eq!(
            outcome,
            ReloadOutcome::Reloaded {
                module: ModulePath::new("Handlers.Login.Handshake"),
                generation: 2,
                added: vec![],
                removed: vec![],
            }
        );
        let second = fx.lookup("h#l").unwrap();
        assert!(!second.same_as(&first));
        assert_eq!(second.generation(), 2);
        assert!(fx.lookup("j#j").unwrap().same_as(&unrelated));
        assert_eq!(
            fx.coordinator.module(&ModulePath::new("Handlers.Login.Handshake")).unwrap().generation,
            2
        );
    }

    #[test]
    fn test_reload_removes_dropped_routes() {
        let mut fx = fixture(ScopeFilter::All);
        fx.coordinator.bootstrap().unwrap();

        fx.loader.define("Handlers.Login.Handshake", |m: &mut ModuleRegistrar| {
            m.handler("verChk", "handle_version_check", noop);
            m.handler("rndK", "handle_random_key", noop);
        });
        let outcome = fx.coordinator.reload(&ModulePath::new("Handlers.Login.Handshake")).unwrap();

        match outcome {
            ReloadOutcome::Reloaded { added, removed, .. } => {
                assert_eq!(added, vec![ActionId::from("rndK")]);
                assert_eq!(removed, vec![ActionId::from("h#l")]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(fx.lookup("h#l").is_none());
        assert_eq!(fx.lookup("verChk").unwrap().generation(), 2);
    }

    #[test]
    fn test_failed_reload_leaves_actions_unroutable() {
        let mut fx = fixture(ScopeFilter::All);
        fx.coordinator.bootstrap().unwrap();

        fx.loader.define("Handlers.Login.Handshake", |m: &mut ModuleRegistrar| {
            m.fail("unexpected indent");
        });
        match fx.coordinator.handle_change(&fx.handshake) {
            Err(HandlerSystemError::ReloadFailed { module, unroutable, .. }) => {
                assert_eq!(module, "Handlers.Login.Handshake");
                assert_eq!(unroutable, vec!["h#l".to_string(), "verChk".to_string()]);
            }
            other => panic!("expected reload failure, got {:?}", other),
        }
        assert!(fx.lookup("h#l").is_none());
        assert!(fx.lookup("verChk").is_none());
        assert!(fx.lookup("j#j").is_some());
        let descriptor = fx.coordinator.module(&ModulePath::new("Handlers.Login.Handshake")).unwrap();
        assert_eq!(descriptor.generation, 1);

        // A later successful reload restores routing.
        define_handshake(&fx.loader);
        fx.coordinator.handle_change(&fx.handshake).unwrap();
        assert_eq!(fx.lookup("h#l").unwrap().generation(), 2);
    }

    #[test]
    fn test_new_module_is_loaded_and_merged() {
        let mut fx = fixture(ScopeFilter::All);
        fx.coordinator.bootstrap().unwrap();

        let igloo = fx.root.join("World").join(module_file_name("Igloo"));
        fs::write(&igloo, b"v1").unwrap();
        fx.loader.define("Handlers.World.Igloo", |m: &mut ModuleRegistrar| {
            m.handler("g#gm", "handle_get_igloo", noop);
        });

        let outcome = fx.coordinator.handle_change(&igloo).unwrap();
        assert_eq!(
            outcome,
            ReloadOutcome::Loaded {
                module: ModulePath::new("Handlers.World.Igloo"),
                generation: 1,
                actions: vec![ActionId::from("g#gm")],
            }
        );
        assert!(fx.lookup("g#gm").is_some());
        assert_eq!(fx.coordinator.module_count(), 3);
    }

    #[test]
    fn test_reload_takes_over_colliding_action() {
        let mut fx = fixture(ScopeFilter::All);
        fx.coordinator.bootstrap().unwrap();

        fx.loader.define("Handlers.Login.Handshake", |m: &mut ModuleRegistrar| {
            m.handler("h#l", "handle_login", noop);
            m.handler("j#j", "handle_join_from_login", noop);
        });
        fx.coordinator.handle_change(&fx.handshake).unwrap();

        let entry = fx.coordinator.registry().entry("j#j").unwrap();
        assert_eq!(entry.origin.as_str(), "Handlers.Login.Handshake");
    }

    #[test]
    fn test_unrelated_files_are_ignored() {
        let mut fx = fixture(ScopeFilter::All);
        fx.coordinator.bootstrap().unwrap();

        let notes = fx.root.join("notes.txt");
        fs::write(&notes, "todo").unwrap();
        assert_eq!(
            fx.coordinator.handle_change(&notes).unwrap(),
            ReloadOutcome::Ignored(notes)
        );
        assert!(matches!(
            fx.coordinator.reload(&ModulePath::new("Handlers.World.Missing")),
            Err(HandlerSystemError::UnknownModule(_))
        ));
    }

    #[test]
    fn test_lookups_never_observe_a_purged_state() {
        let mut fx = fixture(ScopeFilter::All);
        fx.coordinator.bootstrap().unwrap();
        let registry = fx.coordinator.registry().clone();
        let unrelated = registry.lookup("j#j").unwrap();

        let done = AtomicBool::new(false);
        let misses = AtomicUsize::new(0);
        let lookups = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| loop {
                    // The reloaded module keeps serving h#l in every generation.
                    let login = registry.lookup("h#l");
                    let join = registry.lookup("j#j");
                    if login.is_none() || !join.is_some_and(|j| j.same_as(&unrelated)) {
                        misses.fetch_add(1, Ordering::Relaxed);
                    }
                    lookups.fetch_add(1, Ordering::Relaxed);
                    if done.load(Ordering::Acquire) {
                        break;
                    }
                });
            }

            for _ in 0..50 {
                fx.coordinator.handle_change(&fx.handshake).unwrap();
            }
            done.store(true, Ordering::Release);
        });

        assert_eq!(misses.load(Ordering::Relaxed), 0);
        assert!(lookups.load(Ordering::Relaxed) > 0);
        assert_eq!(registry.lookup("h#l").unwrap().generation(), 51);
    }
}
