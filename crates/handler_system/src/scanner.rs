//! Handler scanner.

use crate::handler::HandlerRef;
use crate::module::LoadedModule;

/// Returns the functions `module` itself defines.
///
/// Functions imported from other modules are excluded by origin, and a
/// function bound more than once appears once. The result is read-only and
/// carries no ordering guarantee beyond definition order.
pub fn scan_module(module: &LoadedModule) -> Vec<HandlerRef> {
    let mut functions: Vec<HandlerRef> = Vec::new();
    for handler in &module.namespace {
        if handler.origin() != &module.path {
            continue;
        }
        if functions.iter().any(|seen| seen.same_as(handler)) {
            continue;
        }
        functions.push(handler.clone());
    }
    functions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::Session;
    use crate::listener::{ListenerTable, ModuleRegistrar};
    use crate::module::ModulePath;
    use serde_json::Value;

    fn noop(_: &mut dyn Session, _: &Value) -> Result<(), HandlerError> {
        Ok(())
    }

    #[test]
    fn test_scan_excludes_imported_functions() {
        let table = ListenerTable::new();

        let mut shared = ModuleRegistrar::new(ModulePath::new("Handlers.Shared"), 1);
        let helper = shared.function("send_error", noop);
        shared.commit(&table).unwrap();

        let mut registrar = ModuleRegistrar::new(ModulePath::new("Handlers.Login.Handshake"), 1);
        registrar.import(&helper);
        let own = registrar.handler("verChk", "handle_version_check", noop);
        registrar.import(&own);
        let loaded = registrar.commit(&table).unwrap();

        let functions = scan_module(&loaded);
        assert_eq!(functions.len(), 1);
        assert!(functions[0].same_as(&own));
    }

    #[test]
    fn test_scan_empty_module() {
        let table = ListenerTable::new();
        let loaded = ModuleRegistrar::new(ModulePath::new("Handlers.Empty"), 1)
            .commit(&table)
            .unwrap();

        assert!(scan_module(&loaded).is_empty());
    }
}
