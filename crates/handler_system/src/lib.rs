//! # Handler System
//!
//! Discovers per-action protocol handlers in a tree of handler modules,
//! routes inbound actions to them, and rebuilds the routes of a single
//! module in place when it changes on disk.
//!
//! ## Components
//!
//! - **Module Tree Walker** ([`HandlerTree`]): enumerates plain modules and
//!   atomic plugin units (directories carrying `plugin.toml`)
//! - **Handler Scanner** ([`scan_module`]): the functions a module defines
//!   itself, imports excluded
//! - **Action Listener Table** ([`ListenerTable`]): `action -> [listener]`,
//!   populated as a side effect of executing a module's registration code
//! - **Dispatch Registry** ([`DispatchRegistry`]): the live `action -> handler`
//!   mapping consulted per inbound message
//! - **Reload Coordinator** ([`ReloadCoordinator`]): bootstrap and
//!   purge-then-rebuild of one module on change
//!
//! ## Writing a handler module
//!
//! ```rust,ignore
//! use handler_system::{export_handler_module, HandlerError, ModuleRegistrar};
//!
//! fn register(module: &mut ModuleRegistrar) {
//!     module.handler("verChk", "handle_version_check", |session, data| {
//!         match data["version"].as_u64() {
//!             Some(153) => {
//!                 session.send(serde_json::json!({ "action": "apiOK" }));
//!                 Ok(())
//!             }
//!             _ => Err(HandlerError::InvalidPayload("unsupported client".into())),
//!         }
//!     });
//! }
//!
//! export_handler_module!(register);
//! ```
//!
//! Build the crate as a `cdylib` and drop the library anywhere under the
//! handler directory; its dotted path follows the directories it sits in.

pub mod error;
pub mod handler;
pub mod listener;
pub mod loader;
mod macros;
pub mod module;
pub mod registry;
pub mod reload;
pub mod scanner;
pub mod walker;
pub mod watch;

pub use error::{DispatchError, HandlerError, HandlerSystemError};
pub use handler::{emit_module_log, ActionId, HandlerFn, HandlerRef, LibraryGuard, LogLevel, Session, MODULE_LOG_TARGET};
pub use listener::{ListenerDescriptor, ListenerTable, ModuleRegistrar};
pub use loader::{run_registration, DylibLoader, ModuleLoader, ModuleSafetyConfig, StaticLoader};
pub use module::{DiscoveryUnit, LoadedModule, ModuleDescriptor, ModulePath, PluginManifest};
pub use registry::{build, match_module, DispatchEntry, DispatchRegistry, RouteTable, ScopeFilter};
pub use reload::{ReloadCoordinator, ReloadOutcome, INITIAL_GENERATION};
pub use scanner::scan_module;
pub use walker::{is_module_file, module_file_name, module_stem, HandlerTree, PLUGIN_MANIFEST};
pub use watch::{spawn_handler_watcher, HandlerWatcher, DEFAULT_DEBOUNCE};

/// ABI version for handler module compatibility validation.
/// Format: "major.minor.patch:rust_version"
/// Example: "0.3.0:1.75.0" or "0.3.0:unknown"
pub const HANDLER_ABI_VERSION: &str = {
    const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

    // Set by build.rs
    const RUST_VERSION: &str = env!("FLOE_RUSTC_VERSION");

    const_format::concatcp!(CRATE_VERSION, ":", RUST_VERSION)
};

#[doc(hidden)]
pub const HANDLER_ABI_VERSION_NUL: &str = const_format::concatcp!(HANDLER_ABI_VERSION, "\0");

/// Returns build info string with version and Rust compiler version.
pub fn handler_system_build_info() -> String {
    format!(
        "Floe handler system v{} with Rust compiler v{}",
        env!("CARGO_PKG_VERSION"),
        env!("FLOE_RUSTC_VERSION")
    )
}
