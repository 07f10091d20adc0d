//! Module loaders.
//!
//! A loader executes one discovery unit's registration code and returns the
//! resulting [`LoadedModule`]. Each call is a new execution: the functions it
//! produces are new objects, distinct in identity from any earlier
//! generation, which is exactly what the registry relies on when it purges
//! and rebuilds a module's routes.
//!
//! Two loaders are provided:
//! - [`DylibLoader`] opens each unit as a dynamic library exporting the
//!   symbols generated by [`export_handler_module!`](crate::export_handler_module).
//! - [`StaticLoader`] runs registration functions linked into the host.

use crate::error::HandlerSystemError;
use crate::listener::{ListenerTable, ModuleRegistrar};
use crate::module::{DiscoveryUnit, LoadedModule, ModulePath};
use crate::HANDLER_ABI_VERSION;
use dashmap::DashMap;
use libloading::Library;
use std::env::consts::DLL_EXTENSION;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Symbol returning the module's NUL-terminated ABI version string.
pub const ABI_VERSION_SYMBOL: &[u8] = b"floe_handler_abi_version";
/// Symbol receiving a `*mut ModuleRegistrar` for one execution.
pub const REGISTER_SYMBOL: &[u8] = b"floe_register_handlers";

/// Executes handler modules on behalf of the reload coordinator.
pub trait ModuleLoader: Send + Sync {
    /// Runs `unit`'s registration code as generation `generation`.
    ///
    /// On success the module's listeners have been committed to `listeners`;
    /// on failure the table is left as it was.
    fn load(
        &self,
        unit: &DiscoveryUnit,
        generation: u64,
        listeners: &ListenerTable,
    ) -> Result<LoadedModule, HandlerSystemError>;
}

/// Runs a registration function, turning a panic into a module failure.
#[doc(hidden)]
pub fn run_registration<F>(registrar: &mut ModuleRegistrar, register: F)
where
    F: FnOnce(&mut ModuleRegistrar),
{
    if let Err(panic_info) = catch_unwind(AssertUnwindSafe(|| register(&mut *registrar))) {
        let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
            format!("registration panicked: {}", s)
        } else if let Some(s) = panic_info.downcast_ref::<String>() {
            format!("registration panicked: {}", s)
        } else {
            "registration panicked with unknown error".to_string()
        };
        registrar.fail(message);
    }
}

/// Configuration for module loading safety checks.
///
/// These flags allow operators to override ABI validation when they
/// understand the risks.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ModuleSafetyConfig {
    /// Ignore Rust compiler version differences between module and server.
    /// WARNING: This may cause crashes due to ABI incompatibilities.
    pub allow_unsafe_modules: bool,

    /// Ignore crate version differences between module and server.
    /// WARNING: This may cause crashes or undefined behavior.
    pub allow_abi_mismatch: bool,

    /// Require exact version matching including patch digits.
    /// When false, only major.minor must match (ignoring patch).
    pub strict_versioning: bool,
}

impl ModuleSafetyConfig {
    /// Validates a module's `crate_version:rust_version` string against ours.
    pub fn validate(&self, module_version: &str, expected_version: &str) -> Result<(), HandlerSystemError> {
        let (Some((module_crate, module_rust)), Some((expected_crate, expected_rust))) =
            (split_abi_version(module_version), split_abi_version(expected_version))
        else {
            return Err(HandlerSystemError::VersionMismatch(format!(
                "Invalid version format. Expected 'crate:rust', got module='{}', expected='{}'",
                module_version, expected_version
            )));
        };

        let versions_compatible = if self.strict_versioning {
            module_crate == expected_crate
        } else {
            versions_major_minor_compatible(module_crate, expected_crate)
        };

        if !versions_compatible && !self.allow_abi_mismatch {
            let comparison_type = if self.strict_versioning { "exact" } else { "major.minor" };
            return Err(HandlerSystemError::VersionMismatch(format!(
                "ABI version mismatch: module compiled against handler_system v{}, but server uses v{} ({} match required). \
                Rebuild the module against the server's handler_system, or pass --danger-allow-abi-mismatch to override (NOT RECOMMENDED).",
                module_crate, expected_crate, comparison_type
            )));
        }

        let rust_mismatch = module_rust != expected_rust && module_rust != "unknown" && expected_rust != "unknown";
        if rust_mismatch && !self.allow_unsafe_modules {
            return Err(HandlerSystemError::VersionMismatch(format!(
                "Rust compiler version mismatch: module compiled with Rust {}, but server compiled with Rust {}. \
                Closures and trait objects cross this boundary, so the layouts must agree. \
                Rebuild with the same toolchain, or pass --danger-allow-unsafe-modules to override (MAY CAUSE CRASHES).",
                module_rust, expected_rust
            )));
        }

        if self.allow_abi_mismatch && module_crate != expected_crate {
            warn!(
                "Loading module with ABI version mismatch (override enabled): module v{} != server v{}",
                module_crate, expected_crate
            );
        }
        if self.allow_unsafe_modules && rust_mismatch {
            warn!(
                "Loading module with Rust compiler version mismatch (override enabled): module {} != server {}",
                module_rust, expected_rust
            );
        }

        Ok(())
    }
}

fn split_abi_version(version: &str) -> Option<(&str, &str)> {
    let mut parts = version.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(crate_version), Some(rust_version), None) => Some((crate_version, rust_version)),
        _ => None,
    }
}

/// Compares major.minor only, e.g. "0.3.2" is compatible with "0.3.0".
/// Unparseable versions fall back to exact comparison.
fn versions_major_minor_compatible(module_version: &str, expected_version: &str) -> bool {
    let parse_major_minor = |version: &str| -> Option<(u32, u32)> {
        let mut parts = version.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        Some((major, minor))
    };

    match (parse_major_minor(module_version), parse_major_minor(expected_version)) {
        (Some(module), Some(expected)) => module == expected,
        _ => module_version == expected_version,
    }
}

/// Loads handler modules from dynamic libraries.
///
/// A library that is still mapped cannot be opened again under the same
/// path and yield new code, so every load works on a private copy placed in
/// `shadow_directory` under a generation-suffixed name.
#[derive(Debug, Clone)]
pub struct DylibLoader {
    safety: ModuleSafetyConfig,
    shadow_directory: PathBuf,
}

impl DylibLoader {
    pub fn new(safety: ModuleSafetyConfig, shadow_directory: impl Into<PathBuf>) -> Self {
        Self {
            safety,
            shadow_directory: shadow_directory.into(),
        }
    }

    pub fn shadow_directory(&self) -> &Path {
        &self.shadow_directory
    }

    fn shadow_copy(&self, unit: &DiscoveryUnit, generation: u64) -> Result<PathBuf, HandlerSystemError> {
        std::fs::create_dir_all(&self.shadow_directory)?;
        let shadow = self.shadow_directory.join(format!(
            "{}-{}-g{}.{}",
            std::process::id(),
            unit.path(),
            generation,
            DLL_EXTENSION
        ));
        std::fs::copy(unit.library_file(), &shadow).map_err(|e| {
            HandlerSystemError::LibraryError(format!(
                "Failed to copy {} to {}: {}",
                unit.library_file().display(),
                shadow.display(),
                e
            ))
        })?;
        Ok(shadow)
    }

    fn read_abi_version(library: &Library) -> Result<String, HandlerSystemError> {
        let abi_version: unsafe extern "C" fn() -> *const c_char = unsafe {
            *library
                .get::<unsafe extern "C" fn() -> *const c_char>(ABI_VERSION_SYMBOL)
                .map_err(|e| {
                    HandlerSystemError::LibraryError(format!(
                        "Module does not export 'floe_handler_abi_version': {}",
                        e
                    ))
                })?
        };

        let version_ptr = unsafe { abi_version() };
        if version_ptr.is_null() {
            return Err(HandlerSystemError::LibraryError(
                "Module returned a null version string".to_string(),
            ));
        }
        Ok(unsafe { CStr::from_ptr(version_ptr) }
            .to_string_lossy()
            .into_owned())
    }
}

impl ModuleLoader for DylibLoader {
    fn load(
        &self,
        unit: &DiscoveryUnit,
        generation: u64,
        listeners: &ListenerTable,
    ) -> Result<LoadedModule, HandlerSystemError> {
        info!(
            "🔄 Loading handler module {} (generation {}) from {}",
            unit.path(),
            generation,
            unit.library_file().display()
        );

        let shadow = self.shadow_copy(unit, generation)?;
        let opened = unsafe { Library::new(&shadow) };
        // The mapping stays valid after unlink; elsewhere the copy lingers
        // until the shadow directory is cleared.
        if let Err(e) = std::fs::remove_file(&shadow) {
            debug!("Shadow copy {} kept: {}", shadow.display(), e);
        }
        let library = opened
            .map_err(|e| HandlerSystemError::LibraryError(format!("Failed to load library: {}", e)))?;

        let module_version = Self::read_abi_version(&library)?;
        self.safety.validate(&module_version, HANDLER_ABI_VERSION)?;

        let register: unsafe extern "C" fn(*mut ModuleRegistrar) = unsafe {
            *library
                .get::<unsafe extern "C" fn(*mut ModuleRegistrar)>(REGISTER_SYMBOL)
                .map_err(|e| {
                    HandlerSystemError::LibraryError(format!(
                        "Module does not export 'floe_register_handlers': {}",
                        e
                    ))
                })?
        };

        let mut registrar = ModuleRegistrar::new(unit.path().clone(), generation);
        unsafe { register(&mut registrar) };
        registrar.keep_alive().hold(library);

        registrar.commit(listeners)
    }
}

/// Registration function of a statically linked module.
pub type StaticModuleFn = dyn Fn(&mut ModuleRegistrar) + Send + Sync;

/// Loader for modules linked into the host process.
///
/// Definitions are keyed by dotted module path; redefining a path and
/// reloading it behaves like rebuilding a library on disk.
#[derive(Default)]
pub struct StaticLoader {
    modules: DashMap<ModulePath, Arc<StaticModuleFn>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines or replaces the registration function for `path`.
    pub fn define<F>(&self, path: impl Into<ModulePath>, register: F)
    where
        F: Fn(&mut ModuleRegistrar) + Send + Sync + 'static,
    {
        self.modules.insert(path.into(), Arc::new(register));
    }

    pub fn remove(&self, path: &ModulePath) {
        self.modules.remove(path);
    }

    pub fn contains(&self, path: &ModulePath) -> bool {
        self.modules.contains_key(path)
    }
}

impl ModuleLoader for StaticLoader {
    fn load(
        &self,
        unit: &DiscoveryUnit,
        generation: u64,
        listeners: &ListenerTable,
    ) -> Result<LoadedModule, HandlerSystemError> {
        let register = self
            .modules
            .get(unit.path())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HandlerSystemError::ImportFailed {
                module: unit.path().to_string(),
                reason: "no statically linked definition".to_string(),
            })?;

        let mut registrar = ModuleRegistrar::new(unit.path().clone(), generation);
        run_registration(&mut registrar, |r| (*register)(r));
        registrar.commit(listeners)
    }
}

impl std::fmt::Debug for StaticLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticLoader")
            .field("modules", &self.modules.len())
            .finish()
    }
}
