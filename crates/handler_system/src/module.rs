//! Module paths, plugin manifests and the descriptors the coordinator keeps
//! for every module it has loaded.

use crate::error::HandlerSystemError;
use crate::handler::HandlerRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Dotted path of a handler module, e.g. `Handlers.Login.Handshake`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModulePath(String);

impl ModulePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Appends one segment.
    pub fn child(&self, segment: &str) -> Self {
        if self.0.is_empty() {
            Self(segment.to_string())
        } else {
            Self(format!("{}.{}", self.0, segment))
        }
    }

    /// Enclosing package, or `None` for a root package.
    pub fn parent(&self) -> Option<ModulePath> {
        self.0
            .rsplit_once('.')
            .map(|(parent, _)| ModulePath(parent.to_string()))
    }

    /// Last segment.
    pub fn name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `self` equals `package` or lies underneath it.
    pub fn is_within(&self, package: &ModulePath) -> bool {
        self.0 == package.0
            || (self.0.starts_with(&package.0)
                && self.0.as_bytes().get(package.0.len()) == Some(&b'.'))
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModulePath {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Contents of a `plugin.toml` that marks a directory as an atomic plugin unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginManifest {
    /// Display name, informational only.
    pub name: Option<String>,
    /// Library file inside the unit. When absent the unit must contain
    /// exactly one dynamic library at its top level.
    pub library: Option<String>,
    /// Disabled units are skipped by the walker.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl PluginManifest {
    pub fn load(path: &Path) -> Result<Self, HandlerSystemError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| HandlerSystemError::Manifest {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// One leaf produced by the tree walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryUnit {
    /// A plain module: a single dynamic library file.
    Module { path: ModulePath, file: PathBuf },
    /// A directory carrying `plugin.toml`; never expanded.
    PluginUnit {
        path: ModulePath,
        directory: PathBuf,
        library: PathBuf,
        manifest: PluginManifest,
    },
}

impl DiscoveryUnit {
    pub fn path(&self) -> &ModulePath {
        match self {
            DiscoveryUnit::Module { path, .. } | DiscoveryUnit::PluginUnit { path, .. } => path,
        }
    }

    /// The library file the loader opens for this unit.
    pub fn library_file(&self) -> &Path {
        match self {
            DiscoveryUnit::Module { file, .. } => file,
            DiscoveryUnit::PluginUnit { library, .. } => library,
        }
    }

    pub fn is_plugin_unit(&self) -> bool {
        matches!(self, DiscoveryUnit::PluginUnit { .. })
    }
}

/// Result of executing a module's registration code once.
///
/// `namespace` holds every function visible in the module after execution,
/// including functions imported from other modules.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub path: ModulePath,
    pub generation: u64,
    pub namespace: Vec<HandlerRef>,
}

/// What the coordinator remembers about a module between reloads.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub path: ModulePath,
    pub parent: Option<ModulePath>,
    pub is_plugin_unit: bool,
    pub functions: Vec<HandlerRef>,
    pub generation: u64,
    pub unit: DiscoveryUnit,
}

impl ModuleDescriptor {
    pub fn new(unit: DiscoveryUnit, functions: Vec<HandlerRef>, generation: u64) -> Self {
        let path = unit.path().clone();
        Self {
            parent: path.parent(),
            is_plugin_unit: unit.is_plugin_unit(),
            path,
            functions,
            generation,
            unit,
        }
    }

    /// Replaces the function set after a successful reload.
    pub fn advance(&mut self, functions: Vec<HandlerRef>, generation: u64) {
        self.functions = functions;
        self.generation = generation;
    }
}
