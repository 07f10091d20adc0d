//! Module tree walker.
//!
//! A handler tree is a directory on disk. Subdirectories are packages, dynamic
//! library files are plain modules, and a subdirectory carrying a
//! [`PLUGIN_MANIFEST`] is an atomic plugin unit that is never expanded.
//!
//! Children are visited sorted by file name, depth first, so the order of the
//! returned units is stable across platforms and runs. That order decides
//! which module wins when two of them serve the same action.

use crate::error::HandlerSystemError;
use crate::module::{DiscoveryUnit, ModulePath, PluginManifest};
use std::collections::HashMap;
use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name that marks a directory as an atomic plugin unit.
pub const PLUGIN_MANIFEST: &str = "plugin.toml";

/// A handler package rooted at a directory.
#[derive(Debug, Clone)]
pub struct HandlerTree {
    root: PathBuf,
    package: ModulePath,
}

impl HandlerTree {
    pub fn new(root: impl Into<PathBuf>, package: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            package: ModulePath::new(package),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn package(&self) -> &ModulePath {
        &self.package
    }

    /// Enumerates every discovery unit under the root package.
    ///
    /// Any failure is returned as an error instead of skipping the offending
    /// entry: callers at startup treat an incomplete handler set as fatal.
    pub fn walk(&self) -> Result<Vec<DiscoveryUnit>, HandlerSystemError> {
        if !self.root.is_dir() {
            return Err(HandlerSystemError::Discovery(format!(
                "Handler package {} not found at {}",
                self.package,
                self.root.display()
            )));
        }

        let mut units = Vec::new();
        self.walk_package(&self.root, &self.package, &mut units)?;
        reject_duplicate_paths(&units)?;
        debug!("🔍 Walked {}: {} unit(s)", self.package, units.len());
        Ok(units)
    }

    fn walk_package(
        &self,
        directory: &Path,
        package: &ModulePath,
        units: &mut Vec<DiscoveryUnit>,
    ) -> Result<(), HandlerSystemError> {
        for entry in sorted_entries(directory)? {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                warn!("Skipping non UTF-8 path in handler tree: {}", entry.display());
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            if entry.is_dir() {
                if !is_valid_segment(&name) {
                    warn!("Skipping package with invalid name: {}", entry.display());
                    continue;
                }
                let path = package.child(&name);
                if entry.join(PLUGIN_MANIFEST).is_file() {
                    if let Some(unit) = plugin_unit(path, &entry)? {
                        units.push(unit);
                    }
                } else {
                    self.walk_package(&entry, &path, units)?;
                }
            } else if is_module_file(&entry) {
                match module_stem(&entry) {
                    Some(stem) => units.push(DiscoveryUnit::Module {
                        path: package.child(&stem),
                        file: entry,
                    }),
                    None => warn!("Skipping module with invalid name: {}", entry.display()),
                }
            }
        }
        Ok(())
    }

    /// Maps a changed file to the unit it belongs to.
    ///
    /// The top-most ancestor carrying a manifest wins, so edits anywhere in a
    /// plugin unit (its manifest included) resolve to the unit itself. Returns
    /// `None` for paths that are outside the tree or are not handler modules.
    ///
    /// Event paths may arrive canonicalized (FSEvents on macOS, symlinked
    /// roots), so both sides are resolved before giving up.
    pub fn unit_for_path(&self, changed: &Path) -> Result<Option<DiscoveryUnit>, HandlerSystemError> {
        let Some(relative) = self.relative_to_root(changed) else {
            return Ok(None);
        };

        let Some(segments) = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()
        else {
            return Ok(None);
        };
        let Some((file_name, packages)) = segments.split_last() else {
            return Ok(None);
        };

        let mut directory = self.root.clone();
        let mut path = self.package.clone();
        for segment in packages {
            if segment.starts_with('.') || !is_valid_segment(segment) {
                return Ok(None);
            }
            directory.push(segment);
            path = path.child(segment);
            if directory.join(PLUGIN_MANIFEST).is_file() {
                return plugin_unit(path, &directory);
            }
        }

        if *file_name == PLUGIN_MANIFEST || !is_module_file(changed) {
            return Ok(None);
        }
        Ok(module_stem(changed).map(|stem| DiscoveryUnit::Module {
            path: path.child(&stem),
            file: changed.to_path_buf(),
        }))
    }

    fn relative_to_root(&self, changed: &Path) -> Option<PathBuf> {
        if let Ok(relative) = changed.strip_prefix(&self.root) {
            return Some(relative.to_path_buf());
        }
        let root = std::fs::canonicalize(&self.root).ok()?;
        let changed = canonical_path(changed)?;
        changed.strip_prefix(&root).ok().map(Path::to_path_buf)
    }

    /// Locates the unit for a dotted module path without walking the whole tree.
    pub fn unit_for_module(&self, module: &ModulePath) -> Result<Option<DiscoveryUnit>, HandlerSystemError> {
        if module == &self.package || !module.is_within(&self.package) {
            return Ok(None);
        }
        let relative = &module.as_str()[self.package.as_str().len() + 1..];
        let segments: Vec<&str> = relative.split('.').collect();
        let (stem, packages) = match segments.split_last() {
            Some(split) => split,
            None => return Ok(None),
        };

        let mut directory = self.root.clone();
        let mut path = self.package.clone();
        for segment in packages {
            directory.push(segment);
            path = path.child(segment);
            if directory.join(PLUGIN_MANIFEST).is_file() {
                // Modules inside a plugin unit are not individually addressable.
                return Ok(None);
            }
        }

        let unit_directory = directory.join(stem);
        if unit_directory.join(PLUGIN_MANIFEST).is_file() {
            return plugin_unit(module.clone(), &unit_directory);
        }

        let candidates = [
            directory.join(module_file_name(stem)),
            directory.join(format!("{stem}.{DLL_EXTENSION}")),
        ];
        Ok(candidates
            .into_iter()
            .find(|file| file.is_file())
            .map(|file| DiscoveryUnit::Module {
                path: module.clone(),
                file,
            }))
    }
}

fn plugin_unit(path: ModulePath, directory: &Path) -> Result<Option<DiscoveryUnit>, HandlerSystemError> {
    let manifest_path = directory.join(PLUGIN_MANIFEST);
    let manifest = PluginManifest::load(&manifest_path)?;
    if !manifest.enabled {
        debug!("⏭️ Plugin unit {} is disabled, skipping", path);
        return Ok(None);
    }

    let library = match &manifest.library {
        Some(library) => {
            let file = directory.join(library);
            if !file.is_file() {
                return Err(HandlerSystemError::Manifest {
                    path: manifest_path.display().to_string(),
                    reason: format!("library {} does not exist", library),
                });
            }
            file
        }
        None => {
            let mut libraries: Vec<PathBuf> = sorted_entries(directory)?
                .into_iter()
                .filter(|p| p.is_file() && is_module_file(p))
                .collect();
            if libraries.len() != 1 {
                return Err(HandlerSystemError::Manifest {
                    path: manifest_path.display().to_string(),
                    reason: format!(
                        "expected exactly one .{} library in the unit, found {}; set `library`",
                        DLL_EXTENSION,
                        libraries.len()
                    ),
                });
            }
            libraries.remove(0)
        }
    };

    Ok(Some(DiscoveryUnit::PluginUnit {
        path,
        directory: directory.to_path_buf(),
        library,
        manifest,
    }))
}

/// Canonical form of `path`; a file that no longer exists resolves through its parent.
fn canonical_path(path: &Path) -> Option<PathBuf> {
    std::fs::canonicalize(path).ok().or_else(|| {
        let parent = std::fs::canonicalize(path.parent()?).ok()?;
        Some(parent.join(path.file_name()?))
    })
}

/// `libJoin.so`, `Join.so` and a `Join/` plugin unit all claim the same path.
fn reject_duplicate_paths(units: &[DiscoveryUnit]) -> Result<(), HandlerSystemError> {
    let mut seen: HashMap<&ModulePath, &DiscoveryUnit> = HashMap::new();
    for unit in units {
        if let Some(first) = seen.insert(unit.path(), unit) {
            return Err(HandlerSystemError::Discovery(format!(
                "Module {} is provided by both {} and {}",
                unit.path(),
                first.library_file().display(),
                unit.library_file().display()
            )));
        }
    }
    Ok(())
}

fn sorted_entries(directory: &Path) -> Result<Vec<PathBuf>, HandlerSystemError> {
    let read = std::fs::read_dir(directory).map_err(|e| {
        HandlerSystemError::Discovery(format!("Cannot read package {}: {}", directory.display(), e))
    })?;
    let mut entries = read
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(entries)
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains('.')
}

/// True for files with the platform's dynamic library extension.
pub fn is_module_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(DLL_EXTENSION))
}

/// Module name for a library file, with the platform library prefix removed.
pub fn module_stem(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let stem = match stem.strip_prefix(DLL_PREFIX) {
        Some(rest) if !DLL_PREFIX.is_empty() && !rest.is_empty() => rest,
        _ => stem,
    };
    is_valid_segment(stem).then(|| stem.to_string())
}

/// Platform file name for a module stem, e.g. `libHandshake.so`.
pub fn module_file_name(stem: &str) -> String {
    format!("{DLL_PREFIX}{stem}.{DLL_EXTENSION}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"dummy content").unwrap();
    }

    /// Handlers/
    ///   Commands/ (plugin unit with a nested package)
    ///   Login/Handshake
    ///   World/Join, World/Navigation
    ///   notes.txt
    fn sample_tree() -> (TempDir, HandlerTree) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("Handlers");

        touch(&root.join("Login").join(module_file_name("Handshake")));
        touch(&root.join("World").join(module_file_name("Navigation")));
        touch(&root.join("World").join(module_file_name("Join")));
        touch(&root.join("notes.txt"));

        let commands = root.join("Commands");
        touch(&commands.join(module_file_name("commands")));
        touch(&commands.join("Inner").join(module_file_name("Deep")));
        fs::write(commands.join(PLUGIN_MANIFEST), "name = \"Commands\"\n").unwrap();

        let tree = HandlerTree::new(root, "Handlers");
        (temp_dir, tree)
    }

    fn paths(units: &[DiscoveryUnit]) -> Vec<&str> {
        units.iter().map(|u| u.path().as_str()).collect()
    }

    #[test]
    fn test_walk_order_and_nesting() {
        let (_dir, tree) = sample_tree();
        let units = tree.walk().unwrap();

        assert_eq!(
            paths(&units),
            vec![
                "Handlers.Commands",
                "Handlers.Login.Handshake",
                "Handlers.World.Join",
                "Handlers.World.Navigation",
            ]
        );
        assert!(units[0].is_plugin_unit());
        assert!(!units[1].is_plugin_unit());
    }

    #[test]
    fn test_plugin_unit_is_never_expanded() {
        let (_dir, tree) = sample_tree();
        let units = tree.walk().unwrap();

        assert!(units
            .iter()
            .all(|u| !u.path().as_str().starts_with("Handlers.Commands.")));
        match &units[0] {
            DiscoveryUnit::PluginUnit { library, manifest, .. } => {
                assert_eq!(library.file_name().unwrap().to_str().unwrap(), module_file_name("commands"));
                assert_eq!(manifest.name.as_deref(), Some("Commands"));
            }
            other => panic!("expected plugin unit, got {:?}", other),
        }
    }

    #[test]
    fn test_disabled_plugin_unit_is_skipped() {
        let (_dir, tree) = sample_tree();
        fs::write(tree.root().join("Commands").join(PLUGIN_MANIFEST), "enabled = false\n").unwrap();

        let units = tree.walk().unwrap();
        assert_eq!(units.len(), 3);
        assert!(units.iter().all(|u| !u.is_plugin_unit()));
    }

    #[test]
    fn test_ambiguous_plugin_library_is_fatal() {
        let (_dir, tree) = sample_tree();
        touch(&tree.root().join("Commands").join(module_file_name("second")));

        assert!(matches!(tree.walk(), Err(HandlerSystemError::Manifest { .. })));
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let tree = HandlerTree::new(temp_dir.path().join("missing"), "Handlers");

        assert!(matches!(tree.walk(), Err(HandlerSystemError::Discovery(_))));
    }

    #[test]
    fn test_unit_for_path() {
        let (_dir, tree) = sample_tree();
        let root = tree.root().to_path_buf();

        let unit = tree
            .unit_for_path(&root.join("Login").join(module_file_name("Handshake")))
            .unwrap()
            .unwrap();
        assert_eq!(unit.path().as_str(), "Handlers.Login.Handshake");

        // Anything inside a plugin unit resolves to the unit.
        let deep = root.join("Commands").join("Inner").join(module_file_name("Deep"));
        let unit = tree.unit_for_path(&deep).unwrap().unwrap();
        assert_eq!(unit.path().as_str(), "Handlers.Commands");
        let manifest = root.join("Commands").join(PLUGIN_MANIFEST);
        assert_eq!(tree.unit_for_path(&manifest).unwrap().unwrap().path().as_str(), "Handlers.Commands");

        assert!(tree.unit_for_path(&root.join("notes.txt")).unwrap().is_none());
        assert!(tree.unit_for_path(Path::new("/elsewhere/lib.so")).unwrap().is_none());
    }

    #[test]
    fn test_unit_for_module() {
        let (_dir, tree) = sample_tree();

        let unit = tree
            .unit_for_module(&ModulePath::new("Handlers.World.Join"))
            .unwrap()
            .unwrap();
        assert_eq!(unit.library_file(), tree.root().join("World").join(module_file_name("Join")));

        let unit = tree.unit_for_module(&ModulePath::new("Handlers.Commands")).unwrap().unwrap();
        assert!(unit.is_plugin_unit());

        assert!(tree.unit_for_module(&ModulePath::new("Handlers.Commands.Inner.Deep")).unwrap().is_none());
        assert!(tree.unit_for_module(&ModulePath::new("Handlers.World.Missing")).unwrap().is_none());
        assert!(tree.unit_for_module(&ModulePath::new("Other.World.Join")).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_module_paths_are_fatal() {
        let (_dir, tree) = sample_tree();
        let join = tree.root().join("World").join("Join");
        touch(&join.join(module_file_name("join")));
        fs::write(join.join(PLUGIN_MANIFEST), "name = \"Join\"\n").unwrap();

        match tree.walk() {
            Err(HandlerSystemError::Discovery(message)) => assert!(message.contains("Handlers.World.Join")),
            other => panic!("expected a discovery error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_prefixed_and_bare_library_collide() {
        let (_dir, tree) = sample_tree();
        touch(&tree.root().join("World").join(format!("Join.{DLL_EXTENSION}")));

        assert!(matches!(tree.walk(), Err(HandlerSystemError::Discovery(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_unit_for_path_resolves_through_symlinked_root() {
        let (dir, tree) = sample_tree();
        let link = dir.path().join("linked");
        std::os::unix::fs::symlink(tree.root(), &link).unwrap();
        let canonical = fs::canonicalize(tree.root()).unwrap();

        // Watching through the link, notified with real paths
        let linked_tree = HandlerTree::new(&link, "Handlers");
        let changed = canonical.join("World").join(module_file_name("Join"));
        let unit = linked_tree.unit_for_path(&changed).unwrap().unwrap();
        assert_eq!(unit.path().as_str(), "Handlers.World.Join");

        // And the other way around, including a file that was just removed
        let gone = link.join("Login").join(module_file_name("Farewell"));
        let unit = tree.unit_for_path(&gone).unwrap().unwrap();
        assert_eq!(unit.path().as_str(), "Handlers.Login.Farewell");
    }

    #[test]
    fn test_module_stem_strips_platform_prefix() {
        assert_eq!(module_stem(Path::new(&module_file_name("Handshake"))).as_deref(), Some("Handshake"));
        assert!(is_module_file(Path::new(&module_file_name("Handshake"))));
        assert!(!is_module_file(Path::new("Handshake.txt")));
    }
}
