//! Filesystem watch task feeding the reload coordinator.
//!
//! `notify` delivers events on its own thread; they are forwarded over an
//! unbounded channel into a tokio task that owns the coordinator. Changed
//! paths are collected into a dirty set and applied once no new event has
//! arrived for the debounce interval, one module at a time, on the blocking
//! pool since each reload copies and maps a library.

use crate::error::HandlerSystemError;
use crate::module::ModulePath;
use crate::reload::ReloadCoordinator;
use crate::walker::{is_module_file, PLUGIN_MANIFEST};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Quiet period after the last change before reloading.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Handle to a running watch task.
pub struct HandlerWatcher {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Option<ReloadCoordinator>>,
}

impl HandlerWatcher {
    /// Stops watching and hands the coordinator back.
    pub async fn stop(self) -> Option<ReloadCoordinator> {
        let _ = self.stop_tx.send(());
        match self.task.await {
            Ok(coordinator) => coordinator,
            Err(e) => {
                error!("❌ Handler watch task ended abnormally: {}", e);
                None
            }
        }
    }
}

/// Starts watching the coordinator's handler tree.
///
/// Must be called from within a tokio runtime.
pub fn spawn_handler_watcher(
    coordinator: ReloadCoordinator,
    debounce: Duration,
) -> Result<HandlerWatcher, HandlerSystemError> {
    let (fs_tx, fs_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = fs_tx.send(res);
    })
    .map_err(|e| HandlerSystemError::Watch(format!("watcher init failed: {}", e)))?;

    // Backends report paths under the resolved root, not the configured one.
    let configured = coordinator.tree().root();
    let root = std::fs::canonicalize(configured).unwrap_or_else(|_| configured.to_path_buf());
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| HandlerSystemError::Watch(format!("watch failed: {}: {}", root.display(), e)))?;

    info!(
        "👀 Watching {} for handler changes (debounce {:?})",
        root.display(),
        debounce
    );

    let (stop_tx, stop_rx) = oneshot::channel();
    let task = tokio::spawn(watch_loop(coordinator, watcher, fs_rx, stop_rx, debounce));
    Ok(HandlerWatcher { stop_tx, task })
}

async fn watch_loop(
    mut coordinator: ReloadCoordinator,
    watcher: RecommendedWatcher,
    mut fs_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    mut stop_rx: oneshot::Receiver<()>,
    debounce: Duration,
) -> Option<ReloadCoordinator> {
    let mut dirty: BTreeSet<PathBuf> = BTreeSet::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            event = fs_rx.recv() => match event {
                Some(Ok(event)) => {
                    if collect_changes(&event, &mut dirty) {
                        deadline = Some(Instant::now() + debounce);
                    }
                }
                Some(Err(e)) => warn!("⚠️ Handler watch error: {}", e),
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                let batch = std::mem::take(&mut dirty);
                let applied = tokio::task::spawn_blocking(move || {
                    flush(&mut coordinator, batch);
                    coordinator
                })
                .await;
                coordinator = match applied {
                    Ok(coordinator) => coordinator,
                    Err(e) => {
                        error!("❌ Handler reload batch aborted: {}", e);
                        return None;
                    }
                };
            }
        }
    }

    drop(watcher);
    debug!("Handler watch task stopped");
    Some(coordinator)
}

/// Adds relevant paths from `event` to `dirty`; true when anything was added.
fn collect_changes(event: &Event, dirty: &mut BTreeSet<PathBuf>) -> bool {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return false;
    }
    let mut added = false;
    for path in event.paths.iter().filter(|p| is_watched_file(p)) {
        added |= dirty.insert(path.clone());
    }
    added
}

fn is_watched_file(path: &Path) -> bool {
    is_module_file(path) || path.file_name().is_some_and(|n| n == PLUGIN_MANIFEST)
}

/// Applies a batch of changes, reloading each affected module once.
fn flush(coordinator: &mut ReloadCoordinator, batch: BTreeSet<PathBuf>) {
    let mut handled: HashSet<ModulePath> = HashSet::new();
    for path in batch {
        match coordinator.tree().unit_for_path(&path) {
            Ok(Some(unit)) => {
                if !handled.insert(unit.path().clone()) {
                    continue;
                }
            }
            Ok(None) => continue,
            Err(e) => {
                warn!("⚠️ Cannot resolve changed path {}: {}", path.display(), e);
                continue;
            }
        }

        // Failures are reported by the coordinator itself.
        match coordinator.handle_change(&path) {
            Ok(outcome) => debug!("Change to {} applied: {:?}", path.display(), outcome),
            Err(e) => debug!("Change to {} not applied: {}", path.display(), e),
        }
    }
}
