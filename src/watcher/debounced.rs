//! Debounced filesystem watcher for local repositories.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use parking_lot::Mutex;

use super::roots::WatchRoots;
use crate::registry::{Registry, RegistrySnapshot};
use crate::{Error, Result};

/// Debounce duration for file events.
pub const DEBOUNCE_DURATION: Duration = Duration::from_millis(500);

/// Marks watched local repositories stale when their trees change.
pub struct RepoWatcher {
    debouncer: Mutex<Debouncer<RecommendedWatcher>>,
    roots: Arc<Mutex<WatchRoots>>,
}

impl RepoWatcher {
    /// Create a watcher that reports changes to `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watcher cannot be created.
    pub fn new(registry: Arc<Registry>, debounce: Duration) -> Result<Self> {
        let roots = Arc::new(Mutex::new(WatchRoots::new()));
        let handler_roots = Arc::clone(&roots);

        let debouncer = new_debouncer(debounce, move |result: DebounceEventResult| match result {
            Ok(events) => {
                let changed: BTreeSet<String> = {
                    let roots = handler_roots.lock();
                    events
                        .iter()
                        .filter(|event| matches!(event.kind, DebouncedEventKind::Any))
                        .filter_map(|event| roots.owner_of(&event.path))
                        .map(str::to_string)
                        .collect()
                };

                for id in changed {
                    match registry.mark_stale(&id) {
                        Ok(()) => tracing::debug!(id = %id, "Repository changed on disk"),
                        Err(e) => tracing::debug!(id = %id, error = %e, "Change for unknown repository"),
                    }
                }
            }
            Err(e) => {
                tracing::error!("Watch error: {:?}", e);
            }
        })
        .map_err(|e| Error::Watcher(format!("failed to create watcher: {e}")))?;

        Ok(Self {
            debouncer: Mutex::new(debouncer),
            roots,
        })
    }

    /// Start watching a repository root.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory does not exist or cannot be watched.
    pub fn watch(&self, id: &str, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();

        if !path.is_dir() {
            return Err(Error::Watcher(format!(
                "cannot watch '{}': directory does not exist",
                path.display()
            )));
        }

        self.debouncer
            .lock()
            .watcher()
            .watch(&path, RecursiveMode::Recursive)
            .map_err(|e| Error::Watcher(format!("cannot watch '{}': {e}", path.display())))?;

        tracing::info!(id, path = %path.display(), "Watching repository");
        self.roots.lock().insert(path, id);
        Ok(())
    }

    /// Stop watching a repository. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watcher refuses to unwatch.
    pub fn unwatch(&self, id: &str) -> Result<()> {
        let Some(path) = self.roots.lock().remove(id) else {
            return Ok(());
        };

        self.debouncer
            .lock()
            .watcher()
            .unwatch(&path)
            .map_err(|e| Error::Watcher(format!("cannot unwatch '{}': {e}", path.display())))?;

        tracing::info!(id, path = %path.display(), "Stopped watching repository");
        Ok(())
    }

    /// Align the watched set with the registry.
    ///
    /// Declared local repositories with `watch` enabled are watched; all
    /// others are dropped. Failures are logged per repository.
    pub fn sync(&self, snapshot: &RegistrySnapshot) {
        let wanted: Vec<(String, PathBuf)> = snapshot
            .iter()
            .filter(|entry| entry.declared && entry.repo.watches())
            .map(|entry| (entry.repo.id.clone(), entry.repo.path.clone()))
            .collect();

        let current: Vec<(String, PathBuf)> = {
            let roots = self.roots.lock();
            roots
                .ids()
                .filter_map(|id| roots.root_of(id).map(|root| (id.to_string(), root.to_path_buf())))
                .collect()
        };

        for (id, root) in &current {
            let still_wanted = wanted.iter().any(|(w_id, w_path)| w_id == id && w_path == root);
            if !still_wanted {
                if let Err(e) = self.unwatch(id) {
                    tracing::warn!(id = %id, error = %e, "Failed to stop watching repository");
                }
            }
        }

        for (id, path) in &wanted {
            let already = current.iter().any(|(c_id, c_path)| c_id == id && c_path == path);
            if already {
                continue;
            }
            if let Err(e) = self.watch(id, path) {
                tracing::warn!(id = %id, error = %e, "Failed to watch repository");
            }
        }
    }

    /// Ids of watched repositories.
    #[must_use]
    pub fn watched(&self) -> Vec<String> {
        self.roots.lock().ids().map(str::to_string).collect()
    }
}

impl std::fmt::Debug for RepoWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoWatcher")
            .field("roots", &*self.roots.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Repository;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_watch_nonexistent_dir() {
        let watcher = RepoWatcher::new(Arc::new(Registry::new()), DEBOUNCE_DURATION).unwrap();
        assert!(watcher.watch("r1", "/nonexistent/directory").is_err());
        assert!(watcher.watched().is_empty());
    }

    #[test]
    fn test_sync_follows_registry() {
        let tmp = TempDir::new().unwrap();
        let registry = Arc::new(Registry::new());
        registry.upsert(Repository::local("watched", tmp.path()).with_watch(true));
        registry.upsert(Repository::local("plain", tmp.path()));

        let watcher = RepoWatcher::new(Arc::clone(&registry), DEBOUNCE_DURATION).unwrap();
        watcher.sync(&registry.list());
        assert_eq!(watcher.watched(), vec!["watched"]);

        registry.retire("watched").unwrap();
        watcher.sync(&registry.list());
        assert!(watcher.watched().is_empty());
    }

    #[test]
    fn test_change_marks_repository_stale() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let registry = Arc::new(Registry::new());
        registry.upsert(Repository::local("r1", &root).with_watch(true));
        registry.mark_indexed("r1", Utc::now()).unwrap();

        let watcher = RepoWatcher::new(Arc::clone(&registry), Duration::from_millis(50)).unwrap();
        watcher.sync(&registry.list());

        std::fs::write(root.join("new.txt"), "hello").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !registry.get("r1").unwrap().is_stale && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(registry.get("r1").unwrap().is_stale);
    }
}
