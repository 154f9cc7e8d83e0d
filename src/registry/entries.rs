//! The repository registry.
//!
//! The registry is the only process-wide mutable state. A short-lived map
//! lock guards membership; each repository has its own entry mutex for
//! metadata updates and its own async mutex that acts as the indexing slot,
//! so independent repositories never contend with each other.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;

use super::repository::Repository;
use crate::error::RegistryError;
use crate::Result;

/// Per-repository state machine during a reindex cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPhase {
    /// Waiting for a build.
    Stale,
    /// A worker holds the indexing slot.
    Indexing,
    /// The stored index reflects the declaration.
    Indexed,
    /// The last build failed; retried next tick.
    Failed,
}

/// What an upsert did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New repository, stale until first indexed.
    Inserted,
    /// Indexed fields changed; repository marked stale.
    Changed,
    /// Only non-indexed metadata (or nothing) changed.
    Unchanged,
}

#[derive(Debug, Clone)]
struct Entry {
    repo: Repository,
    declared: bool,
    changed_at: DateTime<Utc>,
    phase: IndexPhase,
    consecutive_failures: u32,
}

#[derive(Debug)]
struct Slot {
    entry: Mutex<Entry>,
    indexing: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Debug, Default)]
struct Slots {
    order: Vec<String>,
    by_id: HashMap<String, Arc<Slot>>,
}

/// Point-in-time view of one registered repository.
#[derive(Debug, Clone)]
pub struct RepoSnapshot {
    pub repo: Repository,
    /// Present in the most recent configuration.
    pub declared: bool,
    /// Time of the last staleness-triggering change.
    pub changed_at: DateTime<Utc>,
    pub phase: IndexPhase,
    pub consecutive_failures: u32,
}

impl From<&Entry> for RepoSnapshot {
    fn from(entry: &Entry) -> Self {
        Self {
            repo: entry.repo.clone(),
            declared: entry.declared,
            changed_at: entry.changed_at,
            phase: entry.phase,
            consecutive_failures: entry.consecutive_failures,
        }
    }
}

/// Snapshot of the registry in insertion order. Iterable any number of times.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    entries: Vec<RepoSnapshot>,
}

impl RegistrySnapshot {
    /// Iterate over the snapshot.
    pub fn iter(&self) -> std::slice::Iter<'_, RepoSnapshot> {
        self.entries.iter()
    }

    /// Look up one repository by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&RepoSnapshot> {
        self.entries.iter().find(|e| e.repo.id == id)
    }

    /// Whether the id is part of the snapshot.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a RegistrySnapshot {
    type Item = &'a RepoSnapshot;
    type IntoIter = std::slice::Iter<'a, RepoSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Exclusive right to build one repository's index.
///
/// Dropping the permit without recording an outcome returns the
/// repository to `Stale`.
pub struct IndexingPermit {
    id: String,
    slot: Arc<Slot>,
    _guard: OwnedMutexGuard<()>,
}

impl IndexingPermit {
    /// Repository this permit covers.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for IndexingPermit {
    fn drop(&mut self) {
        let mut entry = self.slot.entry.lock();
        if entry.phase == IndexPhase::Indexing {
            entry.phase = IndexPhase::Stale;
        }
    }
}

impl std::fmt::Debug for IndexingPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingPermit").field("id", &self.id).finish()
    }
}

/// Registry of known repositories.
#[derive(Debug, Default)]
pub struct Registry {
    slots: RwLock<Slots>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &str) -> Result<Arc<Slot>> {
        self.slots
            .read()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()).into())
    }

    /// Insert or replace a repository by id.
    ///
    /// New repositories start stale. A replacement is marked stale when any
    /// indexed field differs; it keeps its previous `last_indexed_date`.
    pub fn upsert(&self, mut repo: Repository) -> UpsertOutcome {
        let now = Utc::now();

        let existing = self.slots.read().by_id.get(&repo.id).cloned();
        if let Some(slot) = existing {
            let mut entry = slot.entry.lock();
            let changed = entry.repo.indexed_fields_differ(&repo);

            repo.is_stale = entry.repo.is_stale || changed;
            repo.last_indexed_date = entry.repo.last_indexed_date;
            entry.repo = repo;
            entry.declared = true;

            if changed {
                entry.changed_at = now;
                if entry.phase != IndexPhase::Indexing {
                    entry.phase = IndexPhase::Stale;
                }
                tracing::debug!(id = %entry.repo.id, "Repository declaration changed");
                return UpsertOutcome::Changed;
            }
            return UpsertOutcome::Unchanged;
        }

        let mut slots = self.slots.write();
        // Lost a race with a concurrent insert of the same id.
        if slots.by_id.contains_key(&repo.id) {
            drop(slots);
            return self.upsert(repo);
        }

        repo.is_stale = true;
        let id = repo.id.clone();
        let slot = Arc::new(Slot {
            entry: Mutex::new(Entry {
                repo,
                declared: true,
                changed_at: now,
                phase: IndexPhase::Stale,
                consecutive_failures: 0,
            }),
            indexing: Arc::new(tokio::sync::Mutex::new(())),
        });
        slots.order.push(id.clone());
        slots.by_id.insert(id.clone(), slot);
        tracing::debug!(id = %id, "Repository registered");

        UpsertOutcome::Inserted
    }

    /// Remove a repository. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut slots = self.slots.write();
        if slots.by_id.remove(id).is_some() {
            slots.order.retain(|existing| existing != id);
            true
        } else {
            false
        }
    }

    /// Snapshot of all repositories in insertion order.
    #[must_use]
    pub fn list(&self) -> RegistrySnapshot {
        let slots = self.slots.read();
        let entries = slots
            .order
            .iter()
            .filter_map(|id| slots.by_id.get(id))
            .map(|slot| RepoSnapshot::from(&*slot.entry.lock()))
            .collect();
        RegistrySnapshot { entries }
    }

    /// Current declaration of one repository.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Repository> {
        let slot = self.slot(id).ok()?;
        let repo = slot.entry.lock().repo.clone();
        Some(repo)
    }

    /// Snapshot of one repository including bookkeeping.
    #[must_use]
    pub fn snapshot_of(&self, id: &str) -> Option<RepoSnapshot> {
        let slot = self.slot(id).ok()?;
        let snapshot = RepoSnapshot::from(&*slot.entry.lock());
        Some(snapshot)
    }

    /// Record a successful build that started at `timestamp`.
    ///
    /// Clears the stale flag unless the declaration changed after
    /// `timestamp`, in which case the repository stays stale. Returns
    /// whether the flag was cleared.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the repository is not registered.
    pub fn mark_indexed(&self, id: &str, timestamp: DateTime<Utc>) -> Result<bool> {
        let slot = self.slot(id)?;
        let mut entry = slot.entry.lock();

        entry.repo.last_indexed_date = Some(timestamp);
        entry.consecutive_failures = 0;

        if entry.changed_at > timestamp {
            entry.repo.is_stale = true;
            entry.phase = IndexPhase::Stale;
            return Ok(false);
        }

        entry.repo.is_stale = false;
        entry.phase = IndexPhase::Indexed;
        Ok(true)
    }

    /// Adopt an index found on disk at startup.
    ///
    /// Unlike [`Registry::mark_indexed`], the declaration is assumed to be
    /// the one the index was built from, so its change time is moved back
    /// to `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the repository is not registered.
    pub fn restore_indexed(&self, id: &str, timestamp: DateTime<Utc>) -> Result<()> {
        let slot = self.slot(id)?;
        let mut entry = slot.entry.lock();
        if entry.phase == IndexPhase::Indexing {
            return Ok(());
        }
        entry.changed_at = entry.changed_at.min(timestamp);
        entry.repo.last_indexed_date = Some(timestamp);
        entry.repo.is_stale = false;
        entry.phase = IndexPhase::Indexed;
        Ok(())
    }

    /// Flag a repository stale because its content changed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the repository is not registered.
    pub fn mark_stale(&self, id: &str) -> Result<()> {
        let slot = self.slot(id)?;
        let mut entry = slot.entry.lock();
        entry.repo.is_stale = true;
        entry.changed_at = Utc::now();
        if entry.phase != IndexPhase::Indexing {
            entry.phase = IndexPhase::Stale;
        }
        Ok(())
    }

    /// Flag a repository as no longer declared by the configuration.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the repository is not registered.
    pub fn retire(&self, id: &str) -> Result<()> {
        let slot = self.slot(id)?;
        let mut entry = slot.entry.lock();
        if entry.declared {
            tracing::info!(id, "Repository no longer declared");
        }
        entry.declared = false;
        entry.repo.is_stale = true;
        Ok(())
    }

    /// Record a failed build. Returns the consecutive failure count.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the repository is not registered.
    pub fn record_failure(&self, id: &str) -> Result<u32> {
        let slot = self.slot(id)?;
        let mut entry = slot.entry.lock();
        entry.repo.is_stale = true;
        entry.phase = IndexPhase::Failed;
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        Ok(entry.consecutive_failures)
    }

    /// Claim the indexing slot for a repository.
    ///
    /// Returns `Ok(None)` when another worker already holds it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the repository is not registered.
    pub fn try_begin_indexing(&self, id: &str) -> Result<Option<IndexingPermit>> {
        let slot = self.slot(id)?;
        let Ok(guard) = Arc::clone(&slot.indexing).try_lock_owned() else {
            return Ok(None);
        };

        slot.entry.lock().phase = IndexPhase::Indexing;
        Ok(Some(IndexingPermit {
            id: id.to_string(),
            slot,
            _guard: guard,
        }))
    }

    /// Number of registered repositories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of repositories currently flagged stale.
    #[must_use]
    pub fn stale_count(&self) -> usize {
        self.list().iter().filter(|e| e.repo.is_stale).count()
    }
}
