//! Staleness reconciliation.
//!
//! Compares the registry with what the index store holds and decides, per
//! repository, whether to rebuild, purge or leave it alone. The decision is
//! a pure function of its inputs; [`StoredIndexes::load`] is the only part
//! that touches the disk.

use std::collections::{BTreeSet, HashMap};

use crate::config::Settings;
use crate::registry::{RegistrySnapshot, RepoSnapshot};
use crate::storage::{IndexRecord, IndexStore, INDEX_FORMAT_VERSION};
use crate::Result;

/// What the index store holds, keyed by repository id.
///
/// `None` means artifacts exist but no readable record does.
#[derive(Debug, Clone, Default)]
pub struct StoredIndexes {
    records: HashMap<String, Option<IndexRecord>>,
}

impl StoredIndexes {
    /// Read the record of every repository in the store.
    ///
    /// A record whose payload fails its checksum counts as unreadable.
    ///
    /// # Errors
    ///
    /// Returns an error if the store root cannot be listed.
    pub fn load(store: &IndexStore) -> Result<Self> {
        let mut records = HashMap::new();
        for id in store.list_repo_ids()? {
            let record = match store.verify(&id) {
                Ok(record) => Some(record),
                Err(e) if e.is_not_found() => None,
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Cannot read index record");
                    None
                }
            };
            records.insert(id, record);
        }
        Ok(Self { records })
    }

    /// Record what is stored for one repository.
    pub fn insert(&mut self, id: impl Into<String>, record: Option<IndexRecord>) {
        self.records.insert(id.into(), record);
    }

    /// Readable record for a repository.
    #[must_use]
    pub fn record(&self, id: &str) -> Option<&IndexRecord> {
        self.records.get(id).and_then(Option::as_ref)
    }

    /// Ids with any artifacts in the store.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }
}

impl FromIterator<(String, Option<IndexRecord>)> for StoredIndexes {
    fn from_iter<I: IntoIterator<Item = (String, Option<IndexRecord>)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

/// Why a repository needs a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexReason {
    /// Flagged stale in the registry.
    Stale,
    /// No readable index on disk.
    Missing,
    /// Built by an incompatible format version.
    FormatVersion,
    /// Built from a different declaration.
    ConfigChanged,
    /// Last build predates the latest change.
    Outdated,
}

impl ReindexReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::Missing => "missing",
            Self::FormatVersion => "format_version",
            Self::ConfigChanged => "config_changed",
            Self::Outdated => "outdated",
        }
    }
}

/// Disjoint partition of every known repository id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Declared repositories to rebuild, in registry order.
    pub needs_reindex: Vec<String>,
    /// Repositories to delete from the store and the registry.
    pub needs_purge: Vec<String>,
    /// Declared repositories whose index is current.
    pub up_to_date: Vec<String>,
    /// Undeclared repositories kept because auto-deletion is off.
    pub retained: Vec<String>,
}

impl ReconcilePlan {
    /// Whether there is nothing to do.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.needs_reindex.is_empty() && self.needs_purge.is_empty()
    }
}

/// Decide whether a declared repository needs a rebuild.
#[must_use]
pub fn reindex_reason(entry: &RepoSnapshot, record: Option<&IndexRecord>) -> Option<ReindexReason> {
    if entry.repo.is_stale {
        return Some(ReindexReason::Stale);
    }

    let Some(record) = record else {
        return Some(ReindexReason::Missing);
    };

    if record.format_version != INDEX_FORMAT_VERSION {
        return Some(ReindexReason::FormatVersion);
    }

    if record.config_fingerprint != entry.repo.config_fingerprint() {
        return Some(ReindexReason::ConfigChanged);
    }

    match entry.repo.last_indexed_date {
        Some(indexed) if indexed >= entry.changed_at => None,
        _ => Some(ReindexReason::Outdated),
    }
}

/// Partition the registry and the store into a plan.
///
/// Removal wins over a pending rebuild: an undeclared repository is purged
/// (or retained) even if it is also stale.
#[must_use]
pub fn reconcile(
    snapshot: &RegistrySnapshot,
    stored: &StoredIndexes,
    settings: &Settings,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let auto_delete = settings.auto_delete_stale_repos;

    for entry in snapshot {
        let id = entry.repo.id.clone();

        if !entry.declared {
            if auto_delete {
                plan.needs_purge.push(id);
            } else {
                plan.retained.push(id);
            }
            continue;
        }

        match reindex_reason(entry, stored.record(&id)) {
            Some(reason) => {
                tracing::debug!(id = %id, reason = reason.as_str(), "Repository needs reindex");
                plan.needs_reindex.push(id);
            }
            None => plan.up_to_date.push(id),
        }
    }

    // Orphaned store entries, sorted so the plan is deterministic.
    let orphans: BTreeSet<&str> = stored.ids().filter(|id| !snapshot.contains(id)).collect();
    for id in orphans {
        if auto_delete {
            plan.needs_purge.push(id.to_string());
        } else {
            plan.retained.push(id.to_string());
        }
    }

    plan
}
