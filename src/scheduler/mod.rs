//! Periodic resync and reindex.
//!
//! Two independent triggers drive the engine:
//! - resync: reload the declarations and align the registry with them
//! - reindex: reconcile the registry with the index store, purge what is
//!   gone and rebuild what is stale on a bounded worker pool
//!
//! Each trigger skips a tick while its previous run is still going.

mod job;
mod report;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub use job::{IndexJob, JobOutcome, FAILURE_WARN_THRESHOLD};
pub use report::{CycleReport, ResyncReport};

use crate::config::{ConfigSource, Settings};
use crate::indexer::TrigramIndexer;
use crate::observability::metrics::{PURGES_TOTAL, REPOSITORIES_TOTAL, STALE_REPOSITORIES};
use crate::observability::spans;
use crate::reconciler::{reconcile, StoredIndexes};
use crate::registry::{IndexPhase, Registry, UpsertOutcome};
use crate::storage::{IndexStore, INDEX_FORMAT_VERSION};
use crate::watcher::RepoWatcher;
use crate::{Error, Result};

/// Held while a trigger runs; a second run of the same trigger is refused.
struct TriggerGuard<'a>(&'a AtomicBool);

impl<'a> TriggerGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TriggerGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives resync and reindex cycles.
pub struct Scheduler {
    settings: Settings,
    registry: Arc<Registry>,
    store: Arc<IndexStore>,
    source: Arc<dyn ConfigSource>,
    indexer: TrigramIndexer,
    workers: Arc<Semaphore>,
    watcher: Option<RepoWatcher>,
    resyncing: AtomicBool,
    reindexing: AtomicBool,
}

impl Scheduler {
    /// Create a scheduler. `settings` stay fixed for its lifetime.
    #[must_use]
    pub fn new(
        settings: Settings,
        registry: Arc<Registry>,
        store: Arc<IndexStore>,
        source: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            indexer: TrigramIndexer::new(settings.clone()),
            workers: Arc::new(Semaphore::new(settings.max_concurrent_indexers)),
            settings,
            registry,
            store,
            source,
            watcher: None,
            resyncing: AtomicBool::new(false),
            reindexing: AtomicBool::new(false),
        }
    }

    /// Mark watched local repositories stale on filesystem changes.
    #[must_use]
    pub fn with_watcher(mut self, watcher: RepoWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    /// Load the declarations and align the registry with them.
    ///
    /// Returns `Ok(None)` if a resync is already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded; the registry
    /// is left untouched in that case.
    pub async fn resync(&self) -> Result<Option<ResyncReport>> {
        let Some(_guard) = TriggerGuard::try_acquire(&self.resyncing) else {
            tracing::debug!("Resync still running, skipping tick");
            return Ok(None);
        };

        self.resync_cycle()
            .instrument(spans::cycle_span("resync"))
            .await
            .map(Some)
    }

    async fn resync_cycle(&self) -> Result<ResyncReport> {
        let source = Arc::clone(&self.source);
        let declarations = tokio::task::spawn_blocking(move || source.load())
            .await
            .map_err(|e| Error::internal(format!("config load panicked: {e}")))??;

        if let Some(declared) = &declarations.settings {
            if *declared != self.settings {
                tracing::warn!("Settings changed in configuration; restart to apply them");
            }
        }

        let mut report = ResyncReport {
            declared: declarations.repos.len(),
            ..ResyncReport::default()
        };

        let declared_ids: HashSet<String> =
            declarations.repos.iter().map(|r| r.id.clone()).collect();

        for repo in declarations.repos {
            match self.registry.upsert(repo) {
                UpsertOutcome::Inserted => report.inserted += 1,
                UpsertOutcome::Changed => report.changed += 1,
                UpsertOutcome::Unchanged => {}
            }
        }

        for entry in &self.registry.list() {
            if entry.declared && !declared_ids.contains(&entry.repo.id) {
                // Removed concurrently; nothing left to retire.
                if self.registry.retire(&entry.repo.id).is_ok() {
                    report.retired += 1;
                }
            }
        }

        if let Some(watcher) = &self.watcher {
            watcher.sync(&self.registry.list());
        }
        self.update_gauges();

        tracing::info!(%report, "Resync complete");
        Ok(report)
    }

    /// Adopt indexes already on disk that match their declaration.
    ///
    /// Called once after the first resync so that a restart does not
    /// rebuild every repository. Returns how many were adopted.
    pub async fn hydrate(&self) -> usize {
        let registry = Arc::clone(&self.registry);
        let store = Arc::clone(&self.store);

        let adopted = tokio::task::spawn_blocking(move || {
            let mut adopted = 0;
            for entry in &registry.list() {
                if !entry.declared || entry.phase != IndexPhase::Stale {
                    continue;
                }
                let id = &entry.repo.id;
                let record = match store.read(id) {
                    Ok((record, _)) => record,
                    Err(e) if e.is_not_found() => {
                        tracing::debug!(id = %id, error = %e, "No usable index on disk");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(id = %id, error = %e, "Cannot read stored index");
                        continue;
                    }
                };

                if record.format_version != INDEX_FORMAT_VERSION
                    || record.config_fingerprint != entry.repo.config_fingerprint()
                {
                    continue;
                }

                if registry.restore_indexed(id, record.indexed_at).is_ok() {
                    adopted += 1;
                }
            }
            adopted
        })
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Hydration task panicked");
            0
        });

        tracing::info!(adopted, "Hydrated registry from index store");
        self.update_gauges();
        adopted
    }

    /// Run one reindex cycle: reconcile, purge, rebuild.
    ///
    /// Returns `Ok(None)` if a reindex is already running.
    ///
    /// # Errors
    ///
    /// Returns a fatal storage error if the index path cannot be written or
    /// read. Per-repository failures are reported in the cycle report.
    pub async fn reindex(&self, cancel: &CancellationToken) -> Result<Option<CycleReport>> {
        let Some(_guard) = TriggerGuard::try_acquire(&self.reindexing) else {
            tracing::debug!("Reindex still running, skipping tick");
            return Ok(None);
        };

        self.reindex_cycle(cancel)
            .instrument(spans::cycle_span("reindex"))
            .await
            .map(Some)
    }

    async fn reindex_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let snapshot = self.registry.list();
        let store = Arc::clone(&self.store);
        let stored = tokio::task::spawn_blocking(move || StoredIndexes::load(&store))
            .await
            .map_err(|e| Error::internal(format!("store scan panicked: {e}")))??;

        let plan = reconcile(&snapshot, &stored, &self.settings);
        let mut report = CycleReport {
            up_to_date: plan.up_to_date.len(),
            ..CycleReport::default()
        };

        for id in &plan.retained {
            tracing::debug!(id = %id, "Keeping undeclared repository");
        }
        report.retained = plan.retained;

        for id in plan.needs_purge {
            if self.purge(&id).await? {
                report.purged.push(id);
            }
        }

        if !plan.needs_reindex.is_empty() {
            self.dispatch(plan.needs_reindex, cancel, &mut report).await?;
        }

        self.update_gauges();
        tracing::info!(%report, "Reindex complete");
        Ok(report)
    }

    /// Delete a repository from the store and the registry.
    ///
    /// Returns `false` when the repository was re-declared or is being
    /// indexed, so the purge is retried next cycle.
    async fn purge(&self, id: &str) -> Result<bool> {
        let permit = match self.registry.try_begin_indexing(id) {
            Ok(Some(permit)) => Some(permit),
            Ok(None) => {
                tracing::debug!(id, "Repository busy, purge deferred");
                return Ok(false);
            }
            // Only present in the store.
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if permit.is_some() && self.registry.snapshot_of(id).is_some_and(|e| e.declared) {
            tracing::debug!(id, "Repository re-declared, purge cancelled");
            return Ok(false);
        }

        let store = Arc::clone(&self.store);
        let owned = id.to_string();
        let deleted = tokio::task::spawn_blocking(move || store.delete(&owned))
            .await
            .map_err(|e| Error::internal(format!("purge task panicked: {e}")))?;

        if let Err(e) = deleted {
            PURGES_TOTAL.with_label_values(&["failed"]).inc();
            tracing::error!(id, error = %e, "Failed to purge index");
            return if e.is_fatal() { Err(e) } else { Ok(false) };
        }

        self.registry.remove(id);
        drop(permit);

        PURGES_TOTAL.with_label_values(&["purged"]).inc();
        tracing::info!(id, "Repository purged");
        Ok(true)
    }

    async fn dispatch(
        &self,
        ids: Vec<String>,
        cancel: &CancellationToken,
        report: &mut CycleReport,
    ) -> Result<()> {
        let cycle = cancel.child_token();
        let job = IndexJob {
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            indexer: self.indexer.clone(),
            workers: Arc::clone(&self.workers),
            cancel: cycle.clone(),
        };

        let mut jobs = JoinSet::new();
        for id in ids {
            jobs.spawn(job.clone().run(id));
        }

        let mut fatal = None;
        while let Some(joined) = jobs.join_next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    // Let running builds stop, keep collecting them.
                    cycle.cancel();
                    fatal.get_or_insert(e);
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Index job panicked");
                    continue;
                }
            };

            match outcome {
                JobOutcome::Indexed { id, record } => {
                    report.skipped_files += record.skipped.len();
                    report.indexed.push(id);
                }
                JobOutcome::Failed { id, .. } => report.failed.push(id),
                JobOutcome::Cancelled { id } => report.cancelled.push(id),
                JobOutcome::Busy { id } => report.busy.push(id),
                JobOutcome::Gone { .. } => {}
            }
        }

        // Completion order is arbitrary.
        report.indexed.sort();
        report.failed.sort();
        report.cancelled.sort();
        report.busy.sort();

        fatal.map_or(Ok(()), Err)
    }

    /// Resync, hydrate and reindex once.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or the index
    /// path is unusable.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        self.resync().await?;
        self.hydrate().await;
        self.reindex(cancel)
            .await?
            .ok_or_else(|| Error::internal("reindex already running"))
    }

    /// Run both triggers until `cancel` fires.
    ///
    /// The first resync, hydration and reindex happen immediately. A failed
    /// resync keeps the previous registry state; a fatal storage error
    /// stops the scheduler.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped the scheduler.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        tracing::info!(
            reindex_ms = self.settings.reindex_interval,
            resync_ms = self.settings.resync_interval,
            workers = self.settings.max_concurrent_indexers,
            "Scheduler started"
        );

        if let Err(e) = self.resync().await {
            tracing::error!(error = %e, "Initial resync failed");
        }
        self.hydrate().await;

        let stop = cancel.child_token();

        let resync_loop = async {
            let period = self.settings.resync_every();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = stop.cancelled() => return Ok::<(), Error>(()),
                    _ = ticker.tick() => {
                        if let Err(e) = self.resync().await {
                            tracing::error!(error = %e, "Resync failed; keeping previous registry");
                        }
                    }
                }
            }
        };

        let reindex_loop = async {
            let mut ticker = tokio::time::interval(self.settings.reindex_every());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = stop.cancelled() => return Ok::<(), Error>(()),
                    _ = ticker.tick() => {
                        match self.reindex(&stop).await {
                            Ok(_) => {}
                            Err(e) if e.is_fatal() => {
                                tracing::error!(error = %e, "Fatal storage error, stopping");
                                stop.cancel();
                                return Err(e);
                            }
                            Err(e) => tracing::error!(error = %e, "Reindex failed"),
                        }
                    }
                }
            }
        };

        let result = tokio::try_join!(resync_loop, reindex_loop).map(|_| ());
        tracing::info!("Scheduler stopped");
        result
    }

    fn update_gauges(&self) {
        REPOSITORIES_TOTAL.set(i64::try_from(self.registry.len()).unwrap_or(i64::MAX));
        STALE_REPOSITORIES.set(i64::try_from(self.registry.stale_count()).unwrap_or(i64::MAX));
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("settings", &self.settings)
            .field("repositories", &self.registry.len())
            .field("watcher", &self.watcher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
