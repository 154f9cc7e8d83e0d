//! One repository build: index, publish, record the outcome.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::indexer::TrigramIndexer;
use crate::observability::metrics::{
    BUILDS_IN_FLIGHT, BUILDS_TOTAL, BUILD_DURATION, SKIPPED_FILES_TOTAL,
};
use crate::observability::spans;
use crate::registry::Registry;
use crate::storage::{IndexRecord, IndexStore};
use crate::{Error, Result};

/// Consecutive failures after which a repository is reported as stuck.
pub const FAILURE_WARN_THRESHOLD: u32 = 3;

/// How a build ended, when it did not end the process.
#[derive(Debug)]
pub enum JobOutcome {
    Indexed { id: String, record: IndexRecord },
    Failed { id: String, error: Error },
    Cancelled { id: String },
    /// Another worker holds the repository.
    Busy { id: String },
    /// Removed from the registry before the build started.
    Gone { id: String },
}

impl JobOutcome {
    const fn label(&self) -> &'static str {
        match self {
            Self::Indexed { .. } => "indexed",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
            Self::Busy { .. } => "busy",
            Self::Gone { .. } => "gone",
        }
    }
}

/// Everything a build needs, cloneable into a spawned task.
#[derive(Debug, Clone)]
pub struct IndexJob {
    pub registry: Arc<Registry>,
    pub store: Arc<IndexStore>,
    pub indexer: TrigramIndexer,
    pub workers: Arc<Semaphore>,
    pub cancel: CancellationToken,
}

impl IndexJob {
    /// Build and publish one repository.
    ///
    /// # Errors
    ///
    /// Returns an error only when the failure is fatal to the process
    /// (the index path became unwritable). Every other failure is reported
    /// as [`JobOutcome::Failed`] and leaves the repository stale.
    pub async fn run(self, id: String) -> Result<JobOutcome> {
        let _worker = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(self.finish(JobOutcome::Cancelled { id })),
            permit = Arc::clone(&self.workers).acquire_owned() => {
                permit.map_err(|e| Error::internal(format!("worker pool closed: {e}")))?
            }
        };

        let permit = match self.registry.try_begin_indexing(&id) {
            Ok(Some(permit)) => permit,
            Ok(None) => return Ok(self.finish(JobOutcome::Busy { id })),
            Err(e) if e.is_not_found() => return Ok(self.finish(JobOutcome::Gone { id })),
            Err(e) => return Err(e),
        };

        let Some(repo) = self.registry.get(&id) else {
            return Ok(self.finish(JobOutcome::Gone { id }));
        };

        let span = spans::index_span(&id, repo.vcs());
        let vcs = repo.vcs();
        let started_at = Utc::now();
        let clock = Instant::now();

        BUILDS_IN_FLIGHT.inc();
        let build = {
            let store = Arc::clone(&self.store);
            let indexer = self.indexer.clone();
            let cancel = self.cancel.clone();
            let id = id.clone();
            tokio::task::spawn_blocking(move || {
                let _entered = span.enter();
                let built = indexer.index(&repo, started_at, &cancel)?;
                // Last chance to leave the previous index in place.
                if cancel.is_cancelled() {
                    return Err(crate::error::IndexError::Cancelled.into());
                }
                store.write(&id, &built.record, &built.payload)
            })
            .await
        };
        BUILDS_IN_FLIGHT.dec();
        BUILD_DURATION
            .with_label_values(&[vcs])
            .observe(clock.elapsed().as_secs_f64());

        let result = build.unwrap_or_else(|e| Err(Error::internal(format!("index task panicked: {e}"))));

        let outcome = match result {
            Ok(record) => {
                for skipped in &record.skipped {
                    SKIPPED_FILES_TOTAL
                        .with_label_values(&[skipped.reason.label()])
                        .inc();
                }
                let cleared = self.registry.mark_indexed(&id, started_at).unwrap_or(false);
                if !cleared {
                    tracing::debug!(id = %id, "Declaration changed during build; still stale");
                }
                tracing::info!(
                    id = %id,
                    files = record.file_count,
                    skipped = record.skipped.len(),
                    elapsed_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Repository indexed"
                );
                JobOutcome::Indexed { id, record }
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(id = %id, "Build cancelled; previous index kept");
                JobOutcome::Cancelled { id }
            }
            Err(e) => {
                let failures = self.registry.record_failure(&id).unwrap_or(0);
                if e.is_fatal() {
                    tracing::error!(id = %id, error = %e, "Index path is unwritable");
                    drop(permit);
                    BUILDS_TOTAL.with_label_values(&["failed"]).inc();
                    return Err(e);
                }
                if failures >= FAILURE_WARN_THRESHOLD {
                    tracing::warn!(
                        id = %id,
                        failures,
                        error = %e,
                        "Repository keeps failing to index"
                    );
                } else {
                    tracing::error!(id = %id, failures, error = %e, "Failed to index repository");
                }
                JobOutcome::Failed { id, error: e }
            }
        };

        drop(permit);
        Ok(self.finish(outcome))
    }

    fn finish(&self, outcome: JobOutcome) -> JobOutcome {
        BUILDS_TOTAL.with_label_values(&[outcome.label()]).inc();
        outcome
    }
}
