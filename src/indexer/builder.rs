//! Repository-level trigram index builder.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::filter::{looks_binary, PathFilter};
use super::scanner::{scan_repository, ScannedFile};
use super::trigram::{extract_trigrams, FileTrigrams};
use crate::config::Settings;
use crate::error::IndexError;
use crate::registry::Repository;
use crate::storage::{
    IndexPayload, IndexRecord, Limit, Occurrence, SkipReason, SkippedFile, Trigram,
};
use crate::Result;

/// Output of one successful build. Nothing is published yet.
#[derive(Debug, Clone)]
pub struct BuiltIndex {
    pub record: IndexRecord,
    pub payload: IndexPayload,
}

/// Builds trigram indexes for whole repositories.
///
/// The indexer is a pure function of the repository tree and the settings;
/// it never touches the index store.
#[derive(Debug, Clone)]
pub struct TrigramIndexer {
    settings: Settings,
}

impl TrigramIndexer {
    /// Create an indexer with the given limits.
    #[must_use]
    pub const fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Build the index for `repo`.
    ///
    /// `indexed_at` is stamped into the record. File-level problems end up
    /// in the skip manifest; only an unreadable root or cancellation fail
    /// the build.
    ///
    /// # Errors
    ///
    /// Returns `Unreadable` if the repository root cannot be listed,
    /// `Cancelled` if `cancel` fires before the build completes, or a
    /// configuration error for invalid exclusion patterns.
    pub fn index(
        &self,
        repo: &Repository,
        indexed_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<BuiltIndex> {
        let root = repo.path.as_path();

        let metadata = std::fs::metadata(root).map_err(|e| IndexError::unreadable(root, e))?;
        if !metadata.is_dir() {
            return Err(IndexError::unreadable(root, "not a directory").into());
        }
        std::fs::read_dir(root).map_err(|e| IndexError::unreadable(root, e))?;

        let filter = PathFilter::with_patterns(root, repo.excluded_paths())?;
        let scan = scan_repository(root, &filter);

        let mut files_out = Vec::new();
        let mut postings: BTreeMap<Trigram, Vec<Occurrence>> = BTreeMap::new();
        let mut skipped: Vec<SkippedFile> = scan
            .unreadable
            .into_iter()
            .map(|entry| SkippedFile {
                path: entry.relative,
                reason: SkipReason::Unreadable { error: entry.error },
            })
            .collect();

        for file in &scan.files {
            if cancel.is_cancelled() {
                tracing::info!(id = %repo.id, "Indexing cancelled");
                return Err(IndexError::Cancelled.into());
            }

            let trigrams = match self.index_file(file) {
                Ok(trigrams) => trigrams,
                Err(reason) => {
                    tracing::debug!(
                        id = %repo.id,
                        path = %file.relative,
                        reason = reason.label(),
                        "Skipping file"
                    );
                    skipped.push(SkippedFile {
                        path: file.relative.clone(),
                        reason,
                    });
                    continue;
                }
            };

            #[allow(clippy::cast_possible_truncation)]
            let file_id = files_out.len() as u32;
            for (trigram, offsets) in trigrams.into_postings() {
                postings
                    .entry(trigram)
                    .or_default()
                    .extend(offsets.into_iter().map(|offset| Occurrence {
                        file: file_id,
                        offset,
                    }));
            }
            files_out.push(file.relative.clone());
        }

        skipped.sort_by(|a, b| a.path.cmp(&b.path));

        let payload = IndexPayload {
            files: files_out,
            postings,
        };
        let record = IndexRecord::new(
            repo.id.clone(),
            indexed_at,
            repo.config_fingerprint(),
            &payload,
            skipped,
        );

        tracing::info!(
            id = %repo.id,
            files = record.file_count,
            trigrams = record.trigram_count,
            postings = record.posting_count,
            skipped = record.skipped.len(),
            excluded = scan.stats.files_excluded,
            "Built trigram index"
        );

        Ok(BuiltIndex { record, payload })
    }

    /// Extract trigrams for one file, or the reason it is skipped.
    fn index_file(&self, file: &ScannedFile) -> std::result::Result<FileTrigrams, SkipReason> {
        within_limit(Limit::FileSize, file.size, self.settings.max_file_size)
            .map_err(skip_reason)?;

        let content = std::fs::read(&file.path).map_err(|e| SkipReason::Unreadable {
            error: e.to_string(),
        })?;

        // The file may have grown since it was scanned.
        within_limit(Limit::FileSize, content.len() as u64, self.settings.max_file_size)
            .map_err(skip_reason)?;

        if looks_binary(&content) {
            return Err(SkipReason::Binary);
        }

        let trigrams = extract_trigrams(&content);
        within_limit(
            Limit::TrigramCount,
            trigrams.distinct() as u64,
            self.settings.max_trigram_count as u64,
        )
        .map_err(skip_reason)?;

        Ok(trigrams)
    }
}

fn within_limit(limit: Limit, actual: u64, max: u64) -> std::result::Result<(), IndexError> {
    if actual > max {
        return Err(IndexError::LimitExceeded { limit, actual, max });
    }
    Ok(())
}

fn skip_reason(err: IndexError) -> SkipReason {
    match err {
        IndexError::LimitExceeded { limit, actual, max } => {
            SkipReason::LimitExceeded { limit, actual, max }
        }
        other => SkipReason::Unreadable {
            error: other.to_string(),
        },
    }
}
