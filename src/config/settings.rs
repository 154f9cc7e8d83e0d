//! Process-wide indexing settings and validation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default maximum file size (2 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;

/// Default maximum distinct trigrams per document.
pub const DEFAULT_MAX_TRIGRAM_COUNT: usize = 20_000;

/// Default reindex interval (1 hour).
pub const DEFAULT_REINDEX_INTERVAL_MS: u64 = 60 * 60 * 1000;

/// Default resync interval (24 hours).
pub const DEFAULT_RESYNC_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// Indexing settings, loaded once and shared read-only by every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Files larger than this (bytes) are skipped, never truncated.
    pub max_file_size: u64,

    /// Documents with more distinct trigrams than this are skipped entirely.
    pub max_trigram_count: usize,

    /// Purge repositories that disappear from the configuration.
    pub auto_delete_stale_repos: bool,

    /// Reindex trigger period in milliseconds.
    pub reindex_interval: u64,

    /// Resync trigger period in milliseconds.
    pub resync_interval: u64,

    /// Size of the index worker pool.
    pub max_concurrent_indexers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_trigram_count: DEFAULT_MAX_TRIGRAM_COUNT,
            auto_delete_stale_repos: true,
            reindex_interval: DEFAULT_REINDEX_INTERVAL_MS,
            resync_interval: DEFAULT_RESYNC_INTERVAL_MS,
            max_concurrent_indexers: std::thread::available_parallelism()
                .map(|n| n.get().min(4))
                .unwrap_or(4),
        }
    }
}

impl Settings {
    /// Validate settings values.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 {
            return Err(Error::config("maxFileSize cannot be 0"));
        }

        // Offsets are stored as u32.
        if self.max_file_size > u64::from(u32::MAX) {
            return Err(Error::config(format!(
                "maxFileSize cannot exceed {} bytes",
                u32::MAX
            )));
        }

        if self.max_trigram_count == 0 {
            return Err(Error::config("maxTrigramCount cannot be 0"));
        }

        if self.reindex_interval == 0 {
            return Err(Error::config("reindexInterval cannot be 0"));
        }

        if self.resync_interval == 0 {
            return Err(Error::config("resyncInterval cannot be 0"));
        }

        if self.max_concurrent_indexers == 0 {
            return Err(Error::config("maxConcurrentIndexers cannot be 0"));
        }

        if self.max_concurrent_indexers > 64 {
            return Err(Error::config("maxConcurrentIndexers cannot exceed 64"));
        }

        Ok(())
    }

    /// Reindex trigger period.
    #[must_use]
    pub const fn reindex_every(&self) -> Duration {
        Duration::from_millis(self.reindex_interval)
    }

    /// Resync trigger period.
    #[must_use]
    pub const fn resync_every(&self) -> Duration {
        Duration::from_millis(self.resync_interval)
    }
}
