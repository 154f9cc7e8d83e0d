//! Error types and Result aliases for trigrep.
//!
//! This module defines the error hierarchy used throughout the crate.
//! All public functions return `Result<T, Error>` or `Result<T>`.
//!
//! File-level problems (oversized files, binary content, too many trigrams)
//! never show up here as failures of a whole job: the indexer absorbs them
//! into the skip manifest of the index record.

use thiserror::Error;

use crate::storage::Limit;

/// Result type alias using trigrep's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for trigrep operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Repository registry error.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Trigram indexing error.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Index store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// File watching error.
    #[error("watcher error: {0}")]
    Watcher(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Registry-specific errors.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Repository is not registered.
    #[error("repository '{0}' not found")]
    NotFound(String),
}

/// Indexing errors that abort a whole repository.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Repository root cannot be read.
    #[error("repository path '{path}' is unreadable: {reason}")]
    Unreadable { path: String, reason: String },

    /// A single file exceeded a configured limit.
    #[error("{limit} limit exceeded: {actual} > {max}")]
    LimitExceeded { limit: Limit, actual: u64, max: u64 },

    /// Job was cancelled before it could publish.
    #[error("indexing cancelled")]
    Cancelled,
}

/// Index store errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No index is stored for the repository.
    #[error("not found: {entity} with id '{id}'")]
    NotFound { entity: &'static str, id: String },

    /// Stored index is malformed or partially written.
    #[error("corrupt index for '{id}': {reason}")]
    CorruptIndex { id: String, reason: String },

    /// The index cache path cannot be written.
    #[error("index path '{path}' is unwritable: {reason}")]
    Unwritable { path: String, reason: String },

    /// Serialization failure while encoding a record.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error means "there is nothing usable stored here".
    ///
    /// A corrupt index is treated exactly like a missing one so that the
    /// next reconcile pass forces a rebuild.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Registry(RegistryError::NotFound(_))
                | Self::Storage(StorageError::NotFound { .. } | StorageError::CorruptIndex { .. })
        )
    }

    /// Whether the process can make no further progress.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(StorageError::Unwritable { .. }))
    }

    /// Whether this error is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Index(IndexError::Cancelled))
    }
}

impl IndexError {
    /// Create an unreadable-path error.
    pub fn unreadable(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        Self::Unreadable {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl StorageError {
    /// Create a not-found error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create a corrupt-index error.
    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an unwritable-path error.
    pub fn unwritable(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        Self::Unwritable {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests;
