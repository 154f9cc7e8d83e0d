//! Repository registry.
//!
//! This module provides:
//! - The `Repository` declaration model (git or local)
//! - The shared registry with per-repository locking and staleness flags

mod entries;
mod repository;

pub use entries::{
    IndexPhase, IndexingPermit, Registry, RegistrySnapshot, RepoSnapshot, UpsertOutcome,
};
pub use repository::{GitSource, LocalSource, Repository, VcsSource};
