//! Filesystem watching for local repositories.
//!
//! This module provides:
//! - A debounced notify watcher over declared local repositories
//! - Path to repository resolution that ignores VCS metadata

mod debounced;
mod roots;

pub use debounced::{RepoWatcher, DEBOUNCE_DURATION};
pub use roots::WatchRoots;
