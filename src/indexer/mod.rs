//! Trigram indexing.
//!
//! This module provides:
//! - Deterministic repository enumeration with declared exclusions
//! - Binary detection and per-file limits
//! - Trigram extraction and repository-level postings

mod builder;
mod filter;
mod scanner;
mod trigram;

pub use builder::{BuiltIndex, TrigramIndexer};
pub use filter::{looks_binary, PathFilter, BINARY_SNIFF_LEN};
pub use scanner::{
    scan_repository, RepositoryScan, ScanStatsSnapshot, ScannedFile, UnreadableEntry,
};
pub use trigram::{extract_trigrams, FileTrigrams};
