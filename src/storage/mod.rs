//! Durable on-disk storage for trigram indexes.
//!
//! This module provides:
//! - The persisted record and postings models
//! - Atomic, generation-based publication per repository
//! - Integrity checks on read

mod layout;
mod models;
mod store;

pub use models::{
    checksum, IndexPayload, IndexRecord, Limit, Occurrence, SkipReason, SkippedFile, Trigram,
    INDEX_FORMAT_VERSION,
};
pub use store::IndexStore;
