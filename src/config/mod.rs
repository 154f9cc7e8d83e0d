//! Configuration management for trigrep.
//!
//! Supports configuration from:
//! - Command-line arguments and `TRIGREP_*` environment variables (paths, logging)
//! - A declared JSON file (settings and repositories)

mod context;
mod settings;
mod source;

pub use context::AppContext;
pub use settings::{
    Settings, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_TRIGRAM_COUNT, DEFAULT_REINDEX_INTERVAL_MS,
    DEFAULT_RESYNC_INTERVAL_MS,
};
pub use source::{ConfigSource, Declarations, JsonConfigFile, StaticConfig};
