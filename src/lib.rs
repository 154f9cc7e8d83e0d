//! trigrep library
//!
//! Keeps trigram indexes for a fleet of repositories in sync with their
//! declared configuration: a registry of repositories, a trigram indexer,
//! a durable index store, a staleness reconciler and a scheduler that
//! drives them.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod indexer;
pub mod observability;
pub mod reconciler;
pub mod registry;
pub mod scheduler;
pub mod storage;
pub mod watcher;

pub use config::{AppContext, ConfigSource, JsonConfigFile, Settings};
pub use error::{Error, Result};
pub use registry::{Registry, Repository};
pub use scheduler::{CycleReport, Scheduler};
pub use storage::IndexStore;
