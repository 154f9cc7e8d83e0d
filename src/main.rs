//! trigrep - multi-repository trigram indexer
//!
//! Entry point for the indexing daemon.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use trigrep::config::{ConfigSource, Declarations};
use trigrep::observability::{init_tracing, metrics};
use trigrep::watcher::{RepoWatcher, DEBOUNCE_DURATION};
use trigrep::{AppContext, IndexStore, JsonConfigFile, Registry, Result, Scheduler};

/// trigrep - keep trigram indexes in sync with declared repositories
#[derive(Parser, Debug)]
#[command(name = "trigrep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Cache directory holding repository checkouts and indexes
    #[arg(long, env = "TRIGREP_CACHE_DIR", default_value = "./.trigrep")]
    cache_dir: PathBuf,

    /// Declared configuration file (JSON)
    #[arg(short, long, env = "TRIGREP_CONFIG", default_value = "./trigrep.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TRIGREP_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, env = "TRIGREP_LOG_JSON")]
    log_json: bool,

    /// Run a single resync and reindex cycle, then exit
    #[arg(long, env = "TRIGREP_ONCE")]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_json);

    tracing::info!("trigrep v{} starting...", env!("CARGO_PKG_VERSION"));

    let ctx = AppContext::from_cache_dir(&cli.cache_dir, cli.config);
    ctx.ensure_dirs()?;
    tracing::debug!(?ctx, "Paths resolved");

    let source = Arc::new(JsonConfigFile::new(ctx.clone()));
    let Declarations { settings, .. } = source.load()?;
    let settings = settings.unwrap_or_default();
    settings.validate()?;
    tracing::debug!(?settings, "Settings loaded");

    metrics::init_metrics();

    let registry = Arc::new(Registry::new());
    let store = Arc::new(IndexStore::open(&ctx.index_path)?);
    let mut scheduler = Scheduler::new(settings, Arc::clone(&registry), store, source);

    let cancel = CancellationToken::new();

    if cli.once {
        let report = scheduler.run_once(&cancel).await?;
        tracing::info!(%report, "Single cycle complete");
        return Ok(());
    }

    match RepoWatcher::new(Arc::clone(&registry), DEBOUNCE_DURATION) {
        Ok(watcher) => scheduler = scheduler.with_watcher(watcher),
        Err(e) => tracing::warn!(error = %e, "File watching disabled"),
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    let result = scheduler.run(&cancel).await;

    match metrics::render() {
        Ok(text) => tracing::debug!(metrics = %text, "Final metrics"),
        Err(e) => tracing::debug!(error = %e, "Cannot render metrics"),
    }

    result
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
