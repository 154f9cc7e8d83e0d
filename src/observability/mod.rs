//! Structured logging and metrics.
//!
//! Provides:
//! - `tracing` subscriber setup with plain or JSON output
//! - Spans shared by scheduler cycles and index jobs
//! - Prometheus metrics for repositories and builds

pub mod metrics;

use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry,
};

/// Initialize tracing.
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed in this process.
pub fn init_tracing(level: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let json_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true);

        Registry::default().with(env_filter).with(json_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true);

        Registry::default().with(env_filter).with(fmt_layer).init();
    }

    tracing::debug!("Tracing initialized: level={}, json={}", level, json);
}

/// Spans for scheduler work.
pub mod spans {
    use tracing::{info_span, Span};

    /// Span covering one resync or reindex cycle.
    #[must_use]
    pub fn cycle_span(kind: &'static str) -> Span {
        info_span!("cycle", kind = kind)
    }

    /// Span covering one repository build.
    #[must_use]
    pub fn index_span(repo_id: &str, vcs: &'static str) -> Span {
        info_span!("index", repo = %repo_id, vcs = vcs)
    }
}
