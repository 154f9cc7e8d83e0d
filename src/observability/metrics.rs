//! Prometheus metrics definitions.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

use crate::{Error, Result};

/// Registered repositories.
pub static REPOSITORIES_TOTAL: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("trigrep_repositories_total", "Number of registered repositories")
        .expect("metric can be registered")
});

/// Repositories flagged stale.
pub static STALE_REPOSITORIES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "trigrep_stale_repositories",
        "Number of repositories whose index lags their declaration"
    )
    .expect("metric can be registered")
});

/// Builds currently running.
pub static BUILDS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("trigrep_builds_in_flight", "Number of index builds in progress")
        .expect("metric can be registered")
});

/// Finished builds by outcome (indexed, failed, cancelled, busy).
pub static BUILDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "trigrep_builds_total",
        "Total number of index builds by outcome",
        &["outcome"]
    )
    .expect("metric can be registered")
});

/// Skipped files by reason.
pub static SKIPPED_FILES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "trigrep_skipped_files_total",
        "Total number of files left out of an index",
        &["reason"]
    )
    .expect("metric can be registered")
});

/// Purged repositories.
pub static PURGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "trigrep_purges_total",
        "Total number of purge attempts by outcome",
        &["outcome"]
    )
    .expect("metric can be registered")
});

/// Build duration by repository kind.
pub static BUILD_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "trigrep_build_duration_seconds",
        "Index build duration in seconds",
        &["vcs"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
    )
    .expect("metric can be registered")
});

/// Initialize all metrics (call once at startup).
pub fn init_metrics() {
    let _ = &*REPOSITORIES_TOTAL;
    let _ = &*STALE_REPOSITORIES;
    let _ = &*BUILDS_IN_FLIGHT;
    let _ = &*BUILDS_TOTAL;
    let _ = &*SKIPPED_FILES_TOTAL;
    let _ = &*PURGES_TOTAL;
    let _ = &*BUILD_DURATION;

    tracing::debug!("Prometheus metrics initialized");
}

/// Render the default registry in the text exposition format.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn render() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| Error::internal(format!("failed to encode metrics: {e}")))?;
    String::from_utf8(buffer).map_err(|e| Error::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init() {
        init_metrics();

        REPOSITORIES_TOTAL.set(3);
        assert_eq!(REPOSITORIES_TOTAL.get(), 3);

        BUILDS_TOTAL.with_label_values(&["indexed"]).inc();
        assert!(BUILDS_TOTAL.with_label_values(&["indexed"]).get() >= 1);
    }

    #[test]
    fn test_render_contains_metrics() {
        init_metrics();
        SKIPPED_FILES_TOTAL.with_label_values(&["binary"]).inc();

        let text = render().unwrap();
        assert!(text.contains("trigrep_skipped_files_total"));
    }
}
