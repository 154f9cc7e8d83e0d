//! Per-cycle summaries.

use std::fmt;

/// Result of one resync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Repositories in the loaded configuration.
    pub declared: usize,
    pub inserted: usize,
    /// Declarations whose indexed fields changed.
    pub changed: usize,
    /// Registered repositories no longer declared.
    pub retired: usize,
}

impl fmt::Display for ResyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "declared={} inserted={} changed={} retired={}",
            self.declared, self.inserted, self.changed, self.retired
        )
    }
}

/// Result of one reindex cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub indexed: Vec<String>,
    pub failed: Vec<String>,
    pub purged: Vec<String>,
    /// Builds stopped by cancellation.
    pub cancelled: Vec<String>,
    /// Repositories another worker was already building.
    pub busy: Vec<String>,
    pub up_to_date: usize,
    /// Undeclared repositories kept because auto-deletion is off.
    pub retained: Vec<String>,
    /// Files left out of the indexes built this cycle.
    pub skipped_files: usize,
}

impl CycleReport {
    /// Whether the cycle changed nothing on disk.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.indexed.is_empty() && self.purged.is_empty()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "indexed={} failed={} purged={} cancelled={} busy={} up_to_date={} retained={} skipped_files={}",
            self.indexed.len(),
            self.failed.len(),
            self.purged.len(),
            self.cancelled.len(),
            self.busy.len(),
            self.up_to_date,
            self.retained.len(),
            self.skipped_files
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_report_display() {
        let report = CycleReport {
            indexed: vec!["r1".to_string()],
            up_to_date: 2,
            ..CycleReport::default()
        };
        let text = report.to_string();
        assert!(text.contains("indexed=1"));
        assert!(text.contains("up_to_date=2"));
        assert!(!report.is_noop());
        assert!(CycleReport::default().is_noop());
    }
}
