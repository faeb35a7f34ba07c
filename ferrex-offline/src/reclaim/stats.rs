//! Lifetime auto-clean counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of [`AutoCleanStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoCleanStatsSnapshot {
    /// Completed runs.
    pub runs: u64,
    /// Runs skipped while disabled.
    pub skipped_runs: u64,
    /// Downloads removed.
    pub deleted: u64,
    /// Deletions that failed.
    pub failed: u64,
    /// Bytes freed.
    pub bytes_reclaimed: u64,
}

/// Counters shared across runs.
#[derive(Debug, Default)]
pub struct AutoCleanStats {
    runs: AtomicU64,
    skipped_runs: AtomicU64,
    deleted: AtomicU64,
    failed: AtomicU64,
    bytes_reclaimed: AtomicU64,
}

impl AutoCleanStats {
    /// Count a run skipped while disabled.
    pub fn on_run_skipped(&self) {
        self.skipped_runs.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one run into the totals.
    pub fn on_run_finished(&self, deleted: u64, failed: u64, bytes: u64) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.deleted.fetch_add(deleted, Ordering::Relaxed);
        self.failed.fetch_add(failed, Ordering::Relaxed);
        self.bytes_reclaimed.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Copy the current totals.
    pub fn snapshot(&self) -> AutoCleanStatsSnapshot {
        AutoCleanStatsSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            skipped_runs: self.skipped_runs.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes_reclaimed: self.bytes_reclaimed.load(Ordering::Relaxed),
        }
    }
}
