//! Automatic deletion of watched downloads.
//!
//! Two phases run over watched, completed downloads ordered by completion
//! time: everything past the retention window goes first, then further
//! candidates are removed oldest-first while the expected free space stays
//! below the configured minimum. Free space is queried once and then
//! estimated from the sizes of successful deletions, unless
//! [`AutoCleanPreferences::requery_free_space`] asks for a fresh reading
//! after each one.

/// Candidate selection.
pub mod plan;
/// User preferences.
pub mod prefs;
/// Run counters.
pub mod stats;

pub use plan::{ReclaimCandidate, ReclaimReason, select_candidates};
pub use prefs::{AutoCleanPreferences, BYTES_PER_GIB, PreferencesStore};
pub use stats::{AutoCleanStats, AutoCleanStatsSnapshot};

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    domain::DownloadRecord,
    error::{DownloadError, Result},
};
use plan::partition_by_retention;

/// The local download subsystem.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DownloadManager: Send + Sync {
    /// Live view of every known download.
    fn observe(&self) -> watch::Receiver<Vec<DownloadRecord>>;

    /// Remove the file and its record.
    async fn delete_download(
        &self,
        download_id: Uuid,
    ) -> std::result::Result<(), DownloadError>;

    /// Free bytes on the download volume.
    async fn available_storage(&self) -> std::result::Result<u64, DownloadError>;

    /// Capacity of the download volume in bytes.
    async fn total_storage(&self) -> std::result::Result<u64, DownloadError>;

    /// Bytes used by downloads.
    async fn used_storage(&self) -> std::result::Result<u64, DownloadError>;
}

/// A download deleted, or selected in a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimedDownload {
    /// Deleted download.
    pub download_id: Uuid,
    /// Media item of the download.
    pub item_id: Uuid,
    /// Bytes freed.
    pub size_bytes: u64,
    /// Which phase selected it.
    pub reason: ReclaimReason,
}

/// Outcome of one auto-clean run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoCleanReport {
    /// Downloads removed, in deletion order.
    pub deleted: Vec<ReclaimedDownload>,
    /// Deletions that failed.
    pub failed: usize,
    /// Removed for exceeding the retention window.
    pub retention_deleted: usize,
    /// Removed to reach the free-space target.
    pub free_space_deleted: usize,
    /// Free space after the run. `None` when it could not be queried.
    pub expected_free_bytes: Option<u64>,
    /// Free space ended at or above the target.
    pub target_met: bool,
    /// Auto-clean was disabled and the run was not forced.
    pub skipped: bool,
    /// Nothing was deleted; the report shows what would have been.
    pub dry_run: bool,
}

impl AutoCleanReport {
    /// Number of downloads removed.
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    /// Total bytes freed.
    pub fn reclaimed_bytes(&self) -> u64 {
        self.deleted.iter().map(|d| d.size_bytes).sum()
    }

    fn record(&mut self, candidate: &ReclaimCandidate, reason: ReclaimReason) {
        match reason {
            ReclaimReason::RetentionExpired => self.retention_deleted += 1,
            ReclaimReason::FreeSpaceTarget => self.free_space_deleted += 1,
        }
        self.deleted.push(ReclaimedDownload {
            download_id: candidate.download_id,
            item_id: candidate.item_id,
            size_bytes: candidate.size_bytes,
            reason,
        });
    }
}

/// Deletes watched downloads by age and free-space target.
pub struct StorageReclaimer {
    downloads: Arc<dyn DownloadManager>,
    stats: AutoCleanStats,
}

impl fmt::Debug for StorageReclaimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageReclaimer")
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl StorageReclaimer {
    /// Reclaimer over `downloads`.
    pub fn new(downloads: Arc<dyn DownloadManager>) -> Self {
        Self {
            downloads,
            stats: AutoCleanStats::default(),
        }
    }

    /// Lifetime counters.
    pub fn stats(&self) -> &AutoCleanStats {
        &self.stats
    }

    /// Delete watched downloads per `prefs`. With auto-clean disabled this
    /// does nothing unless `force` is set.
    pub async fn run_auto_clean(
        &self,
        prefs: &AutoCleanPreferences,
        force: bool,
    ) -> Result<AutoCleanReport> {
        if !prefs.enabled && !force {
            debug!("auto-clean disabled; skipping run");
            self.stats.on_run_skipped();
            return Ok(AutoCleanReport {
                skipped: true,
                ..AutoCleanReport::default()
            });
        }

        let report = self.execute(prefs, false).await;
        info!(
            "auto-clean finished; deleted={}, retention={}, free_space={}, failed={}, reclaimed_bytes={}, target_met={}",
            report.deleted_count(),
            report.retention_deleted,
            report.free_space_deleted,
            report.failed,
            report.reclaimed_bytes(),
            report.target_met
        );
        self.stats.on_run_finished(
            report.deleted_count() as u64,
            report.failed as u64,
            report.reclaimed_bytes(),
        );
        Ok(report)
    }

    /// What a forced run would delete right now, without deleting anything.
    pub async fn preview_auto_clean(
        &self,
        prefs: &AutoCleanPreferences,
    ) -> Result<AutoCleanReport> {
        Ok(self.execute(prefs, true).await)
    }

    async fn execute(
        &self,
        prefs: &AutoCleanPreferences,
        dry_run: bool,
    ) -> AutoCleanReport {
        let mut report = AutoCleanReport {
            dry_run,
            ..AutoCleanReport::default()
        };

        let records = self.downloads.observe().borrow().clone();
        let candidates = select_candidates(&records);
        let target = prefs.min_free_space_bytes();

        let mut free = match self.downloads.available_storage().await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(
                    "auto-clean could not query free space; free-space phase disabled; err={}",
                    err
                );
                None
            }
        };

        if candidates.is_empty() {
            debug!("auto-clean found no watched downloads");
            report.expected_free_bytes = free;
            report.target_met = free.is_some_and(|b| b >= target);
            return report;
        }

        let (expired, remaining) =
            partition_by_retention(candidates, Utc::now(), prefs.retention());

        for candidate in &expired {
            self.reclaim(
                candidate,
                ReclaimReason::RetentionExpired,
                prefs.requery_free_space && !dry_run,
                dry_run,
                &mut free,
                &mut report,
            )
            .await;
        }

        if free.is_some() {
            for candidate in &remaining {
                if free.is_some_and(|b| b >= target) {
                    break;
                }
                self.reclaim(
                    candidate,
                    ReclaimReason::FreeSpaceTarget,
                    prefs.requery_free_space && !dry_run,
                    dry_run,
                    &mut free,
                    &mut report,
                )
                .await;
            }
        }

        report.expected_free_bytes = free;
        report.target_met = free.is_some_and(|b| b >= target);
        report
    }

    async fn reclaim(
        &self,
        candidate: &ReclaimCandidate,
        reason: ReclaimReason,
        requery: bool,
        dry_run: bool,
        free: &mut Option<u64>,
        report: &mut AutoCleanReport,
    ) {
        if !dry_run {
            if let Err(err) =
                self.downloads.delete_download(candidate.download_id).await
            {
                warn!(
                    "auto-clean failed to delete download {}; err={}",
                    candidate.download_id, err
                );
                report.failed += 1;
                return;
            }
            debug!(
                "auto-clean deleted download {} ({:?}); bytes={}",
                candidate.download_id, reason, candidate.size_bytes
            );
        }
        report.record(candidate, reason);

        let estimated = free.map(|b| b.saturating_add(candidate.size_bytes));
        *free = if requery && free.is_some() {
            match self.downloads.available_storage().await {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    debug!(
                        "free space re-query failed; keeping estimate; err={}",
                        err
                    );
                    estimated
                }
            }
        } else {
            estimated
        };
    }
}
