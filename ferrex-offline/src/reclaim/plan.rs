//! Candidate selection for auto-clean.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::DownloadRecord;

/// Why a download was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimReason {
    /// Watched longer ago than the retention window.
    RetentionExpired,
    /// Removed to bring free space up to the configured minimum.
    FreeSpaceTarget,
}

/// A watched, completed download that may be deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimCandidate {
    /// Download to delete.
    pub download_id: Uuid,
    /// Media item of the download.
    pub item_id: Uuid,
    /// Size on disk.
    pub size_bytes: u64,
    /// Completion time; undated downloads sort last.
    pub finished_at: Option<DateTime<Utc>>,
}

impl ReclaimCandidate {
    /// `None` unless the download is completed and watched.
    pub fn from_record(record: &DownloadRecord) -> Option<Self> {
        if !record.is_completed() || !record.is_watched() {
            return None;
        }
        Some(Self {
            download_id: record.id,
            item_id: record.item_id,
            size_bytes: record.approximate_size(),
            finished_at: record.finished_at(),
        })
    }

    /// Completed at least `retention` ago. Candidates without any timestamp
    /// never qualify.
    pub fn is_past_retention(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> bool {
        self.finished_at
            .is_some_and(|finished| now - finished >= retention)
    }
}

/// Watched, completed downloads ordered oldest completion first. Entries
/// without a completion or start time go last.
pub fn select_candidates(records: &[DownloadRecord]) -> Vec<ReclaimCandidate> {
    let mut candidates: Vec<ReclaimCandidate> = records
        .iter()
        .filter_map(ReclaimCandidate::from_record)
        .collect();
    candidates.sort_by_key(|c| (c.finished_at.is_none(), c.finished_at));
    candidates
}

/// Split candidates into the ones past retention and the rest, both keeping
/// their relative order.
pub fn partition_by_retention(
    candidates: Vec<ReclaimCandidate>,
    now: DateTime<Utc>,
    retention: Duration,
) -> (Vec<ReclaimCandidate>, Vec<ReclaimCandidate>) {
    candidates
        .into_iter()
        .partition(|c| c.is_past_retention(now, retention))
}
