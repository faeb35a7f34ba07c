//! Local downloads as seen by the reclamation policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Share of the runtime that must have been played for an item to count as
/// watched, in percent.
pub const WATCHED_THRESHOLD_PERCENT: i128 = 90;

/// Lifecycle state of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Waiting to start.
    Queued,
    /// Transfer in progress.
    Downloading,
    /// Stopped by the user; resumable.
    Paused,
    /// Fully on disk.
    Completed,
    /// Gave up after an error.
    Failed,
}

/// A local download as reported by the download manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Download id assigned by the download manager.
    pub id: Uuid,
    /// Media item the file belongs to.
    pub item_id: Uuid,
    /// Current lifecycle state.
    pub status: DownloadStatus,
    /// When the transfer began.
    pub started_at: Option<DateTime<Utc>>,
    /// When the transfer finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Expected size in bytes, when known.
    pub file_size: Option<u64>,
    /// Bytes written so far.
    #[serde(default)]
    pub downloaded_bytes: u64,
    /// Total runtime of the item in ticks, when known.
    pub runtime_ticks: Option<i64>,
    /// Current local playback position in ticks.
    pub playback_position_ticks: Option<i64>,
    /// Quality label chosen at download time.
    pub quality: Option<String>,
}

impl DownloadRecord {
    /// The file is fully on disk.
    pub fn is_completed(&self) -> bool {
        self.status == DownloadStatus::Completed
    }

    /// Local position is at least 90% of the runtime. Items with an unknown
    /// or zero runtime are never considered watched.
    pub fn is_watched(&self) -> bool {
        let Some(runtime) = self.runtime_ticks.filter(|r| *r > 0) else {
            return false;
        };
        let position = self.playback_position_ticks.unwrap_or(0).max(0);
        i128::from(position) * 100
            >= i128::from(runtime) * WATCHED_THRESHOLD_PERCENT
    }

    /// Completion time, falling back to the start time.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at.or(self.started_at)
    }

    /// Bytes expected back on deletion.
    pub fn approximate_size(&self) -> u64 {
        self.file_size.unwrap_or(0).max(self.downloaded_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(runtime: Option<i64>, position: Option<i64>) -> DownloadRecord {
        DownloadRecord {
            id: Uuid::now_v7(),
            item_id: Uuid::now_v7(),
            status: DownloadStatus::Completed,
            started_at: None,
            completed_at: None,
            file_size: Some(10),
            downloaded_bytes: 25,
            runtime_ticks: runtime,
            playback_position_ticks: position,
            quality: None,
        }
    }

    #[test]
    fn watched_threshold_is_ninety_percent() {
        assert!(record(Some(1_000), Some(900)).is_watched());
        assert!(!record(Some(1_000), Some(899)).is_watched());
        assert!(!record(Some(1_000), None).is_watched());
    }

    #[test]
    fn unknown_runtime_is_never_watched() {
        assert!(!record(None, Some(5_000)).is_watched());
        assert!(!record(Some(0), Some(5_000)).is_watched());
    }

    #[test]
    fn size_uses_larger_of_file_and_downloaded_bytes() {
        assert_eq!(record(None, None).approximate_size(), 25);
    }
}
