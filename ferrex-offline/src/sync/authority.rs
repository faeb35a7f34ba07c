//! The server-side boundary the replay engine talks to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    domain::{PlayMethod, QueuedProgressUpdate},
    error::RemoteError,
};

/// Body of a playback progress report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Media item.
    pub item_id: Uuid,
    /// Playback session, derived when none was recorded.
    pub session_id: String,
    /// Playback position.
    pub position_ticks: Option<i64>,
    /// Media source being played.
    pub media_source_id: Option<String>,
    /// How the source is being played.
    pub play_method: Option<PlayMethod>,
    /// Playback is paused.
    pub is_paused: bool,
    /// Audio is muted.
    pub is_muted: bool,
}

impl ProgressReport {
    /// Body for a queued event.
    pub fn from_update(update: &QueuedProgressUpdate, session_id: String) -> Self {
        Self {
            item_id: update.item_id,
            session_id,
            position_ticks: update.position_ticks,
            media_source_id: update.media_source_id.clone(),
            play_method: update.play_method,
            is_paused: update.is_paused,
            is_muted: update.is_muted,
        }
    }
}

/// Body of a playback stopped report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoppedReport {
    /// Media item.
    pub item_id: Uuid,
    /// Playback session, derived when none was recorded.
    pub session_id: String,
    /// Playback position.
    pub position_ticks: Option<i64>,
    /// Media source being played.
    pub media_source_id: Option<String>,
    /// Playback ended because of an error rather than a user stop.
    pub failed: bool,
}

impl StoppedReport {
    /// Body for a queued event.
    pub fn from_update(update: &QueuedProgressUpdate, session_id: String) -> Self {
        Self {
            item_id: update.item_id,
            session_id,
            position_ticks: update.position_ticks,
            media_source_id: update.media_source_id.clone(),
            failed: false,
        }
    }
}

/// The server-side owner of playback state.
///
/// Implementations must classify failures so that connectivity problems map
/// to [`RemoteError::Network`] or [`RemoteError::Timeout`]; everything else
/// is treated as terminal by the replay engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaybackAuthority: Send + Sync {
    /// Report the current position of a session.
    async fn report_progress(
        &self,
        report: &ProgressReport,
    ) -> Result<(), RemoteError>;

    /// Report the end of a session.
    async fn report_stopped(
        &self,
        report: &StoppedReport,
    ) -> Result<(), RemoteError>;

    /// Mark the item watched.
    async fn mark_played(&self, item_id: Uuid) -> Result<(), RemoteError>;

    /// Clear the watched mark.
    async fn mark_unplayed(&self, item_id: Uuid) -> Result<(), RemoteError>;
}
