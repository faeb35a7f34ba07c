//! Playback-state events recorded while the server is unreachable.
//!
//! A [`QueuedProgressUpdate`] is the unit stored by
//! [`crate::queue::OfflineProgressQueue`] and replayed by
//! [`crate::sync::OfflineProgressSync`]. Events are immutable once created;
//! the queue only ever replaces them wholesale when a newer event of the same
//! [`CoalesceClass`] arrives for the same item.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Playback position ticks per second (100ns units).
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Namespace for deterministic session ids derived at replay time.
const SESSION_NAMESPACE: Uuid =
    Uuid::from_u128(0x6f1c_2a7e_94b3_4d0f_8e55_3c1a_b0d2_9f47);

/// What happened to the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressEventType {
    /// Periodic position report.
    Progress,
    /// Playback ended at a position.
    Stopped,
    /// The user marked the item watched.
    MarkPlayed,
    /// The user marked the item unwatched.
    MarkUnplayed,
}

impl ProgressEventType {
    /// Tie-break weight for events sharing a timestamp; higher replays first.
    pub fn priority(self) -> u8 {
        match self {
            ProgressEventType::MarkPlayed => 4,
            ProgressEventType::MarkUnplayed => 3,
            ProgressEventType::Stopped => 2,
            ProgressEventType::Progress => 1,
        }
    }

    /// Class within which events of this type replace each other.
    pub fn coalesce_class(self) -> CoalesceClass {
        match self {
            ProgressEventType::Progress => CoalesceClass::Progress,
            ProgressEventType::Stopped => CoalesceClass::Stopped,
            ProgressEventType::MarkPlayed | ProgressEventType::MarkUnplayed => {
                CoalesceClass::WatchedState
            }
        }
    }

    /// Wire name of the event type.
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressEventType::Progress => "PROGRESS",
            ProgressEventType::Stopped => "STOPPED",
            ProgressEventType::MarkPlayed => "MARK_PLAYED",
            ProgressEventType::MarkUnplayed => "MARK_UNPLAYED",
        }
    }
}

impl fmt::Display for ProgressEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events in the same class supersede each other for a given item.
///
/// Progress and stop events are independent of each other; both watched-state
/// kinds share one class so the latest intent always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoalesceClass {
    /// Position reports.
    Progress,
    /// Stop reports.
    Stopped,
    /// Played and unplayed marks.
    WatchedState,
}

/// How the client is playing the media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayMethod {
    /// The original file, unmodified.
    DirectPlay,
    /// Remuxed without re-encoding.
    DirectStream,
    /// Re-encoded by the server.
    Transcode,
}

/// Optional playback context carried by progress and stop events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackContext {
    /// Media source being played.
    pub media_source_id: Option<String>,
    /// How the source is being played.
    pub play_method: Option<PlayMethod>,
    /// Playback is paused.
    pub is_paused: bool,
    /// Audio is muted.
    pub is_muted: bool,
}

/// One playback-state event waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedProgressUpdate {
    /// Unique id of this event.
    pub id: Uuid,
    /// What happened.
    pub event_type: ProgressEventType,
    /// Media item the event is about.
    pub item_id: Uuid,
    /// Empty when the session was unknown at record time.
    #[serde(default)]
    pub session_id: String,
    /// Playback position, for progress and stop events.
    #[serde(default)]
    pub position_ticks: Option<i64>,
    /// Media source being played.
    #[serde(default)]
    pub media_source_id: Option<String>,
    /// How the source was played.
    #[serde(default)]
    pub play_method: Option<PlayMethod>,
    /// Playback was paused.
    #[serde(default)]
    pub is_paused: bool,
    /// Audio was muted.
    #[serde(default)]
    pub is_muted: bool,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}

impl QueuedProgressUpdate {
    fn new(
        event_type: ProgressEventType,
        item_id: Uuid,
        session_id: Option<String>,
        position_ticks: Option<i64>,
        context: PlaybackContext,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            item_id,
            session_id: session_id.unwrap_or_default(),
            position_ticks,
            media_source_id: context.media_source_id,
            play_method: context.play_method,
            is_paused: context.is_paused,
            is_muted: context.is_muted,
            timestamp,
        }
    }

    /// A position report, stamped now.
    pub fn progress(
        item_id: Uuid,
        session_id: Option<String>,
        position_ticks: i64,
        context: PlaybackContext,
    ) -> Self {
        Self::new(
            ProgressEventType::Progress,
            item_id,
            session_id,
            Some(position_ticks),
            context,
            Utc::now(),
        )
    }

    /// A stop report, stamped now. Pause and mute are cleared.
    pub fn stopped(
        item_id: Uuid,
        session_id: Option<String>,
        position_ticks: i64,
        context: PlaybackContext,
    ) -> Self {
        let context = PlaybackContext {
            is_paused: false,
            is_muted: false,
            ..context
        };
        Self::new(
            ProgressEventType::Stopped,
            item_id,
            session_id,
            Some(position_ticks),
            context,
            Utc::now(),
        )
    }

    /// Mark the item watched.
    pub fn mark_played(item_id: Uuid) -> Self {
        Self::new(
            ProgressEventType::MarkPlayed,
            item_id,
            None,
            None,
            PlaybackContext::default(),
            Utc::now(),
        )
    }

    /// Mark the item unwatched.
    pub fn mark_unplayed(item_id: Uuid) -> Self {
        Self::new(
            ProgressEventType::MarkUnplayed,
            item_id,
            None,
            None,
            PlaybackContext::default(),
            Utc::now(),
        )
    }

    /// Override the creation time. Used when importing events recorded
    /// elsewhere and by tests.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Class of this event's type.
    pub fn coalesce_class(&self) -> CoalesceClass {
        self.event_type.coalesce_class()
    }

    /// True when `other` targets the same item and the same coalescing class.
    pub fn supersedes(&self, other: &QueuedProgressUpdate) -> bool {
        self.item_id == other.item_id
            && self.coalesce_class() == other.coalesce_class()
    }

    /// The stored session id, or one derived from the event identity.
    pub fn effective_session_id(&self) -> String {
        if self.session_id.trim().is_empty() {
            derive_session_id(self.item_id, self.timestamp, self.event_type)
        } else {
            self.session_id.clone()
        }
    }
}

/// Derive a stable playback session id for an event that was recorded
/// without one. The same inputs always yield the same id.
pub fn derive_session_id(
    item_id: Uuid,
    timestamp: DateTime<Utc>,
    event_type: ProgressEventType,
) -> String {
    let name = format!(
        "{}:{}:{}",
        item_id.as_hyphenated(),
        timestamp.timestamp_millis(),
        event_type.as_str()
    );
    Uuid::new_v5(&SESSION_NAMESPACE, name.as_bytes())
        .simple()
        .to_string()
}
