//! Records shared by the queue, the replay engine and the reclamation policy.

/// Download records.
pub mod downloads;
/// Playback-state events.
pub mod progress;

pub use downloads::{DownloadRecord, DownloadStatus};
pub use progress::{
    CoalesceClass, PlayMethod, PlaybackContext, ProgressEventType,
    QueuedProgressUpdate, TICKS_PER_SECOND, derive_session_id,
};
