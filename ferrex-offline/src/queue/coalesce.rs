//! Pure list operations behind the queue invariants.

use chrono::{DateTime, Duration, Utc};

use crate::domain::QueuedProgressUpdate;

/// Result of [`apply_latest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event was appended; the count is how many it replaced.
    Inserted(usize),
    /// A newer event of the same class already exists; the incoming one was
    /// dropped.
    Superseded,
}

/// Append `update`, removing any existing event it supersedes. Returns how
/// many events were replaced.
pub fn apply_update(
    entries: &mut Vec<QueuedProgressUpdate>,
    update: QueuedProgressUpdate,
) -> usize {
    let before = entries.len();
    entries.retain(|existing| !update.supersedes(existing));
    let replaced = before - entries.len();
    entries.push(update);
    replaced
}

/// Like [`apply_update`], but last-write-wins by timestamp: an existing
/// event of the same class with a later timestamp keeps its place.
pub fn apply_latest(
    entries: &mut Vec<QueuedProgressUpdate>,
    update: QueuedProgressUpdate,
) -> ApplyOutcome {
    let newer_exists = entries.iter().any(|existing| {
        update.supersedes(existing) && existing.timestamp > update.timestamp
    });
    if newer_exists {
        return ApplyOutcome::Superseded;
    }
    ApplyOutcome::Inserted(apply_update(entries, update))
}

/// Drop entries older than `max_age`. Returns the number removed.
pub fn purge_expired(
    entries: &mut Vec<QueuedProgressUpdate>,
    now: DateTime<Utc>,
    max_age: Duration,
) -> usize {
    let cutoff = now - max_age;
    let before = entries.len();
    entries.retain(|e| e.timestamp >= cutoff);
    before - entries.len()
}

/// Drop the oldest-inserted entries until at most `max_entries` remain.
pub fn enforce_capacity(
    entries: &mut Vec<QueuedProgressUpdate>,
    max_entries: usize,
) -> usize {
    if entries.len() <= max_entries {
        return 0;
    }
    let overflow = entries.len() - max_entries;
    entries.drain(..overflow);
    overflow
}
