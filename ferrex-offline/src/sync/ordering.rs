//! Deterministic replay ordering.

use std::cmp::Ordering;

use crate::domain::QueuedProgressUpdate;

/// Replay order: oldest first; on identical timestamps the higher-priority
/// event type (watched-state before stop before progress) goes first.
pub fn replay_order(
    a: &QueuedProgressUpdate,
    b: &QueuedProgressUpdate,
) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| b.event_type.priority().cmp(&a.event_type.priority()))
}

/// Sort `updates` by [`replay_order`].
pub fn sort_for_replay(updates: &mut [QueuedProgressUpdate]) {
    // Stable, so events with equal keys keep insertion order.
    updates.sort_by(replay_order);
}
