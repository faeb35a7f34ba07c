//! Replay counters and the dead-letter ring.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::domain::ProgressEventType;

/// An event discarded after a terminal replay failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Id of the discarded event.
    pub event_id: Uuid,
    /// Media item of the event.
    pub item_id: Uuid,
    /// Kind of the event.
    pub event_type: ProgressEventType,
    /// Why it was discarded.
    pub reason: String,
    /// When it was discarded.
    pub at: DateTime<Utc>,
}

/// Point-in-time copy of [`SyncStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatsSnapshot {
    /// Completed passes.
    pub passes: u64,
    /// Passes skipped because one was running.
    pub skipped_passes: u64,
    /// Events delivered.
    pub succeeded: u64,
    /// Events put back after a network failure.
    pub requeued: u64,
    /// Events discarded.
    pub dead_lettered: u64,
}

/// Lifetime replay counters plus a bounded ring of recent dead letters.
#[derive(Debug)]
pub struct SyncStats {
    passes: AtomicU64,
    skipped_passes: AtomicU64,
    succeeded: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    dead_letter_capacity: usize,
}

impl SyncStats {
    /// Zeroed counters keeping up to `dead_letter_capacity` dead letters.
    pub fn new(dead_letter_capacity: usize) -> Self {
        Self {
            passes: AtomicU64::new(0),
            skipped_passes: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            dead_letters: Mutex::new(VecDeque::with_capacity(
                dead_letter_capacity,
            )),
            dead_letter_capacity,
        }
    }

    /// Count an overlapping pass.
    pub fn on_pass_skipped(&self) {
        self.skipped_passes.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one pass into the totals.
    pub fn on_pass_finished(
        &self,
        succeeded: u64,
        requeued: u64,
        dead_lettered: u64,
    ) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.succeeded.fetch_add(succeeded, Ordering::Relaxed);
        self.requeued.fetch_add(requeued, Ordering::Relaxed);
        self.dead_lettered.fetch_add(dead_lettered, Ordering::Relaxed);
    }

    /// Remember `letter`, evicting the oldest past capacity.
    pub fn record_dead_letter(&self, letter: DeadLetter) {
        if self.dead_letter_capacity == 0 {
            return;
        }
        let mut ring = self.dead_letters.lock();
        while ring.len() >= self.dead_letter_capacity {
            ring.pop_front();
        }
        ring.push_back(letter);
    }

    /// Most recent dead letters, oldest first.
    pub fn recent_dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().iter().cloned().collect()
    }

    /// Copy the current totals.
    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            skipped_passes: self.skipped_passes.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter(n: u128) -> DeadLetter {
        DeadLetter {
            event_id: Uuid::from_u128(n),
            item_id: Uuid::nil(),
            event_type: ProgressEventType::Progress,
            reason: "not found".into(),
            at: Utc::now(),
        }
    }

    #[test]
    fn dead_letter_ring_is_bounded() {
        let stats = SyncStats::new(2);
        for n in 1..=3 {
            stats.record_dead_letter(letter(n));
        }

        let ids: Vec<_> = stats
            .recent_dead_letters()
            .iter()
            .map(|l| l.event_id)
            .collect();
        assert_eq!(ids, vec![Uuid::from_u128(2), Uuid::from_u128(3)]);
    }
}
