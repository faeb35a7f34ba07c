//! Replays queued playback-state events against the server.
//!
//! A pass drains the queue, sorts the snapshot with [`sort_for_replay`] and
//! dispatches each event on its own. Network-class failures are requeued,
//! anything else is dead-lettered. One event failing never stops the rest of
//! the batch, and the queue lock is never held across a remote call.

/// The server boundary.
pub mod authority;
/// HTTP implementation of the server boundary.
pub mod http;
/// Replay order.
pub mod ordering;
/// Replay counters.
pub mod stats;

pub use authority::{PlaybackAuthority, ProgressReport, StoppedReport};
pub use http::HttpPlaybackAuthority;
pub use ordering::{replay_order, sort_for_replay};
pub use stats::{DeadLetter, SyncStats, SyncStatsSnapshot};

use std::{fmt, sync::Arc};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    domain::{ProgressEventType, QueuedProgressUpdate},
    error::{RemoteError, Result},
    queue::OfflineProgressQueue,
};

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Events drained for this pass.
    pub total: usize,
    /// Events the server accepted.
    pub succeeded: usize,
    /// Network-class failures put back in the queue.
    pub requeued: usize,
    /// Terminal failures discarded without retry.
    pub dead_lettered: usize,
    /// Another pass was already running; nothing was done.
    pub skipped: bool,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Replays queued events against a [`PlaybackAuthority`].
pub struct OfflineProgressSync {
    queue: Arc<OfflineProgressQueue>,
    authority: Arc<dyn PlaybackAuthority>,
    pass_lock: Mutex<()>,
    stats: SyncStats,
}

impl fmt::Debug for OfflineProgressSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineProgressSync")
            .field("queue", &self.queue)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl OfflineProgressSync {
    /// Engine over `queue`, keeping at most `dead_letter_capacity` dead letters.
    pub fn new(
        queue: Arc<OfflineProgressQueue>,
        authority: Arc<dyn PlaybackAuthority>,
        dead_letter_capacity: usize,
    ) -> Self {
        Self {
            queue,
            authority,
            pass_lock: Mutex::new(()),
            stats: SyncStats::new(dead_letter_capacity),
        }
    }

    /// The queue being replayed.
    pub fn queue(&self) -> &Arc<OfflineProgressQueue> {
        &self.queue
    }

    /// Lifetime counters.
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Drain the queue and replay every event once.
    pub async fn sync_offline_progress(&self) -> Result<SyncReport> {
        let Ok(_pass) = self.pass_lock.try_lock() else {
            debug!("offline sync pass already running; skipping");
            self.stats.on_pass_skipped();
            return Ok(SyncReport::skipped());
        };

        let mut updates = self.queue.drain().await?;
        if updates.is_empty() {
            return Ok(SyncReport::default());
        }
        sort_for_replay(&mut updates);

        let mut report = SyncReport {
            total: updates.len(),
            ..SyncReport::default()
        };

        for update in updates {
            match self.dispatch(&update).await {
                Ok(()) => report.succeeded += 1,
                Err(err) if err.is_network() => {
                    debug!(
                        "offline {} for item {} hit network error; requeueing; err={}",
                        update.event_type, update.item_id, err
                    );
                    let event_type = update.event_type;
                    let item_id = update.item_id;
                    let event_id = update.id;
                    match self.queue.requeue(update).await {
                        Ok(_) => report.requeued += 1,
                        Err(persist_err) => {
                            warn!(
                                "failed to requeue offline {} for item {}; err={}",
                                event_type, item_id, persist_err
                            );
                            report.dead_lettered += 1;
                            self.stats.record_dead_letter(DeadLetter {
                                event_id,
                                item_id,
                                event_type,
                                reason: format!("requeue failed: {persist_err}"),
                                at: Utc::now(),
                            });
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        "dropping offline {} for item {} after terminal failure; err={}",
                        update.event_type, update.item_id, err
                    );
                    report.dead_lettered += 1;
                    self.stats.record_dead_letter(DeadLetter {
                        event_id: update.id,
                        item_id: update.item_id,
                        event_type: update.event_type,
                        reason: err.to_string(),
                        at: Utc::now(),
                    });
                }
            }
        }

        info!(
            "offline sync pass finished; total={}, succeeded={}, network_retries={}, non_retry_failures={}",
            report.total,
            report.succeeded,
            report.requeued,
            report.dead_lettered
        );
        self.stats.on_pass_finished(
            report.succeeded as u64,
            report.requeued as u64,
            report.dead_lettered as u64,
        );
        Ok(report)
    }

    async fn dispatch(
        &self,
        update: &QueuedProgressUpdate,
    ) -> std::result::Result<(), RemoteError> {
        dispatch_update(self.authority.as_ref(), update).await
    }
}

/// Send one event to the authority using the call matching its kind.
pub async fn dispatch_update(
    authority: &dyn PlaybackAuthority,
    update: &QueuedProgressUpdate,
) -> std::result::Result<(), RemoteError> {
    match update.event_type {
        ProgressEventType::Progress => {
            let report = ProgressReport::from_update(
                update,
                update.effective_session_id(),
            );
            authority.report_progress(&report).await
        }
        ProgressEventType::Stopped => {
            let report = StoppedReport::from_update(
                update,
                update.effective_session_id(),
            );
            authority.report_stopped(&report).await
        }
        ProgressEventType::MarkPlayed => {
            authority.mark_played(update.item_id).await
        }
        ProgressEventType::MarkUnplayed => {
            authority.mark_unplayed(update.item_id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{PlaybackContext, derive_session_id},
        infra::cache::MemorySlotStore,
        queue::QueueLimits,
    };
    use super::authority::MockPlaybackAuthority;
    use chrono::{Duration, TimeZone};
    use mockall::{Sequence, predicate::eq};
    use uuid::Uuid;

    async fn queue() -> Arc<OfflineProgressQueue> {
        Arc::new(
            OfflineProgressQueue::open(
                Arc::new(MemorySlotStore::new()),
                QueueLimits::default(),
            )
            .await,
        )
    }

    fn at(base: chrono::DateTime<Utc>, secs: i64) -> chrono::DateTime<Utc> {
        base + Duration::seconds(secs)
    }

    #[tokio::test]
    async fn empty_queue_is_a_successful_noop() {
        let mock = MockPlaybackAuthority::new();
        let sync = OfflineProgressSync::new(queue().await, Arc::new(mock), 10);

        let report = sync.sync_offline_progress().await.expect("sync");
        assert_eq!(report, SyncReport::default());
    }

    #[tokio::test]
    async fn replays_in_timestamp_then_priority_order() {
        let q = queue().await;
        let base = Utc::now() - Duration::minutes(10);
        let item = Uuid::now_v7();
        let progress = QueuedProgressUpdate::progress(
            item,
            Some("session-a".into()),
            50,
            PlaybackContext::default(),
        )
        .with_timestamp(at(base, 5));
        let played = QueuedProgressUpdate::mark_played(Uuid::now_v7())
            .with_timestamp(at(base, 5));
        let stopped = QueuedProgressUpdate::stopped(
            Uuid::now_v7(),
            None,
            30,
            PlaybackContext::default(),
        )
        .with_timestamp(at(base, 3));

        for update in [progress.clone(), played.clone(), stopped.clone()] {
            q.add_update(update).await.expect("add");
        }

        let stopped_session = derive_session_id(
            stopped.item_id,
            stopped.timestamp,
            stopped.event_type,
        );

        let mut seq = Sequence::new();
        let mut mock = MockPlaybackAuthority::new();
        mock.expect_report_stopped()
            .withf(move |r| r.session_id == stopped_session && !r.failed)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_mark_played()
            .with(eq(played.item_id))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_report_progress()
            .withf(|r| {
                r.session_id == "session-a" && r.position_ticks == Some(50)
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let sync = OfflineProgressSync::new(q.clone(), Arc::new(mock), 10);
        let report = sync.sync_offline_progress().await.expect("sync");

        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded, 3);
        assert!(!q.has_pending_updates());
    }

    #[tokio::test]
    async fn network_failures_requeue_and_terminal_failures_dead_letter() {
        let q = queue().await;
        let base = Utc::now() - Duration::minutes(10);
        let offline_item = Uuid::now_v7();
        let missing_item = Uuid::now_v7();
        let requeued = QueuedProgressUpdate::mark_unplayed(offline_item)
            .with_timestamp(at(base, 1));
        q.add_update(requeued.clone()).await.expect("add");
        q.add_update(
            QueuedProgressUpdate::mark_played(missing_item)
                .with_timestamp(at(base, 2)),
        )
        .await
        .expect("add");

        let mut mock = MockPlaybackAuthority::new();
        mock.expect_mark_unplayed()
            .returning(|_| Err(RemoteError::Timeout));
        mock.expect_mark_played()
            .returning(|id| Err(RemoteError::NotFound(id)));

        let sync = OfflineProgressSync::new(q.clone(), Arc::new(mock), 10);
        let report = sync.sync_offline_progress().await.expect("sync");

        assert_eq!(report.requeued, 1);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(q.queued_updates().await, vec![requeued]);

        let letters = sync.stats().recent_dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].item_id, missing_item);
        assert_eq!(sync.stats().snapshot().dead_lettered, 1);
    }

    #[tokio::test]
    async fn expired_events_are_not_replayed() {
        let q = queue().await;
        let stale = QueuedProgressUpdate::mark_played(Uuid::now_v7())
            .with_timestamp(Utc.timestamp_opt(1_000, 0).unwrap());
        let fresh = QueuedProgressUpdate::mark_unplayed(Uuid::now_v7())
            .with_timestamp(Utc::now());
        q.add_update(stale).await.expect("add");
        q.add_update(fresh).await.expect("add");

        let mut mock = MockPlaybackAuthority::new();
        mock.expect_mark_played().never();
        mock.expect_mark_unplayed().times(1).returning(|_| {
            Err(RemoteError::Unexpected("malformed response".into()))
        });

        let sync = OfflineProgressSync::new(q.clone(), Arc::new(mock), 10);
        let report = sync.sync_offline_progress().await.expect("sync");

        assert_eq!(report.total, 1);
        assert_eq!(report.dead_lettered, 1);
        assert!(!q.has_pending_updates());
    }
}
