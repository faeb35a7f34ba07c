//! Application-facing entry point that ties the queue, the replay engine and
//! the reclamation policy together.

use std::{fmt, sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    domain::{PlaybackContext, QueuedProgressUpdate},
    error::Result,
    infra::cache::SlotStore,
    queue::{OfflineProgressQueue, QueueLimits},
    reclaim::{
        AutoCleanPreferences, AutoCleanReport, DownloadManager,
        PreferencesStore, StorageReclaimer,
    },
    sync::{
        DeadLetter, OfflineProgressSync, PlaybackAuthority, SyncReport,
        dispatch_update,
    },
};

/// What happened to a recorded playback event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the server.
    Sent,
    /// Stored for replay once connectivity returns.
    Queued,
}

/// Capacity of the download volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageSummary {
    /// Volume capacity.
    pub total_bytes: u64,
    /// Bytes used by downloads.
    pub used_bytes: u64,
    /// Free bytes.
    pub available_bytes: u64,
}

/// Records playback state online or offline and runs auto-clean.
pub struct OfflinePlaybackService {
    queue: Arc<OfflineProgressQueue>,
    sync: OfflineProgressSync,
    authority: Arc<dyn PlaybackAuthority>,
    downloads: Arc<dyn DownloadManager>,
    reclaimer: StorageReclaimer,
    prefs: PreferencesStore,
    online_tx: watch::Sender<bool>,
}

impl fmt::Debug for OfflinePlaybackService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflinePlaybackService")
            .field("queue", &self.queue)
            .field("prefs", &self.prefs)
            .field("online", &*self.online_tx.borrow())
            .finish()
    }
}

impl OfflinePlaybackService {
    /// Load persisted state from `store` and wire the collaborators. The
    /// service starts online.
    pub async fn open(
        store: Arc<dyn SlotStore>,
        authority: Arc<dyn PlaybackAuthority>,
        downloads: Arc<dyn DownloadManager>,
        limits: QueueLimits,
        dead_letter_capacity: usize,
    ) -> Self {
        let queue =
            Arc::new(OfflineProgressQueue::open(store.clone(), limits).await);
        let prefs = PreferencesStore::load(store).await;
        let sync = OfflineProgressSync::new(
            queue.clone(),
            authority.clone(),
            dead_letter_capacity,
        );
        let (online_tx, _) = watch::channel(true);

        info!(
            "offline playback service ready; pending={}, auto_clean={}",
            queue.pending_count(),
            prefs.get().enabled
        );

        Self {
            queue,
            sync,
            authority,
            reclaimer: StorageReclaimer::new(downloads.clone()),
            downloads,
            prefs,
            online_tx,
        }
    }

    /// The pending event queue.
    pub fn queue(&self) -> &Arc<OfflineProgressQueue> {
        &self.queue
    }

    /// The replay engine.
    pub fn sync_engine(&self) -> &OfflineProgressSync {
        &self.sync
    }

    /// The storage reclaimer.
    pub fn reclaimer(&self) -> &StorageReclaimer {
        &self.reclaimer
    }

    /// Receiver that always holds the pending event count.
    pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.queue.subscribe_pending()
    }

    /// Number of queued events.
    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    /// Recently discarded events, oldest first.
    pub fn recent_dead_letters(&self) -> Vec<DeadLetter> {
        self.sync.stats().recent_dead_letters()
    }

    /// Last reported connectivity.
    pub fn is_online(&self) -> bool {
        *self.online_tx.borrow()
    }

    /// Receiver that follows connectivity changes.
    pub fn subscribe_online(&self) -> watch::Receiver<bool> {
        self.online_tx.subscribe()
    }

    /// Report connectivity. Going from offline to online wakes any running
    /// background sync.
    pub fn set_online(&self, online: bool) {
        let was_online = self.online_tx.send_replace(online);
        if online && !was_online {
            info!(
                "connectivity restored; pending offline events={}",
                self.pending_count()
            );
        } else if !online && was_online {
            info!("connectivity lost; queueing playback events locally");
        }
    }

    /// Record a position report.
    pub async fn record_progress(
        &self,
        item_id: Uuid,
        session_id: Option<String>,
        position_ticks: i64,
        context: PlaybackContext,
    ) -> Result<Delivery> {
        self.deliver(QueuedProgressUpdate::progress(
            item_id,
            session_id,
            position_ticks,
            context,
        ))
        .await
    }

    /// Record the end of playback.
    pub async fn record_stopped(
        &self,
        item_id: Uuid,
        session_id: Option<String>,
        position_ticks: i64,
        context: PlaybackContext,
    ) -> Result<Delivery> {
        self.deliver(QueuedProgressUpdate::stopped(
            item_id,
            session_id,
            position_ticks,
            context,
        ))
        .await
    }

    /// Mark an item watched.
    pub async fn record_mark_played(&self, item_id: Uuid) -> Result<Delivery> {
        self.deliver(QueuedProgressUpdate::mark_played(item_id)).await
    }

    /// Mark an item unwatched.
    pub async fn record_mark_unplayed(
        &self,
        item_id: Uuid,
    ) -> Result<Delivery> {
        self.deliver(QueuedProgressUpdate::mark_unplayed(item_id))
            .await
    }

    async fn deliver(&self, update: QueuedProgressUpdate) -> Result<Delivery> {
        if !self.is_online() {
            self.queue.add_update(update).await?;
            return Ok(Delivery::Queued);
        }

        match dispatch_update(self.authority.as_ref(), &update).await {
            Ok(()) => {
                // Older queued state for the same item would undo this on
                // the next replay.
                let dropped = self.queue.discard_superseded(&update).await?;
                if dropped > 0 {
                    debug!(
                        "dropped {} queued events superseded by live {} for item {}",
                        dropped, update.event_type, update.item_id
                    );
                }
                Ok(Delivery::Sent)
            }
            Err(err) if err.is_network() => {
                debug!(
                    "live {} for item {} failed; queueing; err={}",
                    update.event_type, update.item_id, err
                );
                self.queue.add_update(update).await?;
                Ok(Delivery::Queued)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Replay queued events now.
    pub async fn sync_offline_progress(&self) -> Result<SyncReport> {
        self.sync.sync_offline_progress().await
    }

    /// Run a sync pass on every `interval` tick and whenever connectivity
    /// returns, until the returned handle is stopped or dropped.
    pub fn spawn_background_sync(
        self: &Arc<Self>,
        interval: Duration,
    ) -> BackgroundSync {
        let (stop_tx, stop_rx) = watch::channel(false);
        let online_rx = self.subscribe_online();
        let task = tokio::spawn(background_sync_loop(
            Arc::clone(self),
            interval,
            stop_rx,
            online_rx,
        ));
        BackgroundSync { stop_tx, task }
    }

    /// Current auto-clean preferences.
    pub fn auto_clean_preferences(&self) -> AutoCleanPreferences {
        self.prefs.get()
    }

    /// Receiver that follows preference changes.
    pub fn subscribe_auto_clean_preferences(
        &self,
    ) -> watch::Receiver<AutoCleanPreferences> {
        self.prefs.subscribe()
    }

    /// Turn scheduled auto-clean on or off.
    pub async fn set_auto_clean_enabled(
        &self,
        enabled: bool,
    ) -> Result<AutoCleanPreferences> {
        self.prefs.set_enabled(enabled).await
    }

    /// Set the watched retention window.
    pub async fn set_auto_clean_retention_days(
        &self,
        days: u32,
    ) -> Result<AutoCleanPreferences> {
        self.prefs.set_watched_retention_days(days).await
    }

    /// Set the free-space target.
    pub async fn set_auto_clean_min_free_space_gb(
        &self,
        gb: u32,
    ) -> Result<AutoCleanPreferences> {
        self.prefs.set_min_free_space_gb(gb).await
    }

    /// Requery free space after each deletion.
    pub async fn set_auto_clean_requery_free_space(
        &self,
        requery: bool,
    ) -> Result<AutoCleanPreferences> {
        self.prefs.set_requery_free_space(requery).await
    }

    /// User-initiated clean; runs even when auto-clean is disabled.
    pub async fn run_auto_clean_now(&self) -> Result<AutoCleanReport> {
        self.reclaimer
            .run_auto_clean(&self.prefs.get(), true)
            .await
    }

    /// Periodic clean; a no-op while auto-clean is disabled.
    pub async fn run_scheduled_auto_clean(&self) -> Result<AutoCleanReport> {
        self.reclaimer
            .run_auto_clean(&self.prefs.get(), false)
            .await
    }

    /// What a manual clean would delete, without deleting.
    pub async fn preview_auto_clean(&self) -> Result<AutoCleanReport> {
        self.reclaimer.preview_auto_clean(&self.prefs.get()).await
    }

    /// Capacity of the download volume.
    pub async fn storage_summary(&self) -> Result<StorageSummary> {
        Ok(StorageSummary {
            total_bytes: self.downloads.total_storage().await?,
            used_bytes: self.downloads.used_storage().await?,
            available_bytes: self.downloads.available_storage().await?,
        })
    }
}

/// Handle to the background sync task.
#[derive(Debug)]
pub struct BackgroundSync {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BackgroundSync {
    /// The loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop and wait for an in-flight pass to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(err) = self.task.await {
            warn!("background offline sync task ended abnormally: {}", err);
        }
    }
}

async fn background_sync_loop(
    service: Arc<OfflinePlaybackService>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
    mut online_rx: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                // A dropped handle counts as a stop request.
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
            changed = online_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if !*online_rx.borrow_and_update() {
                    continue;
                }
                debug!("connectivity restored; running offline sync");
            }
            _ = ticker.tick() => {}
        }

        // An unloaded queue may still hold events on disk; the pass retries
        // the read.
        let maybe_pending = service.queue.has_pending_updates()
            || !service.queue.is_loaded();
        if !service.is_online() || !maybe_pending {
            continue;
        }

        if let Err(err) = service.sync_offline_progress().await {
            warn!("background offline sync pass failed: {}", err);
        }
    }

    debug!("background offline sync stopped");
}
