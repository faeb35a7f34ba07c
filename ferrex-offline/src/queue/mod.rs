//! Durable, coalescing queue of playback-state events.
//!
//! The queue holds events that could not be delivered to the server. It is
//! kept in memory behind a single async mutex and written through to a
//! [`SlotStore`] on every mutation, so each read-modify-write cycle is
//! serialized and durable before the call returns.
//!
//! Invariants maintained on every mutation:
//! - at most one `PROGRESS` and one `STOPPED` event per item;
//! - at most one watched-state event per item, whichever kind came last;
//! - at most [`QueueLimits::max_entries`] events, oldest dropped first;
//! - nothing older than [`QueueLimits::max_age_days`].
//!
//! An undecodable payload resets the queue to empty. Losing queued telemetry
//! is preferred over blocking sync on a corrupt document. A failed read is
//! not corruption: the slot is left untouched and the load is retried on the
//! next access.

/// Coalescing, age and capacity rules.
pub mod coalesce;

use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    domain::QueuedProgressUpdate,
    error::Result,
    infra::cache::{SlotKey, SlotStore},
};
use coalesce::{ApplyOutcome, apply_latest, enforce_capacity, purge_expired};

const QUEUE_SCHEMA_VERSION: u32 = 1;

/// Size and age bounds for the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueLimits {
    /// Most events kept; the oldest-inserted are dropped past this.
    pub max_entries: usize,
    /// Events older than this many days are discarded unreplayed.
    pub max_age_days: u32,
}

impl QueueLimits {
    /// 200 entries, 30 days.
    pub const fn defaults() -> Self {
        Self {
            max_entries: 200,
            max_age_days: 30,
        }
    }

    /// `max_age_days` as a duration.
    pub fn max_age(&self) -> Duration {
        Duration::days(i64::from(self.max_age_days))
    }
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self::defaults()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct QueueFile {
    schema_version: u32,
    #[serde(default)]
    updates: Vec<QueuedProgressUpdate>,
}

/// Persistent queue of undelivered playback events.
pub struct OfflineProgressQueue {
    store: Arc<dyn SlotStore>,
    limits: QueueLimits,
    entries: Mutex<Vec<QueuedProgressUpdate>>,
    /// False until the slot has been read successfully. Entries stay empty
    /// and nothing is written while this is false.
    loaded: AtomicBool,
    pending_tx: watch::Sender<usize>,
}

impl fmt::Debug for OfflineProgressQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineProgressQueue")
            .field("store", &self.store)
            .field("limits", &self.limits)
            .field("loaded", &self.loaded.load(Ordering::Relaxed))
            .field("pending", &*self.pending_tx.borrow())
            .finish()
    }
}

impl OfflineProgressQueue {
    /// Load the queue from `store`. Never fails: a missing slot is an empty
    /// queue, a corrupt one is reset, and an unreadable one is loaded lazily
    /// on the next access.
    pub async fn open(store: Arc<dyn SlotStore>, limits: QueueLimits) -> Self {
        let (entries, loaded) = match load_slot(store.as_ref()).await {
            Ok(mut entries) => {
                prune_loaded(store.as_ref(), limits, &mut entries).await;
                (entries, true)
            }
            Err(err) => {
                warn!(
                    "offline progress queue read failed; deferring load; err={}",
                    err
                );
                (Vec::new(), false)
            }
        };

        let (pending_tx, _) = watch::channel(entries.len());
        Self {
            store,
            limits,
            entries: Mutex::new(entries),
            loaded: AtomicBool::new(loaded),
            pending_tx,
        }
    }

    /// Bounds this queue enforces.
    pub fn limits(&self) -> QueueLimits {
        self.limits
    }

    /// Whether the persisted queue has been read. While false the pending
    /// count is zero even though events may be waiting on disk.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Queue an event, replacing the older events it supersedes. An event
    /// older than a queued one of the same class is dropped, as is one that
    /// is already past the age limit.
    pub async fn add_update(&self, update: QueuedProgressUpdate) -> Result<()> {
        let mut guard = self.entries.lock().await;
        self.ensure_loaded(&mut guard).await?;
        let before = guard.clone();

        let item_id = update.item_id;
        let event_type = update.event_type;
        let outcome = apply_latest(&mut guard, update);
        let purged =
            purge_expired(&mut guard, Utc::now(), self.limits.max_age());
        let dropped = enforce_capacity(&mut guard, self.limits.max_entries);
        debug!(
            "queued offline {} for item {}; outcome={:?}, purged={}, dropped={}, pending={}",
            event_type,
            item_id,
            outcome,
            purged,
            dropped,
            guard.len()
        );

        if *guard == before {
            return Ok(());
        }
        self.commit(&mut guard, before).await
    }

    /// Put back an event whose replay failed with a recoverable error.
    /// Returns `false` when a newer event of the same kind made it redundant
    /// or it aged out.
    pub async fn requeue(&self, update: QueuedProgressUpdate) -> Result<bool> {
        let mut guard = self.entries.lock().await;
        self.ensure_loaded(&mut guard).await?;
        let before = guard.clone();

        let id = update.id;
        let outcome = apply_latest(&mut guard, update);
        purge_expired(&mut guard, Utc::now(), self.limits.max_age());
        enforce_capacity(&mut guard, self.limits.max_entries);
        let kept = matches!(outcome, ApplyOutcome::Inserted(_))
            && guard.iter().any(|e| e.id == id);

        if *guard != before {
            self.commit(&mut guard, before).await?;
        }
        Ok(kept)
    }

    /// Current surviving events in insertion order.
    pub async fn queued_updates(&self) -> Vec<QueuedProgressUpdate> {
        let mut guard = self.entries.lock().await;
        if let Err(err) = self.ensure_loaded(&mut guard).await {
            debug!("offline progress queue still unreadable; err={}", err);
        }
        self.purge_locked(&mut guard).await;
        guard.clone()
    }

    /// Remove exactly the named events. Unknown ids are ignored.
    pub async fn remove_updates(&self, ids: &[Uuid]) -> Result<usize> {
        let ids: HashSet<Uuid> = ids.iter().copied().collect();
        let mut guard = self.entries.lock().await;
        self.ensure_loaded(&mut guard).await?;
        let before = guard.clone();
        guard.retain(|e| !ids.contains(&e.id));
        let removed = before.len() - guard.len();
        if removed == 0 {
            return Ok(0);
        }
        self.commit(&mut guard, before).await?;
        Ok(removed)
    }

    /// Drop queued events that `delivered` made obsolete: same item and
    /// class, not newer than it.
    pub async fn discard_superseded(
        &self,
        delivered: &QueuedProgressUpdate,
    ) -> Result<usize> {
        let mut guard = self.entries.lock().await;
        self.ensure_loaded(&mut guard).await?;
        let before = guard.clone();
        guard.retain(|e| {
            !(delivered.supersedes(e) && e.timestamp <= delivered.timestamp)
        });
        let removed = before.len() - guard.len();
        if removed == 0 {
            return Ok(0);
        }
        self.commit(&mut guard, before).await?;
        Ok(removed)
    }

    /// Take a snapshot of every surviving event and remove exactly that
    /// snapshot from the store, atomically with respect to other writers.
    pub async fn drain(&self) -> Result<Vec<QueuedProgressUpdate>> {
        let mut guard = self.entries.lock().await;
        self.ensure_loaded(&mut guard).await?;
        self.purge_locked(&mut guard).await;
        if guard.is_empty() {
            return Ok(Vec::new());
        }

        let before = guard.clone();
        let snapshot_ids: HashSet<Uuid> = before.iter().map(|e| e.id).collect();
        guard.retain(|e| !snapshot_ids.contains(&e.id));
        self.commit(&mut guard, before.clone()).await?;
        Ok(before)
    }

    /// Drop every queued event. Returns how many were discarded.
    pub async fn clear(&self) -> Result<usize> {
        let mut guard = self.entries.lock().await;
        self.ensure_loaded(&mut guard).await?;
        let before = guard.clone();
        guard.clear();
        self.commit(&mut guard, before.clone()).await?;
        Ok(before.len())
    }

    /// Number of queued events, as last committed.
    pub fn pending_count(&self) -> usize {
        *self.pending_tx.borrow()
    }

    /// At least one event is queued.
    pub fn has_pending_updates(&self) -> bool {
        self.pending_count() > 0
    }

    /// Receiver that always holds the latest pending count.
    pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.pending_tx.subscribe()
    }

    /// Retry a read that failed at open. Must run before any mutation so a
    /// write never replaces events that are only on disk.
    async fn ensure_loaded(
        &self,
        entries: &mut Vec<QueuedProgressUpdate>,
    ) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }
        let mut stored = load_slot(self.store.as_ref()).await?;
        prune_loaded(self.store.as_ref(), self.limits, &mut stored).await;
        debug!(
            "offline progress queue loaded after deferred read; pending={}",
            stored.len()
        );
        *entries = stored;
        self.loaded.store(true, Ordering::Release);
        self.pending_tx.send_replace(entries.len());
        Ok(())
    }

    /// Persist `entries`; on failure restore `before` so memory never runs
    /// ahead of disk.
    async fn commit(
        &self,
        entries: &mut Vec<QueuedProgressUpdate>,
        before: Vec<QueuedProgressUpdate>,
    ) -> Result<()> {
        if let Err(err) = self.persist(entries).await {
            warn!("offline progress queue persist failed; err={}", err);
            *entries = before;
            return Err(err);
        }
        self.pending_tx.send_replace(entries.len());
        Ok(())
    }

    async fn purge_locked(&self, entries: &mut Vec<QueuedProgressUpdate>) {
        let before = entries.clone();
        let purged = purge_expired(entries, Utc::now(), self.limits.max_age());
        if purged == 0 {
            return;
        }
        debug!("purged {} expired offline progress events", purged);
        if self.commit(entries, before).await.is_err() {
            // Keep serving the filtered view; the disk copy is purged on the
            // next successful write.
            purge_expired(entries, Utc::now(), self.limits.max_age());
            self.pending_tx.send_replace(entries.len());
        }
    }

    async fn persist(&self, entries: &[QueuedProgressUpdate]) -> Result<()> {
        let bytes = encode_queue_file(entries)?;
        self.store
            .write_slot(&SlotKey::PROGRESS_QUEUE, &bytes)
            .await
    }
}

/// Read and decode the slot. A missing slot is empty and an undecodable one
/// is reset; only a failed read is an error.
async fn load_slot(store: &dyn SlotStore) -> Result<Vec<QueuedProgressUpdate>> {
    let Some(bytes) = store.read_slot(&SlotKey::PROGRESS_QUEUE).await? else {
        return Ok(Vec::new());
    };
    match decode_queue_file(&bytes) {
        Some(entries) => Ok(entries),
        None => {
            warn!(
                "offline progress queue payload undecodable; resetting to empty; bytes={}",
                bytes.len()
            );
            reset_slot(store).await;
            Ok(Vec::new())
        }
    }
}

/// Apply the age and size bounds to freshly loaded entries, writing back
/// when anything was dropped. A failed write leaves the stale copy on disk
/// until the next commit.
async fn prune_loaded(
    store: &dyn SlotStore,
    limits: QueueLimits,
    entries: &mut Vec<QueuedProgressUpdate>,
) {
    let purged = purge_expired(entries, Utc::now(), limits.max_age());
    let dropped = enforce_capacity(entries, limits.max_entries);
    if purged + dropped == 0 {
        return;
    }
    debug!(
        "pruned offline progress queue on load; purged={}, dropped={}",
        purged, dropped
    );
    let written = match encode_queue_file(entries) {
        Ok(bytes) => store.write_slot(&SlotKey::PROGRESS_QUEUE, &bytes).await,
        Err(err) => Err(err),
    };
    if let Err(err) = written {
        warn!("failed to persist pruned offline progress queue; err={}", err);
    }
}

fn encode_queue_file(entries: &[QueuedProgressUpdate]) -> Result<Vec<u8>> {
    let file = QueueFile {
        schema_version: QUEUE_SCHEMA_VERSION,
        updates: entries.to_vec(),
    };
    Ok(serde_json::to_vec(&file)?)
}

fn decode_queue_file(bytes: &[u8]) -> Option<Vec<QueuedProgressUpdate>> {
    let parsed: QueueFile = serde_json::from_slice(bytes).ok()?;
    if parsed.schema_version != QUEUE_SCHEMA_VERSION {
        return None;
    }
    Some(parsed.updates)
}

async fn reset_slot(store: &dyn SlotStore) {
    let empty = match encode_queue_file(&[]) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("failed to encode empty offline queue; err={}", err);
            return;
        }
    };
    if let Err(err) = store.write_slot(&SlotKey::PROGRESS_QUEUE, &empty).await {
        warn!("failed to reset offline progress queue slot; err={}", err);
    }
}
