//! Named-slot persistence backed by `cacache`, plus an in-memory store.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{OfflineError, Result};

/// Name of a single persisted value within a [`SlotStore`].
///
/// Keys are human-readable and versioned so a layout change can move to a
/// new slot instead of reinterpreting old bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SlotKey(&'static str);

impl SlotKey {
    /// The pending event queue.
    pub const PROGRESS_QUEUE: SlotKey = SlotKey("offline/progress-queue/v1");
    /// Auto-clean preferences.
    pub const AUTO_CLEAN_PREFERENCES: SlotKey =
        SlotKey("offline/auto-clean-preferences/v1");

    /// A key with the given name.
    pub const fn new(key: &'static str) -> Self {
        Self(key)
    }

    /// The key name.
    pub fn as_str(&self) -> &str {
        self.0
    }
}

impl fmt::Debug for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SlotKey").field(&self.0).finish()
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Local key-value persistence for small documents.
#[async_trait]
pub trait SlotStore: Send + Sync + fmt::Debug {
    /// Returns `Ok(None)` when the slot has never been written.
    async fn read_slot(&self, key: &SlotKey) -> Result<Option<Vec<u8>>>;

    /// Replace the slot contents. Returns once the bytes are durable.
    async fn write_slot(&self, key: &SlotKey, bytes: &[u8]) -> Result<()>;

    async fn remove_slot(&self, key: &SlotKey) -> Result<()>;
}

/// Root directory managed by `cacache` (index + content-addressed blobs).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OfflineCacheRoot(PathBuf);

impl OfflineCacheRoot {
    /// Root at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    /// Directory of the store.
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Debug for OfflineCacheRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OfflineCacheRoot").field(&self.0).finish()
    }
}

/// A thin typed wrapper over `cacache` keyed entries.
#[derive(Clone, Debug)]
pub struct CacacheSlotStore {
    root: OfflineCacheRoot,
}

impl CacacheSlotStore {
    /// Store under `root`. Nothing is created until the first write.
    pub fn new(root: OfflineCacheRoot) -> Self {
        Self { root }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &OfflineCacheRoot {
        &self.root
    }
}

#[async_trait]
impl SlotStore for CacacheSlotStore {
    async fn read_slot(&self, key: &SlotKey) -> Result<Option<Vec<u8>>> {
        match cacache::read(self.root.as_path(), key.as_str()).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(cacache::Error::EntryNotFound(_, _)) => Ok(None),
            Err(cacache::Error::IntegrityError(err)) => {
                Err(OfflineError::Persistence(format!(
                    "slot failed integrity check: {} ({err})",
                    key
                )))
            }
            Err(cacache::Error::SizeMismatch(wanted, actual)) => {
                Err(OfflineError::Persistence(format!(
                    "slot size mismatch: key={}, wanted={wanted}, actual={actual}",
                    key
                )))
            }
            Err(cacache::Error::IoError(_, msg)) => Err(
                OfflineError::Persistence(format!("cacache read I/O error: {msg}")),
            ),
            Err(cacache::Error::SerdeError(_, msg)) => {
                Err(OfflineError::Persistence(format!(
                    "cacache read serde error: {msg}"
                )))
            }
        }
    }

    async fn write_slot(&self, key: &SlotKey, bytes: &[u8]) -> Result<()> {
        cacache::write(self.root.as_path(), key.as_str(), bytes)
            .await
            .map(|_| ())
            .map_err(|e| {
                OfflineError::Persistence(format!("cacache write failed: {e}"))
            })
    }

    async fn remove_slot(&self, key: &SlotKey) -> Result<()> {
        let r_opts = cacache::index::RemoveOpts::new().remove_fully(true);
        r_opts
            .remove(self.root.as_path(), key.as_str())
            .await
            .map_err(|e| {
                OfflineError::Persistence(format!("cacache remove failed: {e}"))
            })
    }
}

/// Process-local slot store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemorySlotStore {
    slots: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySlotStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotStore for MemorySlotStore {
    async fn read_slot(&self, key: &SlotKey) -> Result<Option<Vec<u8>>> {
        Ok(self.slots.lock().await.get(key.as_str()).cloned())
    }

    async fn write_slot(&self, key: &SlotKey, bytes: &[u8]) -> Result<()> {
        self.slots
            .lock()
            .await
            .insert(key.as_str().to_string(), bytes.to_vec());
        Ok(())
    }

    async fn remove_slot(&self, key: &SlotKey) -> Result<()> {
        self.slots.lock().await.remove(key.as_str());
        Ok(())
    }
}
