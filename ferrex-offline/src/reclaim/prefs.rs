//! Persisted auto-clean preferences.

use std::{fmt, sync::Arc};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use crate::{
    error::Result,
    infra::cache::{SlotKey, SlotStore},
};

/// Bytes in one GiB.
pub const BYTES_PER_GIB: u64 = 1024 * 1024 * 1024;

/// Shortest retention window.
pub const MIN_RETENTION_DAYS: u32 = 1;
/// Longest retention window.
pub const MAX_RETENTION_DAYS: u32 = 365;
/// Retention window when unset.
pub const DEFAULT_RETENTION_DAYS: u32 = 14;

/// Smallest free-space target.
pub const MIN_FREE_SPACE_GB: u32 = 1;
/// Largest free-space target.
pub const MAX_FREE_SPACE_GB: u32 = 128;
/// Free-space target when unset.
pub const DEFAULT_FREE_SPACE_GB: u32 = 5;

/// User-tunable auto-clean knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoCleanPreferences {
    /// Run on the schedule.
    pub enabled: bool,
    /// Days a watched download is kept.
    pub watched_retention_days: u32,
    /// Free space to maintain, in GiB.
    pub min_free_space_gb: u32,
    /// Ask the download manager for free space after every deletion instead
    /// of adding up file sizes.
    pub requery_free_space: bool,
}

impl Default for AutoCleanPreferences {
    fn default() -> Self {
        Self {
            enabled: false,
            watched_retention_days: DEFAULT_RETENTION_DAYS,
            min_free_space_gb: DEFAULT_FREE_SPACE_GB,
            requery_free_space: false,
        }
    }
}

impl AutoCleanPreferences {
    /// Set the retention window, clamped to range.
    pub fn set_watched_retention_days(&mut self, days: u32) {
        self.watched_retention_days =
            days.clamp(MIN_RETENTION_DAYS, MAX_RETENTION_DAYS);
    }

    /// Set the free-space target, clamped to range.
    pub fn set_min_free_space_gb(&mut self, gb: u32) {
        self.min_free_space_gb = gb.clamp(MIN_FREE_SPACE_GB, MAX_FREE_SPACE_GB);
    }

    /// Clamp values that came from disk or config into range.
    pub fn normalized(mut self) -> Self {
        self.set_watched_retention_days(self.watched_retention_days);
        self.set_min_free_space_gb(self.min_free_space_gb);
        self
    }

    /// Retention window as a duration.
    pub fn retention(&self) -> Duration {
        Duration::days(i64::from(self.watched_retention_days))
    }

    /// Free-space target in bytes.
    pub fn min_free_space_bytes(&self) -> u64 {
        u64::from(self.min_free_space_gb) * BYTES_PER_GIB
    }
}

/// Persisted [`AutoCleanPreferences`] with change notification.
pub struct PreferencesStore {
    store: Arc<dyn SlotStore>,
    // Serializes update-then-persist; the watch channel holds the value.
    write_lock: Mutex<()>,
    tx: watch::Sender<AutoCleanPreferences>,
}

impl fmt::Debug for PreferencesStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreferencesStore")
            .field("store", &self.store)
            .field("current", &*self.tx.borrow())
            .finish()
    }
}

impl PreferencesStore {
    /// Load persisted preferences. Missing or undecodable data yields
    /// defaults.
    pub async fn load(store: Arc<dyn SlotStore>) -> Self {
        let prefs =
            match store.read_slot(&SlotKey::AUTO_CLEAN_PREFERENCES).await {
                Ok(Some(bytes)) => {
                    match serde_json::from_slice::<AutoCleanPreferences>(&bytes)
                    {
                        Ok(prefs) => prefs.normalized(),
                        Err(err) => {
                            warn!(
                                "auto-clean preferences undecodable; using defaults; err={}",
                                err
                            );
                            AutoCleanPreferences::default()
                        }
                    }
                }
                Ok(None) => AutoCleanPreferences::default(),
                Err(err) => {
                    warn!(
                        "auto-clean preferences read failed; using defaults; err={}",
                        err
                    );
                    AutoCleanPreferences::default()
                }
            };

        let (tx, _) = watch::channel(prefs);
        Self {
            store,
            write_lock: Mutex::new(()),
            tx,
        }
    }

    /// Current preferences.
    pub fn get(&self) -> AutoCleanPreferences {
        *self.tx.borrow()
    }

    /// Receiver that always holds the latest preferences.
    pub fn subscribe(&self) -> watch::Receiver<AutoCleanPreferences> {
        self.tx.subscribe()
    }

    /// Apply `change`, clamp, persist and publish. Nothing is published if
    /// the write fails.
    pub async fn update<F>(&self, change: F) -> Result<AutoCleanPreferences>
    where
        F: FnOnce(&mut AutoCleanPreferences),
    {
        let _guard = self.write_lock.lock().await;
        let mut next = self.get();
        change(&mut next);
        let next = next.normalized();

        let bytes = serde_json::to_vec(&next)?;
        self.store
            .write_slot(&SlotKey::AUTO_CLEAN_PREFERENCES, &bytes)
            .await?;
        debug!("auto-clean preferences updated; prefs={:?}", next);

        self.tx.send_replace(next);
        Ok(next)
    }

    /// Turn scheduled runs on or off.
    pub async fn set_enabled(&self, enabled: bool) -> Result<AutoCleanPreferences> {
        self.update(|p| p.enabled = enabled).await
    }

    /// Persist a new retention window.
    pub async fn set_watched_retention_days(
        &self,
        days: u32,
    ) -> Result<AutoCleanPreferences> {
        self.update(|p| p.set_watched_retention_days(days)).await
    }

    /// Persist a new free-space target.
    pub async fn set_min_free_space_gb(
        &self,
        gb: u32,
    ) -> Result<AutoCleanPreferences> {
        self.update(|p| p.set_min_free_space_gb(gb)).await
    }

    /// Persist the free-space requery switch.
    pub async fn set_requery_free_space(
        &self,
        requery: bool,
    ) -> Result<AutoCleanPreferences> {
        self.update(|p| p.requery_free_space = requery).await
    }
}
