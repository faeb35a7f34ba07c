#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use ferrex_offline::{
    domain::{DownloadRecord, DownloadStatus},
    error::{DownloadError, RemoteError},
    reclaim::{BYTES_PER_GIB, DownloadManager},
    sync::{PlaybackAuthority, ProgressReport, StoppedReport},
};
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use uuid::Uuid;

pub const GIB: u64 = BYTES_PER_GIB;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityCall {
    Progress(ProgressReport),
    Stopped(StoppedReport),
    Played(Uuid),
    Unplayed(Uuid),
}

impl AuthorityCall {
    pub fn item_id(&self) -> Uuid {
        match self {
            AuthorityCall::Progress(r) => r.item_id,
            AuthorityCall::Stopped(r) => r.item_id,
            AuthorityCall::Played(id) | AuthorityCall::Unplayed(id) => *id,
        }
    }
}

/// Records every call and fails the ones scripted per item.
#[derive(Debug, Default)]
pub struct FakeAuthority {
    calls: Mutex<Vec<AuthorityCall>>,
    failures: Mutex<HashMap<Uuid, RemoteError>>,
    offline: Mutex<bool>,
    gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl FakeAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_item(&self, item_id: Uuid, err: RemoteError) {
        self.failures.lock().insert(item_id, err);
    }

    /// Every call fails with a network error until cleared.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.offline.lock() = unreachable;
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
        *self.offline.lock() = false;
    }

    /// Block every call until the returned `release` is notified. `entered`
    /// fires when a call is waiting.
    pub fn hold(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock() = Some((entered.clone(), release.clone()));
        (entered, release)
    }

    pub fn calls(&self) -> Vec<AuthorityCall> {
        self.calls.lock().clone()
    }

    async fn handle(
        &self,
        call: AuthorityCall,
    ) -> Result<(), RemoteError> {
        let gate = self.gate.lock().take();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }

        let item_id = call.item_id();
        self.calls.lock().push(call);

        if *self.offline.lock() {
            return Err(RemoteError::Network("connection refused".into()));
        }
        match self.failures.lock().get(&item_id) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PlaybackAuthority for FakeAuthority {
    async fn report_progress(
        &self,
        report: &ProgressReport,
    ) -> Result<(), RemoteError> {
        self.handle(AuthorityCall::Progress(report.clone())).await
    }

    async fn report_stopped(
        &self,
        report: &StoppedReport,
    ) -> Result<(), RemoteError> {
        self.handle(AuthorityCall::Stopped(report.clone())).await
    }

    async fn mark_played(&self, item_id: Uuid) -> Result<(), RemoteError> {
        self.handle(AuthorityCall::Played(item_id)).await
    }

    async fn mark_unplayed(&self, item_id: Uuid) -> Result<(), RemoteError> {
        self.handle(AuthorityCall::Unplayed(item_id)).await
    }
}

/// In-memory download volume. Successful deletes free the record's size.
#[derive(Debug)]
pub struct FakeDownloads {
    records: watch::Sender<Vec<DownloadRecord>>,
    total: u64,
    available: Mutex<Option<u64>>,
    failing: Mutex<HashSet<Uuid>>,
    deleted: Mutex<Vec<Uuid>>,
}

impl FakeDownloads {
    pub fn new(
        records: Vec<DownloadRecord>,
        total: u64,
        available: u64,
    ) -> Arc<Self> {
        let (records, _) = watch::channel(records);
        Arc::new(Self {
            records,
            total,
            available: Mutex::new(Some(available)),
            failing: Mutex::new(HashSet::new()),
            deleted: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_delete(&self, download_id: Uuid) {
        self.failing.lock().insert(download_id);
    }

    /// Make `available_storage` fail.
    pub fn break_storage_query(&self) {
        *self.available.lock() = None;
    }

    pub fn deleted(&self) -> Vec<Uuid> {
        self.deleted.lock().clone()
    }

    pub fn remaining(&self) -> Vec<Uuid> {
        self.records.borrow().iter().map(|r| r.id).collect()
    }
}

#[async_trait]
impl DownloadManager for FakeDownloads {
    fn observe(&self) -> watch::Receiver<Vec<DownloadRecord>> {
        self.records.subscribe()
    }

    async fn delete_download(
        &self,
        download_id: Uuid,
    ) -> Result<(), DownloadError> {
        if self.failing.lock().contains(&download_id) {
            return Err(DownloadError::DeleteFailed {
                id: download_id,
                message: "file busy".into(),
            });
        }

        let mut freed = None;
        self.records.send_modify(|records| {
            if let Some(pos) = records.iter().position(|r| r.id == download_id)
            {
                freed = Some(records.remove(pos).approximate_size());
            }
        });
        let Some(freed) = freed else {
            return Err(DownloadError::NotFound(download_id));
        };

        if let Some(available) = self.available.lock().as_mut() {
            *available += freed;
        }
        self.deleted.lock().push(download_id);
        Ok(())
    }

    async fn available_storage(&self) -> Result<u64, DownloadError> {
        (*self.available.lock())
            .ok_or_else(|| DownloadError::Storage("statvfs failed".into()))
    }

    async fn total_storage(&self) -> Result<u64, DownloadError> {
        Ok(self.total)
    }

    async fn used_storage(&self) -> Result<u64, DownloadError> {
        Ok(self.records.borrow().iter().map(|r| r.approximate_size()).sum())
    }
}

/// A completed download whose local position is past the watched threshold.
pub fn watched_download(completed_days_ago: i64, size: u64) -> DownloadRecord {
    DownloadRecord {
        id: Uuid::now_v7(),
        item_id: Uuid::now_v7(),
        status: DownloadStatus::Completed,
        started_at: Some(Utc::now() - Duration::days(completed_days_ago + 1)),
        completed_at: Some(Utc::now() - Duration::days(completed_days_ago)),
        file_size: Some(size),
        downloaded_bytes: size,
        runtime_ticks: Some(60 * 60 * 10_000_000),
        playback_position_ticks: Some(58 * 60 * 10_000_000),
        quality: Some("1080p".into()),
    }
}

pub fn unwatched_download(
    completed_days_ago: i64,
    size: u64,
) -> DownloadRecord {
    DownloadRecord {
        playback_position_ticks: Some(10 * 60 * 10_000_000),
        ..watched_download(completed_days_ago, size)
    }
}
