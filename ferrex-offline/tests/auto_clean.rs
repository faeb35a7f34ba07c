//! Storage reclamation scenarios against an in-memory download volume.

use anyhow::Result;
use ferrex_offline::reclaim::{
    AutoCleanPreferences, ReclaimReason, StorageReclaimer,
};

#[path = "support/mod.rs"]
mod support;

use support::{FakeDownloads, GIB, unwatched_download, watched_download};

fn prefs(retention_days: u32, min_free_gb: u32) -> AutoCleanPreferences {
    let mut prefs = AutoCleanPreferences {
        enabled: true,
        ..AutoCleanPreferences::default()
    };
    prefs.set_watched_retention_days(retention_days);
    prefs.set_min_free_space_gb(min_free_gb);
    prefs
}

#[tokio::test]
async fn retention_deletes_old_watched_even_with_plenty_of_space() -> Result<()>
{
    let old = watched_download(20, 2 * GIB);
    let recent = watched_download(3, 2 * GIB);
    let downloads =
        FakeDownloads::new(vec![old.clone(), recent.clone()], 500 * GIB, 400 * GIB);
    let reclaimer = StorageReclaimer::new(downloads.clone());

    let report = reclaimer.run_auto_clean(&prefs(14, 5), false).await?;

    assert_eq!(report.deleted_count(), 1);
    assert_eq!(report.retention_deleted, 1);
    assert_eq!(report.free_space_deleted, 0);
    assert_eq!(report.deleted[0].reason, ReclaimReason::RetentionExpired);
    assert_eq!(downloads.deleted(), vec![old.id]);
    assert_eq!(downloads.remaining(), vec![recent.id]);
    assert!(report.target_met);
    Ok(())
}

#[tokio::test]
async fn free_space_deletes_oldest_watched_until_target_met() -> Result<()> {
    let oldest = watched_download(30, 2 * GIB);
    let middle = watched_download(20, 2 * GIB);
    let newest = watched_download(10, 2 * GIB);
    let unwatched = unwatched_download(90, 10 * GIB);
    let downloads = FakeDownloads::new(
        vec![newest.clone(), unwatched.clone(), oldest.clone(), middle.clone()],
        64 * GIB,
        GIB,
    );
    let reclaimer = StorageReclaimer::new(downloads.clone());

    let report = reclaimer.run_auto_clean(&prefs(365, 5), false).await?;

    assert_eq!(report.retention_deleted, 0);
    assert_eq!(report.free_space_deleted, 2);
    assert_eq!(downloads.deleted(), vec![oldest.id, middle.id]);
    assert_eq!(report.expected_free_bytes, Some(5 * GIB));
    assert!(report.target_met);
    assert!(downloads.remaining().contains(&unwatched.id));
    assert!(downloads.remaining().contains(&newest.id));
    Ok(())
}

#[tokio::test]
async fn unwatched_downloads_are_never_deleted() -> Result<()> {
    let unwatched = unwatched_download(200, 20 * GIB);
    let downloads = FakeDownloads::new(vec![unwatched.clone()], 32 * GIB, 0);
    let reclaimer = StorageReclaimer::new(downloads.clone());

    let report = reclaimer.run_auto_clean(&prefs(1, 128), true).await?;

    assert_eq!(report.deleted_count(), 0);
    assert!(!report.target_met);
    assert!(downloads.deleted().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_delete_does_not_stop_the_run() -> Result<()> {
    let stuck = watched_download(40, 3 * GIB);
    let next = watched_download(35, 3 * GIB);
    let downloads =
        FakeDownloads::new(vec![stuck.clone(), next.clone()], 64 * GIB, GIB);
    downloads.fail_delete(stuck.id);
    let reclaimer = StorageReclaimer::new(downloads.clone());

    let report = reclaimer.run_auto_clean(&prefs(365, 3), false).await?;

    assert_eq!(report.failed, 1);
    assert_eq!(report.deleted_count(), 1);
    assert_eq!(downloads.deleted(), vec![next.id]);
    // The failed delete contributes nothing to the estimate.
    assert_eq!(report.expected_free_bytes, Some(4 * GIB));
    assert!(report.target_met);

    let stats = reclaimer.stats().snapshot();
    assert_eq!(stats.runs, 1);
    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.bytes_reclaimed, 3 * GIB);
    Ok(())
}

#[tokio::test]
async fn disabled_runs_only_when_forced() -> Result<()> {
    let old = watched_download(60, GIB);
    let downloads = FakeDownloads::new(vec![old.clone()], 64 * GIB, 32 * GIB);
    let reclaimer = StorageReclaimer::new(downloads.clone());
    let disabled = AutoCleanPreferences::default();

    let scheduled = reclaimer.run_auto_clean(&disabled, false).await?;
    assert!(scheduled.skipped);
    assert!(downloads.deleted().is_empty());

    let forced = reclaimer.run_auto_clean(&disabled, true).await?;
    assert!(!forced.skipped);
    assert_eq!(downloads.deleted(), vec![old.id]);
    Ok(())
}

#[tokio::test]
async fn requery_uses_reported_free_space() -> Result<()> {
    let oldest = watched_download(30, 2 * GIB);
    let newer = watched_download(20, 2 * GIB);
    let downloads = FakeDownloads::new(
        vec![oldest.clone(), newer.clone()],
        64 * GIB,
        2 * GIB,
    );
    let reclaimer = StorageReclaimer::new(downloads.clone());
    let mut prefs = prefs(365, 3);
    prefs.requery_free_space = true;

    let report = reclaimer.run_auto_clean(&prefs, false).await?;

    assert_eq!(downloads.deleted(), vec![oldest.id]);
    assert_eq!(report.expected_free_bytes, Some(4 * GIB));
    assert!(report.target_met);
    Ok(())
}

#[tokio::test]
async fn unknown_free_space_skips_the_free_space_phase() -> Result<()> {
    let old = watched_download(30, GIB);
    let recent = watched_download(2, GIB);
    let downloads =
        FakeDownloads::new(vec![old.clone(), recent.clone()], 64 * GIB, 0);
    downloads.break_storage_query();
    let reclaimer = StorageReclaimer::new(downloads.clone());

    let report = reclaimer.run_auto_clean(&prefs(14, 128), false).await?;

    assert_eq!(downloads.deleted(), vec![old.id]);
    assert_eq!(report.free_space_deleted, 0);
    assert_eq!(report.expected_free_bytes, None);
    Ok(())
}

#[tokio::test]
async fn preview_matches_a_real_run_without_deleting() -> Result<()> {
    let old = watched_download(20, GIB);
    let newer = watched_download(5, 3 * GIB);
    let downloads =
        FakeDownloads::new(vec![old.clone(), newer.clone()], 64 * GIB, GIB);
    let reclaimer = StorageReclaimer::new(downloads.clone());
    let prefs = prefs(14, 4);

    let preview = reclaimer.preview_auto_clean(&prefs).await?;
    assert!(preview.dry_run);
    assert!(downloads.deleted().is_empty());

    let run = reclaimer.run_auto_clean(&prefs, false).await?;
    assert_eq!(preview.deleted, run.deleted);
    assert_eq!(preview.expected_free_bytes, run.expected_free_bytes);
    assert_eq!(downloads.deleted(), vec![old.id, newer.id]);
    Ok(())
}
