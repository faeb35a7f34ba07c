//! Command-line access to the offline queue and auto-clean preferences.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ferrex_offline::{
    config::{OfflineConfig, OfflineConfigSource},
    infra::cache::{CacacheSlotStore, SlotStore},
    queue::OfflineProgressQueue,
    reclaim::{AutoCleanPreferences, PreferencesStore},
    sync::{HttpPlaybackAuthority, OfflineProgressSync},
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "ferrex-offline",
    about = "Inspect and replay offline playback state"
)]
struct Cli {
    /// Config file (TOML or JSON). Overrides $FERREX_OFFLINE_CONFIG_PATH.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show queued events and auto-clean preferences
    Status,
    /// Replay queued events against the configured server once
    Sync,
    /// Show or change auto-clean preferences
    Prefs {
        #[command(subcommand)]
        action: Option<PrefsAction>,
    },
    /// Drop every queued event without sending it
    Purge {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum PrefsAction {
    /// Print the current preferences
    Show,
    /// Change one or more preferences
    Set {
        #[arg(long)]
        enabled: Option<bool>,
        /// Days a watched download is kept (1-365)
        #[arg(long)]
        retention_days: Option<u32>,
        /// Free space to maintain in GiB (1-128)
        #[arg(long)]
        min_free_gb: Option<u32>,
        #[arg(long)]
        requery_free_space: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferrex_offline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let (config, source) = match &cli.config {
        Some(path) => (
            OfflineConfig::load_from_file(path)?,
            OfflineConfigSource::File(path.clone()),
        ),
        None => OfflineConfig::load_from_env()?,
    };
    config.validate().context("invalid offline configuration")?;
    info!("loaded offline config from {:?}", source);

    let root = config.resolve_cache_root()?;
    info!("offline store at {}", root.as_path().display());
    let store: Arc<dyn SlotStore> = Arc::new(CacacheSlotStore::new(root));

    match cli.command {
        Command::Status => {
            let queue = OfflineProgressQueue::open(store.clone(), config.queue)
                .await;
            let updates = queue.queued_updates().await;
            println!("pending events: {}", updates.len());
            for update in &updates {
                println!(
                    "  {} {:<13} item={} position={}",
                    update.timestamp.to_rfc3339(),
                    update.event_type,
                    update.item_id,
                    update
                        .position_ticks
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "-".into())
                );
            }
            let prefs = PreferencesStore::load(store).await.get();
            print_prefs(&prefs);
        }
        Command::Sync => {
            let queue = Arc::new(
                OfflineProgressQueue::open(store, config.queue).await,
            );
            let authority = HttpPlaybackAuthority::new(
                config.parsed_server_url()?,
                config.access_token.clone(),
                config.request_timeout(),
            )?;
            let sync = OfflineProgressSync::new(
                queue,
                Arc::new(authority),
                config.dead_letter_capacity,
            );
            let report = sync.sync_offline_progress().await?;
            println!(
                "synced {}/{} events; requeued={}, dropped={}",
                report.succeeded,
                report.total,
                report.requeued,
                report.dead_lettered
            );
            for letter in sync.stats().recent_dead_letters() {
                println!(
                    "  dropped {} for item {}: {}",
                    letter.event_type, letter.item_id, letter.reason
                );
            }
        }
        Command::Prefs { action } => {
            let prefs = PreferencesStore::load(store).await;
            match action.unwrap_or(PrefsAction::Show) {
                PrefsAction::Show => print_prefs(&prefs.get()),
                PrefsAction::Set {
                    enabled,
                    retention_days,
                    min_free_gb,
                    requery_free_space,
                } => {
                    let updated = prefs
                        .update(|p| {
                            if let Some(enabled) = enabled {
                                p.enabled = enabled;
                            }
                            if let Some(days) = retention_days {
                                p.set_watched_retention_days(days);
                            }
                            if let Some(gb) = min_free_gb {
                                p.set_min_free_space_gb(gb);
                            }
                            if let Some(requery) = requery_free_space {
                                p.requery_free_space = requery;
                            }
                        })
                        .await?;
                    print_prefs(&updated);
                }
            }
        }
        Command::Purge { yes } => {
            if !yes {
                bail!("refusing to drop queued events without --yes");
            }
            let queue =
                OfflineProgressQueue::open(store, config.queue).await;
            let dropped = queue.clear().await?;
            println!("dropped {} queued events", dropped);
        }
    }

    Ok(())
}

fn print_prefs(prefs: &AutoCleanPreferences) {
    println!("auto-clean enabled:     {}", prefs.enabled);
    println!("watched retention days: {}", prefs.watched_retention_days);
    println!("minimum free space GiB: {}", prefs.min_free_space_gb);
    println!("requery free space:     {}", prefs.requery_free_space);
}
