//! # Ferrex Offline
//!
//! Offline-first playback state for Ferrex clients: playback events recorded
//! while the server is unreachable are kept in a durable, coalescing queue
//! and replayed once connectivity returns, and watched downloads are cleaned
//! up automatically to keep the device from filling up.
//!
//! ## Overview
//!
//! - **Queue**: [`queue::OfflineProgressQueue`] keeps at most one progress
//!   and one stop report per item, plus the latest watched-state change,
//!   bounded by size and age and persisted through a [`infra::SlotStore`]
//! - **Replay**: [`sync::OfflineProgressSync`] drains the queue, sorts by
//!   timestamp then event priority, requeues network failures and
//!   dead-letters everything else
//! - **Reclamation**: [`reclaim::StorageReclaimer`] deletes watched
//!   downloads past the retention window, then oldest-first until the
//!   free-space target is met
//! - **Facade**: [`service::OfflinePlaybackService`] wires the pieces for the
//!   application layer and runs background sync
//!
//! ## Examples
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use ferrex_offline::{
//!     config::OfflineConfig,
//!     infra::CacacheSlotStore,
//!     reclaim::DownloadManager,
//!     service::OfflinePlaybackService,
//!     sync::HttpPlaybackAuthority,
//! };
//!
//! # async fn run(downloads: Arc<dyn DownloadManager>) -> anyhow::Result<()> {
//! let (config, _) = OfflineConfig::load_from_env()?;
//! config.validate()?;
//!
//! let store = Arc::new(CacacheSlotStore::new(config.resolve_cache_root()?));
//! let authority = Arc::new(HttpPlaybackAuthority::new(
//!     config.parsed_server_url()?,
//!     config.access_token.clone(),
//!     config.request_timeout(),
//! )?);
//!
//! let service = Arc::new(
//!     OfflinePlaybackService::open(
//!         store,
//!         authority,
//!         downloads,
//!         config.queue,
//!         config.dead_letter_capacity,
//!     )
//!     .await,
//! );
//! let background = service.spawn_background_sync(config.sync_interval());
//!
//! service.set_online(false);
//! service.record_mark_played(uuid::Uuid::now_v7()).await?;
//! service.set_online(true);
//!
//! background.stop().await;
//! # Ok(())
//! # }
//! ```

/// Configuration loading and validation.
pub mod config;
/// Records shared across the engine.
pub mod domain;
/// Error types.
pub mod error;
/// Persistence adapters.
pub mod infra;
/// The durable offline event queue.
pub mod queue;
/// Storage reclamation for watched downloads.
pub mod reclaim;
/// The application-facing facade.
pub mod service;
/// Replay of queued events against the server.
pub mod sync;

pub use config::OfflineConfig;
pub use error::{OfflineError, Result};
pub use service::{BackgroundSync, Delivery, OfflinePlaybackService};
