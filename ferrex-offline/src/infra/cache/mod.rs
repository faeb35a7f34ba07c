//! On-disk persistence for offline state.
//!
//! Small JSON documents (the progress queue, auto-clean preferences) live in
//! named slots of a `cacache` store rooted in the platform cache directory.

/// Slot stores.
pub mod slot_store;

pub use slot_store::*;
