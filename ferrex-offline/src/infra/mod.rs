//! Infrastructure adapters.

/// Local persistence.
pub mod cache;

pub use cache::*;
