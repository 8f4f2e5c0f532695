//! Versioned response cache for offline support.
//!
//! This module provides:
//! - Cache generations: namespaces of request key -> response snapshot, one per version tag
//! - Pluggable storage (SQLite on disk, in-memory for tests)
//! - A network-first layer that refreshes the cache and serves it when offline

mod layer;
mod storage;
mod traits;

pub use layer::{CacheLayer, Served, StoreTask};
pub use storage::{MemoryStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, CacheStorage, CachedEntry};
