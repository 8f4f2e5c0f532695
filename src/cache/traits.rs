//! Core traits and types for the generation cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::net::Snapshot;

/// A response snapshot stored under a request key inside one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
  /// Normalized absolute URL of the request
  pub key: String,
  pub snapshot: Snapshot,
  pub stored_at: DateTime<Utc>,
}

impl CachedEntry {
  pub fn new(key: impl Into<String>, snapshot: Snapshot) -> Self {
    Self {
      key: key.into(),
      snapshot,
      stored_at: Utc::now(),
    }
  }
}

/// Cache storage partitioned by generation tag.
///
/// Each generation is an independent namespace of entries, so instances of
/// different versions can share one storage without touching each other's
/// entries.
pub trait CacheStorage: Send + Sync {
  /// Tags of all existing generations.
  fn generations(&self) -> Result<Vec<String>>;

  fn has_generation(&self, tag: &str) -> Result<bool>;

  /// Create the generation (if needed) and write all entries in one step.
  /// Either every entry becomes visible or none does.
  fn put_all(&self, tag: &str, entries: &[CachedEntry]) -> Result<()>;

  /// Insert or overwrite one entry in an existing generation.
  ///
  /// Returns `false` without writing when the generation does not exist, so a
  /// late write from a superseded instance cannot resurrect a deleted
  /// generation.
  fn put(&self, tag: &str, entry: &CachedEntry) -> Result<bool>;

  fn get(&self, tag: &str, key: &str) -> Result<Option<CachedEntry>>;

  /// Request keys stored in a generation, sorted.
  fn keys(&self, tag: &str) -> Result<Vec<String>>;

  /// Delete a generation with all its entries. Deleting a missing generation
  /// is not an error; the return value tells whether anything was removed.
  fn delete_generation(&self, tag: &str) -> Result<bool>;
}

/// Result of serving a request, including where the response came from.
#[derive(Debug)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// When the served entry was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where served data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Network unavailable, serving the cached snapshot
  Offline,
}
