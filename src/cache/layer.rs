//! Cache layer that orchestrates the serving policy around network fetching.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use super::storage::MemoryStorage;
use super::traits::{CacheResult, CacheStorage, CachedEntry};
use crate::net::{FetchError, Response};

/// HTTP 206 responses are never stored.
const PARTIAL_CONTENT: u16 = 206;

/// Network-first cache layer bound to one generation.
///
/// Every request goes to the network. Successful responses refresh the
/// generation; the cache is consulted only when the transport fails.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  generation: String,
}

/// A response served by the layer, plus the cache write it wants performed.
///
/// The write is handed back instead of being awaited so the caller can
/// return the response first and finish the write on its own schedule.
pub struct Served<S: CacheStorage> {
  pub result: CacheResult<Response>,
  pub store: Option<StoreTask<S>>,
}

/// Deferred write of one snapshot into a generation.
pub struct StoreTask<S: CacheStorage> {
  storage: Arc<S>,
  generation: String,
  entry: CachedEntry,
}

impl<S: CacheStorage> StoreTask<S> {
  pub fn key(&self) -> &str {
    &self.entry.key
  }

  /// Write the entry. Failures are logged and swallowed: a full or broken
  /// cache must never take the response away from the caller.
  pub async fn run(self) {
    match self.storage.put(&self.generation, &self.entry) {
      Ok(true) => debug!("Cached {} in {}", self.entry.key, self.generation),
      Ok(false) => debug!(
        "Generation {} is gone, dropping entry for {}",
        self.generation, self.entry.key
      ),
      Err(e) => warn!("Failed to cache {}: {}", self.entry.key, e),
    }
  }
}

impl<S: CacheStorage> CacheLayer<S> {
  pub fn new(storage: Arc<S>, generation: impl Into<String>) -> Self {
    Self {
      storage,
      generation: generation.into(),
    }
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Serve `key` network-first.
  ///
  /// 1. Fetch from network
  /// 2. On success, snapshot the response for the cache and return it
  /// 3. On transport failure, return the cached snapshot (offline mode)
  /// 4. With nothing cached, return the transport error unchanged
  pub async fn fetch<F, Fut>(&self, key: &str, fetcher: F) -> Result<Served<S>, FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response, FetchError>>,
  {
    match fetcher().await {
      Ok(response) => {
        let store = if response.status() == PARTIAL_CONTENT {
          debug!("Not caching partial response for {}", key);
          None
        } else {
          Some(StoreTask {
            storage: Arc::clone(&self.storage),
            generation: self.generation.clone(),
            entry: CachedEntry::new(key, response.snapshot()),
          })
        };

        Ok(Served {
          result: CacheResult::from_network(response),
          store,
        })
      }
      Err(err) => match self.storage.get(&self.generation, key) {
        Ok(Some(cached)) => {
          debug!("Network failed for {}, serving cached copy: {}", key, err);
          Ok(Served {
            result: CacheResult::offline(cached.snapshot.into_response(), cached.stored_at),
            store: None,
          })
        }
        Ok(None) => Err(err),
        Err(e) => {
          warn!("Failed to read cache for {}: {}", key, e);
          Err(err)
        }
      },
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      generation: self.generation.clone(),
    }
  }
}

impl CacheLayer<MemoryStorage> {
  /// Layer over a fresh in-memory storage.
  pub fn in_memory(generation: impl Into<String>) -> Self {
    Self::new(Arc::new(MemoryStorage::new()), generation)
  }
}
