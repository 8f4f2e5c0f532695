//! Test doubles shared by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use color_eyre::{eyre::eyre, Result};

use crate::cache::{CacheStorage, CachedEntry, MemoryStorage};
use crate::net::{FetchError, Network, Request, Response};

enum Route {
  Respond { status: u16, body: Vec<u8> },
  Fail,
}

/// Scripted network: each URL either answers with a fixed response or fails
/// at the transport level. Unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct MockNetwork {
  routes: Mutex<HashMap<String, Route>>,
  calls: Mutex<Vec<String>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) {
    self.routes.lock().unwrap().insert(
      url.to_string(),
      Route::Respond {
        status,
        body: body.as_bytes().to_vec(),
      },
    );
  }

  pub fn fail(&self, url: &str) {
    self.routes.lock().unwrap().insert(url.to_string(), Route::Fail);
  }

  /// URLs requested so far, in order.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  /// The error this network produces for `url` when it is down.
  pub fn failure_for(url: &str) -> FetchError {
    FetchError::Connect {
      url: url.to_string(),
      reason: "network is unreachable".to_string(),
    }
  }
}

impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let url = request.url().to_string();
    self.calls.lock().unwrap().push(url.clone());

    let routes = self.routes.lock().unwrap();
    match routes.get(&url) {
      Some(Route::Respond { status, body }) => Ok(Response::new(
        url.clone(),
        *status,
        vec![("content-type".to_string(), "application/octet-stream".to_string())],
        body.clone(),
      )),
      Some(Route::Fail) | None => Err(Self::failure_for(&url)),
    }
  }
}

/// Storage whose single-entry writes and generation deletes always fail.
/// Everything else goes to an in-memory store, so installs still succeed.
#[derive(Default)]
pub struct BrokenStorage {
  inner: MemoryStorage,
}

impl BrokenStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for BrokenStorage {
  fn generations(&self) -> Result<Vec<String>> {
    self.inner.generations()
  }

  fn has_generation(&self, tag: &str) -> Result<bool> {
    self.inner.has_generation(tag)
  }

  fn put_all(&self, tag: &str, entries: &[CachedEntry]) -> Result<()> {
    self.inner.put_all(tag, entries)
  }

  fn put(&self, _tag: &str, entry: &CachedEntry) -> Result<bool> {
    Err(eyre!("disk full while writing {}", entry.key))
  }

  fn get(&self, tag: &str, key: &str) -> Result<Option<CachedEntry>> {
    self.inner.get(tag, key)
  }

  fn keys(&self, tag: &str) -> Result<Vec<String>> {
    self.inner.keys(tag)
  }

  fn delete_generation(&self, tag: &str) -> Result<bool> {
    Err(eyre!("generation {} is locked", tag))
  }
}
