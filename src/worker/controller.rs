//! Offline cache controller: install, activate and fetch handling for one
//! deployed version.

use std::fmt;
use std::sync::{Arc, Mutex};

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use super::event::{EventKind, ExtendableEvent};
use crate::cache::{CacheLayer, CacheResult, CacheStorage, CachedEntry};
use crate::net::{FetchError, Network, Request, Response};

/// Deployment constants of one controller version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
  origin: Url,
  version: String,
  shell: Vec<Url>,
}

impl ControllerConfig {
  /// Build a configuration. Shell entries are resolved against `origin` and
  /// must stay on it.
  pub fn new(origin: &str, version: &str, shell: &[String]) -> Result<Self> {
    let origin = Url::parse(origin).map_err(|e| eyre!("Invalid origin '{}': {}", origin, e))?;
    if !matches!(origin.scheme(), "http" | "https") {
      return Err(eyre!("Origin must be an http(s) URL, got '{}'", origin));
    }

    let version = version.trim();
    if version.is_empty() {
      return Err(eyre!("Cache version must not be empty"));
    }

    let shell = shell
      .iter()
      .map(|path| {
        let url = origin
          .join(path)
          .map_err(|e| eyre!("Invalid shell entry '{}': {}", path, e))?;
        if url.origin() != origin.origin() {
          return Err(eyre!("Shell entry '{}' is not on origin {}", path, origin));
        }
        Ok(url)
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      origin,
      version: version.to_string(),
      shell,
    })
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn shell(&self) -> &[Url] {
    &self.shell
  }

  /// Resolve a path or absolute URL against the origin.
  pub fn resolve(&self, target: &str) -> Result<Request> {
    let url = self
      .origin
      .join(target)
      .map_err(|e| eyre!("Invalid request target '{}': {}", target, e))?;
    Ok(Request::get(url))
  }
}

/// Delete every generation except `current`. Safe to run repeatedly and
/// concurrently; failures are logged and left for a later run. Returns the
/// number of generations removed.
pub fn purge_stale_generations<S: CacheStorage + ?Sized>(storage: &S, current: &str) -> usize {
  let tags = match storage.generations() {
    Ok(tags) => tags,
    Err(e) => {
      warn!("Failed to list cache generations: {}", e);
      return 0;
    }
  };

  let mut removed = 0;
  for tag in tags.iter().filter(|tag| tag.as_str() != current) {
    match storage.delete_generation(tag) {
      Ok(true) => {
        info!("Deleted stale generation {}", tag);
        removed += 1;
      }
      Ok(false) => debug!("Generation {} already deleted", tag),
      Err(e) => warn!("Failed to delete generation {}: {}", tag, e),
    }
  }
  removed
}

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Uninstalled,
  Installing,
  /// Installed and waiting to be activated
  Installed,
  Activating,
  Activated,
  /// Failed to install, or superseded by a newer version
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      WorkerState::Uninstalled => "uninstalled",
      WorkerState::Installing => "installing",
      WorkerState::Installed => "installed",
      WorkerState::Activating => "activating",
      WorkerState::Activated => "activated",
      WorkerState::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// Cache controller for one version.
///
/// The version tag and shell manifest come from the injected
/// [`ControllerConfig`]; the storage is shared with other versions and
/// partitioned by tag.
pub struct OfflineController<S: CacheStorage, N: Network> {
  config: Arc<ControllerConfig>,
  layer: CacheLayer<S>,
  network: Arc<N>,
  state: Mutex<WorkerState>,
  /// Fetch events whose cache writes are still running
  inflight: Mutex<JoinSet<()>>,
}

impl<S, N> OfflineController<S, N>
where
  S: CacheStorage + 'static,
  N: Network + 'static,
{
  pub fn new(config: ControllerConfig, storage: Arc<S>, network: Arc<N>) -> Self {
    let layer = CacheLayer::new(storage, config.version());
    Self {
      config: Arc::new(config),
      layer,
      network,
      state: Mutex::new(WorkerState::Uninstalled),
      inflight: Mutex::new(JoinSet::new()),
    }
  }

  /// Controller for a version whose generation an earlier run already
  /// installed and activated.
  pub(crate) fn resumed(config: ControllerConfig, storage: Arc<S>, network: Arc<N>) -> Self {
    let controller = Self::new(config, storage, network);
    controller.set_state(WorkerState::Activated);
    controller
  }

  pub fn config(&self) -> &ControllerConfig {
    &self.config
  }

  pub fn version(&self) -> &str {
    self.config.version()
  }

  pub fn state(&self) -> WorkerState {
    self
      .state
      .lock()
      .map(|state| *state)
      .unwrap_or(WorkerState::Redundant)
  }

  fn set_state(&self, next: WorkerState) {
    if let Ok(mut state) = self.state.lock() {
      debug!("Controller {}: {} -> {}", self.version(), *state, next);
      *state = next;
    }
  }

  /// Move from `expected` to `next`, failing if the controller is elsewhere.
  fn transition(&self, expected: WorkerState, next: WorkerState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if *state != expected {
      return Err(eyre!(
        "Controller {} cannot go {} -> {}: currently {}",
        self.version(),
        expected,
        next,
        *state
      ));
    }
    debug!("Controller {}: {} -> {}", self.version(), *state, next);
    *state = next;
    Ok(())
  }

  /// Install: create this version's generation filled with the shell
  /// manifest. All manifest resources are fetched first and written in one
  /// step, so a failure leaves nothing behind.
  pub async fn install(&self) -> Result<()> {
    self.transition(WorkerState::Uninstalled, WorkerState::Installing)?;
    info!(
      "Installing {} ({} shell resources)",
      self.version(),
      self.config.shell().len()
    );

    let mut event = ExtendableEvent::new(EventKind::Install);
    let network = Arc::clone(&self.network);
    let storage = Arc::clone(self.layer.storage());
    let tag = self.version().to_string();
    let requests: Vec<Request> = self.config.shell().iter().cloned().map(Request::get).collect();

    event.wait_until(async move {
      let fetches: Vec<_> = requests.iter().map(|request| network.fetch(request)).collect();
      let responses = try_join_all(fetches)
        .await
        .map_err(|e| eyre!("Failed to fetch shell resource: {}", e))?;

      let entries = requests
        .iter()
        .zip(responses)
        .map(|(request, response)| {
          if !response.ok() {
            return Err(eyre!(
              "Shell resource {} returned status {}",
              request.url(),
              response.status()
            ));
          }
          Ok(CachedEntry::new(request.cache_key(), response.snapshot()))
        })
        .collect::<Result<Vec<_>>>()?;

      storage
        .put_all(&tag, &entries)
        .map_err(|e| eyre!("Failed to populate generation {}: {}", tag, e))
    });

    // Activation does not wait for older instances to go away
    debug!("Controller {} requested to skip waiting", self.version());

    match event.settled().await {
      Ok(()) => {
        self.set_state(WorkerState::Installed);
        info!("Installed {}", self.version());
        Ok(())
      }
      Err(e) => {
        self.set_state(WorkerState::Redundant);
        warn!("Install of {} failed: {}", self.version(), e);
        Err(e)
      }
    }
  }

  /// Activate: delete every generation other than this version's.
  ///
  /// Deleting a stale generation is best effort; failures are logged and
  /// retried on a later activation.
  pub async fn activate(&self) -> Result<()> {
    self.transition(WorkerState::Installed, WorkerState::Activating)?;

    let mut event = ExtendableEvent::new(EventKind::Activate);
    let storage = Arc::clone(self.layer.storage());
    let current = self.version().to_string();

    event.wait_until(async move {
      purge_stale_generations(storage.as_ref(), &current);
      Ok(())
    });

    event.settled().await?;
    self.set_state(WorkerState::Activated);
    info!("Activated {}", self.version());
    Ok(())
  }

  /// Mark this controller as superseded.
  pub(crate) fn retire(&self) {
    self.set_state(WorkerState::Redundant);
  }

  /// Handle an intercepted request.
  ///
  /// Only an activated controller intercepts: in any other state, and for
  /// requests to other origins, the request goes straight to the network and
  /// never touches the cache. Same-origin requests are served network-first;
  /// the cache write runs on the fetch event after the response is returned.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>, FetchError> {
    let state = self.state();
    if state != WorkerState::Activated {
      debug!("Controller {} is {}, passing through {}", self.version(), state, request.url());
      return self
        .network
        .fetch(&request)
        .await
        .map(CacheResult::from_network);
    }

    if request.origin() != self.config.origin().origin() {
      debug!("Passing through cross-origin request {}", request.url());
      return self
        .network
        .fetch(&request)
        .await
        .map(CacheResult::from_network);
    }

    let key = request.cache_key();
    let network = &self.network;
    let served = self
      .layer
      .fetch(&key, || network.fetch(&request))
      .await?;

    if let Some(store) = served.store {
      let mut event = ExtendableEvent::new(EventKind::Fetch);
      event.wait_until(async move {
        store.run().await;
        Ok(())
      });
      self.keep_alive(event);
    }

    Ok(served.result)
  }

  fn keep_alive(&self, event: ExtendableEvent) {
    match self.inflight.lock() {
      Ok(mut inflight) => {
        // Reap finished events so the set does not grow unbounded
        while inflight.try_join_next().is_some() {}
        inflight.spawn(async move {
          let kind = event.kind();
          if let Err(e) = event.settled().await {
            warn!("{} event failed: {}", kind, e);
          }
        });
      }
      Err(e) => warn!("Failed to track fetch event: {}", e),
    }
  }

  /// Wait until every pending cache write from earlier fetches has finished.
  pub async fn wait_until_idle(&self) {
    loop {
      let mut pending = match self.inflight.lock() {
        Ok(mut inflight) => std::mem::take(&mut *inflight),
        Err(_) => return,
      };
      if pending.is_empty() {
        return;
      }
      while pending.join_next().await.is_some() {}
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStorage};
  use crate::testing::{BrokenStorage, MockNetwork};

  const ORIGIN: &str = "https://example.org";

  fn shell() -> Vec<String> {
    vec!["/app/".to_string(), "/app/index.html".to_string()]
  }

  fn controller(
    version: &str,
    storage: &Arc<MemoryStorage>,
    network: &Arc<MockNetwork>,
  ) -> OfflineController<MemoryStorage, MockNetwork> {
    let config = ControllerConfig::new(ORIGIN, version, &shell()).unwrap();
    OfflineController::new(config, Arc::clone(storage), Arc::clone(network))
  }

  fn network_with_shell() -> Arc<MockNetwork> {
    let network = Arc::new(MockNetwork::new());
    network.respond("https://example.org/app/", 200, "<html>shell</html>");
    network.respond("https://example.org/app/index.html", 200, "<html>index</html>");
    network
  }

  #[test]
  fn test_config_resolves_shell() {
    let config = ControllerConfig::new(ORIGIN, " v2 ", &shell()).unwrap();
    assert_eq!(config.version(), "v2");
    assert_eq!(config.shell()[1].as_str(), "https://example.org/app/index.html");
    assert_eq!(
      config.resolve("/app/data.json").unwrap().cache_key(),
      "https://example.org/app/data.json"
    );
  }

  #[test]
  fn test_config_rejects_bad_values() {
    assert!(ControllerConfig::new("not a url", "v1", &[]).is_err());
    assert!(ControllerConfig::new("ftp://example.org", "v1", &[]).is_err());
    assert!(ControllerConfig::new(ORIGIN, "  ", &[]).is_err());
    assert!(ControllerConfig::new(ORIGIN, "v1", &["https://cdn.example.net/app.js".to_string()]).is_err());
  }

  #[tokio::test]
  async fn test_install_populates_generation() {
    let storage = Arc::new(MemoryStorage::new());
    let network = network_with_shell();
    let controller = controller("v2", &storage, &network);

    controller.install().await.unwrap();
    assert_eq!(controller.state(), WorkerState::Installed);
    assert_eq!(
      storage.keys("v2").unwrap(),
      vec![
        "https://example.org/app/".to_string(),
        "https://example.org/app/index.html".to_string()
      ]
    );
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(MockNetwork::new());
    network.respond("https://example.org/app/", 200, "<html>shell</html>");
    network.fail("https://example.org/app/index.html");
    let controller = controller("v2", &storage, &network);

    assert!(controller.install().await.is_err());
    assert_eq!(controller.state(), WorkerState::Redundant);
    assert!(storage.generations().unwrap().is_empty());
    assert!(storage.get("v2", "https://example.org/app/").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_install_rejects_http_error_in_manifest() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(MockNetwork::new());
    network.respond("https://example.org/app/", 200, "<html>shell</html>");
    network.respond("https://example.org/app/index.html", 404, "missing");
    let controller = controller("v2", &storage, &network);

    let err = controller.install().await.unwrap_err();
    assert!(err.to_string().contains("returned status 404"));
    assert!(storage.generations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_lifecycle_order_is_enforced() {
    let storage = Arc::new(MemoryStorage::new());
    let network = network_with_shell();
    let controller = controller("v2", &storage, &network);

    assert!(controller.activate().await.is_err());
    controller.install().await.unwrap();
    assert!(controller.install().await.is_err());
    controller.activate().await.unwrap();
    assert_eq!(controller.state(), WorkerState::Activated);
  }

  #[tokio::test]
  async fn test_activate_deletes_other_generations() {
    for stale in 0..4 {
      let storage = Arc::new(MemoryStorage::new());
      for n in 0..stale {
        storage.put_all(&format!("v{}", n), &[]).unwrap();
      }
      let network = network_with_shell();
      let controller = controller("v9", &storage, &network);

      controller.install().await.unwrap();
      controller.activate().await.unwrap();
      assert_eq!(storage.generations().unwrap(), vec!["v9".to_string()]);
    }
  }

  #[tokio::test]
  async fn test_cross_origin_never_touches_cache() {
    let storage = Arc::new(MemoryStorage::new());
    let network = network_with_shell();
    network.respond("https://cdn.example.net/lib.js", 200, "lib");
    let controller = controller("v2", &storage, &network);
    controller.install().await.unwrap();
    controller.activate().await.unwrap();

    let request = Request::parse("https://cdn.example.net/lib.js").unwrap();
    let result = controller.fetch(request.clone()).await.unwrap();
    controller.wait_until_idle().await;
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.text(), "lib");
    assert!(storage.get("v2", &request.cache_key()).unwrap().is_none());

    // Offline cross-origin requests fail even if something was cached under that key
    storage
      .put(
        "v2",
        &CachedEntry::new(request.cache_key(), Response::new("x", 200, vec![], "stale").snapshot()),
      )
      .unwrap();
    network.fail("https://cdn.example.net/lib.js");
    let err = controller.fetch(request).await.unwrap_err();
    assert_eq!(err, MockNetwork::failure_for("https://cdn.example.net/lib.js"));
  }

  #[tokio::test]
  async fn test_network_first_never_serves_stale_while_online() {
    let storage = Arc::new(MemoryStorage::new());
    let network = network_with_shell();
    let controller = controller("v2", &storage, &network);
    controller.install().await.unwrap();
    controller.activate().await.unwrap();

    let url = "https://example.org/app/data.json";
    network.respond(url, 200, "B1");
    let first = controller.fetch(Request::parse(url).unwrap()).await.unwrap();
    controller.wait_until_idle().await;

    network.respond(url, 200, "B2");
    let second = controller.fetch(Request::parse(url).unwrap()).await.unwrap();
    controller.wait_until_idle().await;

    assert_eq!(first.data.text(), "B1");
    assert_eq!(second.data.text(), "B2");
    assert_eq!(
      storage.get("v2", url).unwrap().unwrap().snapshot.body,
      b"B2".to_vec()
    );
  }

  #[tokio::test]
  async fn test_shell_served_offline_after_install() {
    let storage = Arc::new(MemoryStorage::new());
    let network = network_with_shell();
    let controller = controller("v2", &storage, &network);
    controller.install().await.unwrap();
    controller.activate().await.unwrap();

    network.fail("https://example.org/app/index.html");
    let result = controller
      .fetch(Request::parse("https://example.org/app/index.html#main").unwrap())
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data.text(), "<html>index</html>");
  }

  #[tokio::test]
  async fn test_uncached_failure_is_propagated_unchanged() {
    let storage = Arc::new(MemoryStorage::new());
    let network = network_with_shell();
    let controller = controller("v2", &storage, &network);
    controller.install().await.unwrap();
    controller.activate().await.unwrap();

    let url = "https://example.org/app/never.json";
    network.fail(url);
    let err = controller.fetch(Request::parse(url).unwrap()).await.unwrap_err();
    assert_eq!(err, MockNetwork::failure_for(url));
  }

  #[tokio::test]
  async fn test_storage_failures_do_not_block_serving() {
    let storage = Arc::new(BrokenStorage::new());
    storage.put_all("v1", &[]).unwrap();
    let network = network_with_shell();
    let config = ControllerConfig::new(ORIGIN, "v2", &shell()).unwrap();
    let controller = OfflineController::new(config, Arc::clone(&storage), Arc::clone(&network));

    controller.install().await.unwrap();
    controller.activate().await.unwrap();
    assert_eq!(controller.state(), WorkerState::Activated);
    assert_eq!(storage.generations().unwrap(), vec!["v1".to_string(), "v2".to_string()]);

    let url = "https://example.org/app/data.json";
    network.respond(url, 200, "{\"x\":1}");
    let result = controller.fetch(Request::parse(url).unwrap()).await.unwrap();
    controller.wait_until_idle().await;
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.text(), "{\"x\":1}");
    assert!(storage.get("v2", url).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_inactive_controller_does_not_intercept() {
    let storage = Arc::new(MemoryStorage::new());
    let network = network_with_shell();
    let controller = controller("v2", &storage, &network);
    controller.install().await.unwrap();

    let shell_url = "https://example.org/app/index.html";
    network.fail(shell_url);
    let err = controller.fetch(Request::parse(shell_url).unwrap()).await.unwrap_err();
    assert_eq!(err, MockNetwork::failure_for(shell_url));

    controller.activate().await.unwrap();
    controller.retire();
    let url = "https://example.org/app/data.json";
    network.respond(url, 200, "late");
    let result = controller.fetch(Request::parse(url).unwrap()).await.unwrap();
    controller.wait_until_idle().await;
    assert_eq!(result.data.text(), "late");
    assert!(storage.get("v2", url).unwrap().is_none());
  }
}
