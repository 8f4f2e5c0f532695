use std::sync::{Arc, RwLock};

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info};

use super::controller::{purge_stale_generations, ControllerConfig, OfflineController};
use crate::cache::{CacheResult, CacheStorage};
use crate::net::{FetchError, Network, Request, Response};

/// Scope registration: owns the shared cache storage and decides which
/// controller version, if any, intercepts requests.
pub struct Registration<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  active: RwLock<Option<Arc<OfflineController<S, N>>>>,
}

impl<S, N> Registration<S, N>
where
  S: CacheStorage + 'static,
  N: Network + 'static,
{
  pub fn new(storage: Arc<S>, network: Arc<N>) -> Self {
    Self {
      storage,
      network,
      active: RwLock::new(None),
    }
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// The controller currently serving requests.
  pub fn active(&self) -> Option<Arc<OfflineController<S, N>>> {
    self.active.read().ok().and_then(|active| active.clone())
  }

  fn claim(&self, controller: Arc<OfflineController<S, N>>) -> Result<()> {
    let previous = {
      let mut active = self
        .active
        .write()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      active.replace(controller)
    };

    if let Some(previous) = previous {
      info!("Version {} superseded", previous.version());
      previous.retire();
    }
    Ok(())
  }

  /// Install and activate a new version.
  ///
  /// If the install fails the current controller keeps serving and the error
  /// is returned. Otherwise the new version activates right away without
  /// waiting for the old one, cleans up older generations and takes over
  /// every subsequent request.
  pub async fn register(&self, config: ControllerConfig) -> Result<Arc<OfflineController<S, N>>> {
    let controller = Arc::new(OfflineController::new(
      config,
      Arc::clone(&self.storage),
      Arc::clone(&self.network),
    ));

    controller.install().await?;
    controller.activate().await?;
    self.claim(Arc::clone(&controller))?;

    info!("Version {} now controls requests", controller.version());
    Ok(controller)
  }

  /// Resume a version installed by an earlier run, if its generation still
  /// exists. Stale generations left behind by an interrupted activation are
  /// purged again. Returns `None` when it has to be registered from scratch.
  pub fn restore(&self, config: ControllerConfig) -> Result<Option<Arc<OfflineController<S, N>>>> {
    if !self.storage.has_generation(config.version())? {
      return Ok(None);
    }

    debug!("Restoring version {}", config.version());
    purge_stale_generations(self.storage.as_ref(), config.version());
    let controller = Arc::new(OfflineController::resumed(
      config,
      Arc::clone(&self.storage),
      Arc::clone(&self.network),
    ));
    self.claim(Arc::clone(&controller))?;
    Ok(Some(controller))
  }

  /// Restore the configured version, registering it if needed.
  pub async fn ensure(&self, config: ControllerConfig) -> Result<Arc<OfflineController<S, N>>> {
    match self.restore(config.clone())? {
      Some(controller) => Ok(controller),
      None => self.register(config).await,
    }
  }

  /// Route a request through the active controller. Without one, requests
  /// go to the network untouched.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>, FetchError> {
    match self.active() {
      Some(controller) => controller.fetch(request).await,
      None => self
        .network
        .fetch(&request)
        .await
        .map(CacheResult::from_network),
    }
  }
}
