//! Lifecycle hooks of the offline worker.
//!
//! Each hook is a plain async function over the cache and network ports:
//! - [`on_install`] precaches the application shell
//! - [`on_activate`] drops cache stores left behind by older versions
//! - [`on_fetch`] routes one request through cache, network and offline fallback
//!
//! [`Worker`] binds them to a configuration and concrete backends.

mod activate;
mod fetch;
mod install;
mod route;

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{Cache, CacheStorage};
use crate::config::Config;
use crate::http::Request;
use crate::network::Fetcher;

pub use activate::on_activate;
pub use fetch::{on_fetch, FetchOutcome};
pub use install::on_install;
use route::FetchPolicy;

pub struct Worker {
  cache_name: String,
  manifest: Vec<Url>,
  cleanup_stale_caches: bool,
  policy: FetchPolicy,
  storage: Arc<dyn CacheStorage>,
  fetcher: Arc<dyn Fetcher>,
  /// Opened on first use and reused by every fetch
  cache: OnceCell<Arc<dyn Cache>>,
}

impl Worker {
  pub fn new(
    config: &Config,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
  ) -> Result<Self> {
    Ok(Self {
      cache_name: config.cache_name.clone(),
      manifest: config.manifest_urls()?,
      cleanup_stale_caches: config.cleanup_stale_caches,
      policy: FetchPolicy::from_config(config)?,
      storage,
      fetcher,
      cache: OnceCell::new(),
    })
  }

  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  pub fn storage(&self) -> &dyn CacheStorage {
    self.storage.as_ref()
  }

  pub fn fetcher(&self) -> &dyn Fetcher {
    self.fetcher.as_ref()
  }

  /// The worker's own cache store.
  pub async fn cache(&self) -> Result<Arc<dyn Cache>> {
    let cache = self
      .cache
      .get_or_try_init(|| self.storage.open(&self.cache_name))
      .await?;
    Ok(Arc::clone(cache))
  }

  /// Precache the manifest. Returns the number of stored assets.
  pub async fn install(&self) -> Result<usize> {
    on_install(
      &self.manifest,
      self.storage.as_ref(),
      &self.cache_name,
      self.fetcher.as_ref(),
    )
    .await
  }

  /// Delete stale cache stores, if enabled. Returns the deleted names.
  pub async fn activate(&self) -> Result<Vec<String>> {
    if !self.cleanup_stale_caches {
      debug!("Stale cache cleanup disabled");
      return Ok(Vec::new());
    }
    on_activate(self.storage.as_ref(), &self.cache_name).await
  }

  /// Route one request. Never fails: if the cache cannot be opened,
  /// intercepted requests still go to the network with the offline fallback.
  pub async fn fetch(&self, request: Request) -> FetchOutcome {
    let cache = match self.cache().await {
      Ok(cache) => Some(cache),
      Err(e) => {
        warn!(cache = %self.cache_name, error = %e, "Cache unavailable, serving without it");
        None
      }
    };

    on_fetch(request, &self.policy, cache, self.fetcher.as_ref()).await
  }
}
