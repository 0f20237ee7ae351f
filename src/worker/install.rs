use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tracing::{debug, info};
use url::Url;

use crate::cache::CacheStorage;
use crate::http::Request;
use crate::network::Fetcher;

/// Precache the application shell.
///
/// Opens (or creates) `cache_name`, fetches every manifest entry and stores
/// them in one batch. Any network failure or non-2xx response fails the whole
/// install and leaves the store untouched, so the host retries next time.
pub async fn on_install(
  manifest: &[Url],
  storage: &dyn CacheStorage,
  cache_name: &str,
  fetcher: &dyn Fetcher,
) -> Result<usize> {
  let cache = storage.open(cache_name).await?;

  let downloads = manifest.iter().map(|url| async move {
    let request = Request::get(url.clone());
    let response = fetcher
      .fetch(request.duplicate())
      .await
      .map_err(|e| eyre!("Failed to precache {}: {}", url, e))?;

    if !response.is_ok() {
      return Err(eyre!(
        "Failed to precache {}: server returned {}",
        url,
        response.status()
      ));
    }

    debug!(url = %url, status = %response.status(), "Fetched shell asset");
    Ok::<_, color_eyre::Report>((request, response))
  });

  let entries = try_join_all(downloads).await?;
  let count = entries.len();
  cache.add_all(entries).await?;

  info!(cache = cache_name, assets = count, "Installed application shell");
  Ok(count)
}
