use color_eyre::Result;
use tracing::info;

use crate::cache::CacheStorage;

/// Delete every cache store except `current`. Returns the deleted names.
pub async fn on_activate(storage: &dyn CacheStorage, current: &str) -> Result<Vec<String>> {
  let mut removed = Vec::new();

  for name in storage.keys().await? {
    if name == current {
      continue;
    }
    if storage.delete(&name).await? {
      info!(cache = %name, "Deleted stale cache");
      removed.push(name);
    }
  }

  Ok(removed)
}
