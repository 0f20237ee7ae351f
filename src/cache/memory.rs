//! In-memory cache storage. Nothing survives the process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::traits::{storable_key, Cache, CacheEntry, CacheStorage, RequestKey};
use crate::http::{Request, Response};

struct StoredResponse {
  key: RequestKey,
  response: Response,
  cached_at: DateTime<Utc>,
}

/// A named store held in memory.
///
/// Counts lookups and writes so callers can assert which requests touched it.
#[derive(Default)]
pub struct MemoryCache {
  entries: Mutex<HashMap<String, StoredResponse>>,
  lookups: AtomicUsize,
  writes: AtomicUsize,
}

#[cfg(test)]
impl MemoryCache {
  pub fn lookup_count(&self) -> usize {
    self.lookups.load(Ordering::SeqCst)
  }

  pub fn write_count(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  pub fn len(&self) -> usize {
    self.entries.lock().map(|e| e.len()).unwrap_or(0)
  }
}

#[async_trait]
impl Cache for MemoryCache {
  async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
    self.lookups.fetch_add(1, Ordering::SeqCst);
    let key = RequestKey::of(request);
    if !key.is_cacheable() {
      return Ok(None);
    }

    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      entries
        .get(&key.cache_hash())
        .map(|stored| stored.response.duplicate()),
    )
  }

  async fn put(&self, request: &Request, response: Response) -> Result<()> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    let key = storable_key(request)?;

    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert(
      key.cache_hash(),
      StoredResponse {
        key,
        response,
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  async fn add_all(&self, batch: Vec<(Request, Response)>) -> Result<()> {
    self.writes.fetch_add(1, Ordering::SeqCst);

    // Validate everything before touching the map
    let mut staged = Vec::with_capacity(batch.len());
    for (request, response) in batch {
      staged.push((storable_key(&request)?, response));
    }

    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let cached_at = Utc::now();
    for (key, response) in staged {
      entries.insert(
        key.cache_hash(),
        StoredResponse {
          key,
          response,
          cached_at,
        },
      );
    }
    Ok(())
  }

  async fn entries(&self) -> Result<Vec<CacheEntry>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut listed: Vec<CacheEntry> = entries
      .values()
      .map(|stored| CacheEntry {
        key: stored.key.clone(),
        status: stored.response.status().as_u16(),
        cached_at: stored.cached_at,
      })
      .collect();
    listed.sort_by(|a, b| a.key.url().cmp(b.key.url()));
    Ok(listed)
  }
}

/// In-memory set of named stores.
#[derive(Default)]
pub struct MemoryStorage {
  stores: Mutex<BTreeMap<String, Arc<MemoryCache>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Open a store and keep its concrete type, for inspecting counters.
  pub fn open_memory(&self, name: &str) -> Result<Arc<MemoryCache>> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(Arc::clone(stores.entry(name.to_string()).or_default()))
  }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
  async fn open(&self, name: &str) -> Result<Arc<dyn Cache>> {
    let cache: Arc<dyn Cache> = self.open_memory(name)?;
    Ok(cache)
  }

  async fn keys(&self) -> Result<Vec<String>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.keys().cloned().collect())
  }

  async fn delete(&self, name: &str) -> Result<bool> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.remove(name).is_some())
  }
}
