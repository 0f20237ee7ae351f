//! Ports for the host-managed cache store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::http::{Request, Response};

/// Identity of a request inside a cache store: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: Method,
  url: String,
}

impl RequestKey {
  pub fn of(request: &Request) -> Self {
    let mut url = request.url().clone();
    url.set_fragment(None);
    Self {
      method: request.method().clone(),
      url: url.into(),
    }
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// Only GET requests can be looked up or stored.
  pub fn is_cacheable(&self) -> bool {
    self.method == Method::GET
  }

  /// Stable, fixed-length key for storage backends.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Reject requests that the cache cannot hold.
pub fn storable_key(request: &Request) -> Result<RequestKey> {
  let key = RequestKey::of(request);
  if !key.is_cacheable() {
    return Err(eyre!(
      "Cannot cache {} {}: only GET requests are cacheable",
      key.method(),
      key.url()
    ));
  }
  Ok(key)
}

/// Summary of a stored entry, for listings.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: RequestKey,
  pub status: u16,
  pub cached_at: DateTime<Utc>,
}

/// A single named cache store.
#[async_trait]
pub trait Cache: Send + Sync {
  /// Look up the stored response for a request. Non-GET requests never match.
  async fn match_request(&self, request: &Request) -> Result<Option<Response>>;

  /// Store a response under the request's key, replacing any previous entry.
  async fn put(&self, request: &Request, response: Response) -> Result<()>;

  /// Store a batch of entries atomically: either all are written or none.
  async fn add_all(&self, entries: Vec<(Request, Response)>) -> Result<()>;

  /// List stored entries.
  async fn entries(&self) -> Result<Vec<CacheEntry>>;
}

/// The set of named cache stores (the browser's `caches` object).
#[async_trait]
pub trait CacheStorage: Send + Sync {
  /// Open a store by name, creating it if absent.
  async fn open(&self, name: &str) -> Result<Arc<dyn Cache>>;

  /// Names of all existing stores.
  async fn keys(&self) -> Result<Vec<String>>;

  /// Delete a store and all of its entries. Returns whether it existed.
  async fn delete(&self, name: &str) -> Result<bool>;
}
