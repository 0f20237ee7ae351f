//! Network access for requests the cache cannot answer.

mod client;

use async_trait::async_trait;
use color_eyre::Result;

use crate::http::Request;
use crate::http::Response;

pub use client::HttpFetcher;

/// Issues a request over the network.
///
/// Takes the request by value: a caller that still needs the request
/// afterwards must hand over a duplicate. Any `Err` is a network-layer
/// failure (offline, DNS, TLS, timeout). HTTP error statuses are `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: Request) -> Result<Response>;
}
