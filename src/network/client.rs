use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use super::Fetcher;
use crate::http::{Request, Response, ResponseType};

/// HTTP fetcher backed by reqwest.
///
/// Responses from the configured origin are `basic`; everything else is `cors`.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Url,
}

impl HttpFetcher {
  pub fn new(origin: Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("shellcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self::with_client(client, origin))
  }

  pub fn with_client(client: reqwest::Client, origin: Url) -> Self {
    Self { client, origin }
  }
}

/// Classify a response by the origin of the URL it was finally served from.
pub fn classify(origin: &Url, served_from: &Url) -> ResponseType {
  if origin.origin() == served_from.origin() {
    ResponseType::Basic
  } else {
    ResponseType::Cors
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: Request) -> Result<Response> {
    let (method, url, headers) = request.into_parts();

    let response = self
      .client
      .request(method, url.clone())
      .headers(headers)
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

    let response_type = classify(&self.origin, response.url());
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?;

    Ok(Response::new(status, response_type, headers, body.to_vec()))
  }
}
