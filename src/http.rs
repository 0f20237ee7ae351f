//! Request and response values exchanged between the page, the cache and the network.
//!
//! Bodies are single-read. Consuming a response takes it by value, so any code
//! path that needs to both store and return a response must call
//! [`Response::duplicate`] first. Requests follow the same rule.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use url::Url;

/// Body of the synthesized response served when nothing else is available.
pub const OFFLINE_BODY: &str = "Offline";

/// An outgoing request issued by a page.
#[derive(Debug)]
pub struct Request {
  method: Method,
  url: Url,
  headers: HeaderMap,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: HeaderMap::new(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  /// Whether the Accept header asks for an HTML document.
  ///
  /// A missing or non-UTF-8 Accept header counts as "not HTML".
  pub fn accepts_html(&self) -> bool {
    self
      .headers
      .get(ACCEPT)
      .and_then(|v| v.to_str().ok())
      .is_some_and(|v| v.contains("text/html"))
  }

  /// Produce an independent copy that can be handed to another consumer.
  pub fn duplicate(&self) -> Self {
    Self {
      method: self.method.clone(),
      url: self.url.clone(),
      headers: self.headers.clone(),
    }
  }

  pub fn into_parts(self) -> (Method, Url, HeaderMap) {
    (self.method, self.url, self.headers)
  }
}

/// How a response was delivered, mirroring the browser's `Response.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response with fully readable headers and body
  Basic,
  /// Cross-origin response delivered under CORS
  Cors,
  /// Cross-origin response whose contents are not inspectable
  Opaque,
  /// Network error placeholder
  Error,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
      Self::Error => "error",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      "opaque" => Ok(Self::Opaque),
      "error" => Ok(Self::Error),
      other => Err(eyre!("Unknown response type: {}", other)),
    }
  }
}

impl std::fmt::Display for ResponseType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A response returned to the page, read from the cache, or stored into it.
#[derive(Debug)]
pub struct Response {
  status: StatusCode,
  response_type: ResponseType,
  headers: HeaderMap,
  body: Vec<u8>,
}

impl Response {
  pub fn new(
    status: StatusCode,
    response_type: ResponseType,
    headers: HeaderMap,
    body: impl Into<Vec<u8>>,
  ) -> Self {
    Self {
      status,
      response_type,
      headers,
      body: body.into(),
    }
  }

  /// The locally synthesized placeholder: `200`, `text/plain`, `Offline`.
  pub fn offline() -> Self {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    Self::new(StatusCode::OK, ResponseType::Basic, headers, OFFLINE_BODY)
  }

  pub fn status(&self) -> StatusCode {
    self.status
  }

  pub fn response_type(&self) -> ResponseType {
    self.response_type
  }

  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }

  /// Any 2xx status.
  pub fn is_ok(&self) -> bool {
    self.status.is_success()
  }

  /// Only complete same-origin responses are persisted.
  pub fn is_cacheable(&self) -> bool {
    self.status == StatusCode::OK && self.response_type == ResponseType::Basic
  }

  /// Produce an independent copy that can be handed to another consumer.
  pub fn duplicate(&self) -> Self {
    Self {
      status: self.status,
      response_type: self.response_type,
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }

  pub fn text(self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  pub fn into_parts(self) -> (StatusCode, ResponseType, HeaderMap, Vec<u8>) {
    (self.status, self.response_type, self.headers, self.body)
  }
}
