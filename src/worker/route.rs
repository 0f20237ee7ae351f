//! Decides which requests the interceptor handles.

use color_eyre::Result;
use reqwest::Method;
use url::Url;

use crate::config::Config;
use crate::http::Request;

/// Routing decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Serve from cache or network with offline fallback
  Intercept,
  /// Let the request continue to the network untouched
  Bypass(BypassReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
  /// Anything other than GET
  NonGet,
  /// API traffic carries live state and is never cached
  Api,
  /// URL carries a known corrupted-construction signature
  MalformedUrl,
}

/// Interception rules, applied in order.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
  api_marker: String,
  malformed_markers: Vec<String>,
  shell: Url,
}

impl FetchPolicy {
  pub fn new(api_marker: impl Into<String>, malformed_markers: Vec<String>, shell: Url) -> Self {
    Self {
      api_marker: api_marker.into(),
      malformed_markers,
      shell,
    }
  }

  pub fn from_config(config: &Config) -> Result<Self> {
    Ok(Self::new(
      config.api_marker.clone(),
      config.malformed_markers.clone(),
      config.shell_url()?,
    ))
  }

  /// Document served to HTML requests while offline.
  pub fn shell(&self) -> &Url {
    &self.shell
  }

  pub fn route(&self, request: &Request) -> Route {
    if *request.method() != Method::GET {
      return Route::Bypass(BypassReason::NonGet);
    }

    let url = request.url().as_str();
    if !self.api_marker.is_empty() && url.contains(&self.api_marker) {
      return Route::Bypass(BypassReason::Api);
    }

    if self
      .malformed_markers
      .iter()
      .any(|marker| !marker.is_empty() && url.contains(marker.as_str()))
    {
      return Route::Bypass(BypassReason::MalformedUrl);
    }

    Route::Intercept
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn policy() -> FetchPolicy {
    FetchPolicy::from_config(&Config::default()).unwrap()
  }

  fn request(method: Method, url: &str) -> Request {
    Request::new(method, Url::parse(url).unwrap())
  }

  #[test]
  fn test_non_get_bypassed() {
    for method in [Method::POST, Method::PUT, Method::DELETE, Method::HEAD] {
      assert_eq!(
        policy().route(&request(method, "http://localhost:8000/")),
        Route::Bypass(BypassReason::NonGet)
      );
    }
  }

  #[test]
  fn test_api_bypassed() {
    assert_eq!(
      policy().route(&request(Method::GET, "http://localhost:8000/api/grades")),
      Route::Bypass(BypassReason::Api)
    );
    assert_eq!(
      policy().route(&request(Method::GET, "http://localhost:8000/v2/api/students?id=3")),
      Route::Bypass(BypassReason::Api)
    );
  }

  #[test]
  fn test_method_checked_before_api_marker() {
    assert_eq!(
      policy().route(&request(Method::POST, "http://localhost:8000/api/grades")),
      Route::Bypass(BypassReason::NonGet)
    );
  }

  #[test]
  fn test_malformed_url_bypassed() {
    assert_eq!(
      policy().route(&request(
        Method::GET,
        "http://localhost:8000/fetch(fetchRequest).then"
      )),
      Route::Bypass(BypassReason::MalformedUrl)
    );
  }

  #[test]
  fn test_regular_assets_intercepted() {
    for url in [
      "http://localhost:8000/",
      "http://localhost:8000/dashboard",
      "http://localhost:8000/static/manifest.json",
      "http://localhost:8000/apis.html",
    ] {
      assert_eq!(
        policy().route(&request(Method::GET, url)),
        Route::Intercept,
        "{url}"
      );
    }
  }

  #[test]
  fn test_shell_is_origin_root() {
    assert_eq!(policy().shell().as_str(), "http://localhost:8000/");
  }
}
