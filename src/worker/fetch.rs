use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::route::{FetchPolicy, Route};
use crate::cache::Cache;
use crate::http::{Request, Response};
use crate::network::Fetcher;

/// What the host should do with an intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
  /// Not handled here; the host sends the request on as usual
  PassThrough(Request),
  /// Substitute this response
  Respond {
    response: Response,
    /// Background write of a copy of `response` into the cache, if one was started.
    /// The response does not depend on it; the host may await or drop it.
    write: Option<JoinHandle<()>>,
  },
}

/// Handle one outgoing request.
///
/// Bypassed requests come back untouched. Everything else is answered from
/// the cache, then the network, then an offline fallback, so the page never
/// sees a network-layer error. With no cache available every lookup is a
/// miss and nothing is stored.
pub async fn on_fetch(
  request: Request,
  policy: &FetchPolicy,
  cache: Option<Arc<dyn Cache>>,
  fetcher: &dyn Fetcher,
) -> FetchOutcome {
  if let Route::Bypass(reason) = policy.route(&request) {
    debug!(method = %request.method(), url = %request.url(), ?reason, "Passing request through");
    return FetchOutcome::PassThrough(request);
  }

  if let Some(cached) = lookup(cache.as_deref(), &request).await {
    debug!(url = %request.url(), "Serving from cache");
    return FetchOutcome::Respond {
      response: cached,
      write: None,
    };
  }

  match fetcher.fetch(request.duplicate()).await {
    Ok(response) => {
      let write = match cache {
        Some(cache) if response.is_cacheable() => Some(store_in_background(
          cache,
          request,
          response.duplicate(),
        )),
        _ => {
          debug!(
            url = %request.url(),
            status = %response.status(),
            response_type = %response.response_type(),
            "Not caching response"
          );
          None
        }
      };
      FetchOutcome::Respond { response, write }
    }
    Err(e) => {
      debug!(url = %request.url(), error = %e, "Network failed, serving offline fallback");
      FetchOutcome::Respond {
        response: offline_fallback(&request, policy, cache.as_deref()).await,
        write: None,
      }
    }
  }
}

/// Cache lookup where a missing cache or a read error counts as a miss.
async fn lookup(cache: Option<&dyn Cache>, request: &Request) -> Option<Response> {
  let cache = cache?;
  match cache.match_request(request).await {
    Ok(hit) => hit,
    Err(e) => {
      warn!(url = %request.url(), error = %e, "Cache lookup failed, treating as miss");
      None
    }
  }
}

/// Store a response without holding up the page. Failures are only logged.
fn store_in_background(
  cache: Arc<dyn Cache>,
  request: Request,
  response: Response,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    if let Err(e) = cache.put(&request, response).await {
      warn!(url = %request.url(), error = %e, "Failed to cache response");
    }
  })
}

/// Cached shell for HTML requests, plaintext placeholder for everything else.
async fn offline_fallback(
  request: &Request,
  policy: &FetchPolicy,
  cache: Option<&dyn Cache>,
) -> Response {
  if request.accepts_html() {
    match lookup(cache, &Request::get(policy.shell().clone())).await {
      Some(shell) => return shell,
      None => debug!(shell = %policy.shell(), "No cached shell document"),
    }
  }

  Response::offline()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryCache, MemoryStorage};
  use crate::config::Config;
  use crate::http::ResponseType;
  use crate::network::fake::ScriptedFetcher;
  use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
  use reqwest::{Method, StatusCode};
  use url::Url;

  const ORIGIN: &str = "http://localhost:8000";

  struct Harness {
    policy: FetchPolicy,
    cache: Arc<MemoryCache>,
    fetcher: ScriptedFetcher,
  }

  impl Harness {
    fn new(fetcher: ScriptedFetcher) -> Self {
      let storage = MemoryStorage::new();
      Self {
        policy: FetchPolicy::from_config(&Config::default()).unwrap(),
        cache: storage.open_memory("grades-app-v1").unwrap(),
        fetcher,
      }
    }

    async fn seed(&self, path: &str, body: &str) {
      self
        .cache
        .put(&get(path), ok(body))
        .await
        .unwrap();
    }

    async fn fetch(&self, request: Request) -> FetchOutcome {
      let cache: Arc<dyn Cache> = self.cache.clone();
      on_fetch(request, &self.policy, Some(cache), &self.fetcher).await
    }
  }

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  fn get(path: &str) -> Request {
    Request::get(url(path))
  }

  fn html_get(path: &str) -> Request {
    get(path).with_header(ACCEPT, HeaderValue::from_static("text/html"))
  }

  fn ok(body: &str) -> Response {
    Response::new(StatusCode::OK, ResponseType::Basic, HeaderMap::new(), body)
  }

  fn expect_response(outcome: FetchOutcome) -> (Response, Option<JoinHandle<()>>) {
    match outcome {
      FetchOutcome::Respond { response, write } => (response, write),
      FetchOutcome::PassThrough(request) => panic!("unexpected pass-through of {}", request.url()),
    }
  }

  #[tokio::test]
  async fn test_non_get_passes_through_without_cache_access() {
    let harness = Harness::new(ScriptedFetcher::new());
    harness.seed("/grades", "cached").await;
    let writes_before = harness.cache.write_count();

    let request = Request::new(Method::POST, url("/grades"));
    let outcome = harness.fetch(request).await;

    match outcome {
      FetchOutcome::PassThrough(request) => assert_eq!(*request.method(), Method::POST),
      other => panic!("expected pass-through, got {:?}", other),
    }
    assert_eq!(harness.cache.lookup_count(), 0);
    assert_eq!(harness.cache.write_count(), writes_before);
    assert_eq!(harness.fetcher.calls(), 0);
  }

  #[tokio::test]
  async fn test_api_request_passes_through_regardless_of_cache() {
    let harness = Harness::new(ScriptedFetcher::new().ok(&url("/api/grades").to_string(), "live"));
    harness.seed("/api/grades", "stale").await;
    let writes_before = harness.cache.write_count();

    let outcome = harness.fetch(get("/api/grades")).await;

    assert!(matches!(outcome, FetchOutcome::PassThrough(_)));
    assert_eq!(harness.cache.lookup_count(), 0);
    assert_eq!(harness.cache.write_count(), writes_before);
    assert_eq!(harness.fetcher.calls(), 0);
  }

  #[tokio::test]
  async fn test_malformed_url_passes_through() {
    let harness = Harness::new(ScriptedFetcher::new());

    let outcome = harness.fetch(get("/fetch(fetchRequest)")).await;

    assert!(matches!(outcome, FetchOutcome::PassThrough(_)));
    assert_eq!(harness.cache.lookup_count(), 0);
    assert_eq!(harness.cache.write_count(), 0);
    assert_eq!(harness.fetcher.calls(), 0);
  }

  #[tokio::test]
  async fn test_cache_hit_skips_network() {
    let harness = Harness::new(ScriptedFetcher::new().ok(&url("/dashboard").to_string(), "fresh"));
    harness.seed("/dashboard", "cached").await;

    let (response, write) = expect_response(harness.fetch(get("/dashboard")).await);

    assert_eq!(response.text(), "cached");
    assert!(write.is_none());
    assert_eq!(harness.fetcher.calls(), 0);
  }

  #[tokio::test]
  async fn test_miss_fetches_and_caches_basic_ok() {
    let harness = Harness::new(
      ScriptedFetcher::new().ok(&url("/static/app.js").to_string(), "console.log(1)"),
    );

    let (response, write) = expect_response(harness.fetch(get("/static/app.js")).await);
    assert_eq!(response.text(), "console.log(1)");
    assert_eq!(harness.fetcher.calls(), 1);

    write.expect("cache write should be scheduled").await.unwrap();

    let stored = harness
      .cache
      .match_request(&get("/static/app.js"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(stored.text(), "console.log(1)");

    // Served from cache from now on
    let (again, _) = expect_response(harness.fetch(get("/static/app.js")).await);
    assert_eq!(again.text(), "console.log(1)");
    assert_eq!(harness.fetcher.calls(), 1);
  }

  #[tokio::test]
  async fn test_error_status_not_cached() {
    let harness = Harness::new(ScriptedFetcher::new());

    let (response, write) = expect_response(harness.fetch(get("/missing.png")).await);

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(write.is_none());
    assert_eq!(harness.cache.len(), 0);
  }

  #[tokio::test]
  async fn test_cross_origin_response_not_cached() {
    let fetcher = ScriptedFetcher::new().route(
      "https://cdn.example.com/lib.js",
      StatusCode::OK,
      ResponseType::Cors,
      "lib",
    );
    let harness = Harness::new(fetcher);
    let request = Request::get(Url::parse("https://cdn.example.com/lib.js").unwrap());

    let (response, write) = expect_response(harness.fetch(request).await);

    assert_eq!(response.response_type(), ResponseType::Cors);
    assert_eq!(response.text(), "lib");
    assert!(write.is_none());
    assert_eq!(harness.cache.len(), 0);
  }

  #[tokio::test]
  async fn test_offline_html_gets_cached_shell() {
    let harness = Harness::new(ScriptedFetcher::new());
    harness.seed("/", "<html>grades shell</html>").await;
    harness.fetcher.set_offline(true);

    let (response, _) = expect_response(harness.fetch(html_get("/dashboard")).await);

    assert_eq!(response.text(), "<html>grades shell</html>");
    assert_eq!(harness.fetcher.calls(), 1);
  }

  #[tokio::test]
  async fn test_offline_non_html_gets_placeholder() {
    let harness = Harness::new(ScriptedFetcher::new());
    harness.seed("/", "<html>grades shell</html>").await;
    harness.fetcher.set_offline(true);

    let request = get("/static/data.json")
      .with_header(ACCEPT, HeaderValue::from_static("application/json"));
    let (response, _) = expect_response(harness.fetch(request).await);

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
      response.headers().get(CONTENT_TYPE).unwrap().to_str().unwrap(),
      "text/plain"
    );
    assert_eq!(response.text(), "Offline");
  }

  #[tokio::test]
  async fn test_offline_without_accept_gets_placeholder() {
    let harness = Harness::new(ScriptedFetcher::new());
    harness.fetcher.set_offline(true);

    let (response, _) = expect_response(harness.fetch(get("/static/icons/icon-72x72.png")).await);
    assert_eq!(response.text(), "Offline");
  }

  #[tokio::test]
  async fn test_offline_html_without_shell_gets_placeholder() {
    let harness = Harness::new(ScriptedFetcher::new());
    harness.fetcher.set_offline(true);

    let (response, _) = expect_response(harness.fetch(html_get("/dashboard")).await);
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text(), "Offline");
  }

  #[tokio::test]
  async fn test_fragment_shares_cache_entry() {
    let harness = Harness::new(ScriptedFetcher::new());
    harness.seed("/dashboard", "cached").await;

    let (response, _) = expect_response(harness.fetch(get("/dashboard#grades")).await);
    assert_eq!(response.text(), "cached");
    assert_eq!(harness.fetcher.calls(), 0);
  }

  /// Cache whose writes block until released.
  #[derive(Default)]
  struct GatedCache {
    release: tokio::sync::Notify,
    stored: std::sync::atomic::AtomicBool,
  }

  #[async_trait::async_trait]
  impl Cache for GatedCache {
    async fn match_request(&self, _request: &Request) -> color_eyre::Result<Option<Response>> {
      Ok(None)
    }

    async fn put(&self, _request: &Request, _response: Response) -> color_eyre::Result<()> {
      self.release.notified().await;
      self
        .stored
        .store(true, std::sync::atomic::Ordering::SeqCst);
      Ok(())
    }

    async fn add_all(&self, _entries: Vec<(Request, Response)>) -> color_eyre::Result<()> {
      Ok(())
    }

    async fn entries(&self) -> color_eyre::Result<Vec<crate::cache::CacheEntry>> {
      Ok(Vec::new())
    }
  }

  #[tokio::test]
  async fn test_response_does_not_wait_for_cache_write() {
    let policy = FetchPolicy::from_config(&Config::default()).unwrap();
    let fetcher = ScriptedFetcher::new().ok(&url("/static/app.css").to_string(), "body{}");
    let gated = Arc::new(GatedCache::default());
    let cache: Arc<dyn Cache> = gated.clone();

    let outcome = tokio::time::timeout(
      std::time::Duration::from_secs(5),
      on_fetch(get("/static/app.css"), &policy, Some(cache), &fetcher),
    )
    .await
    .expect("response must not wait for the cache write");

    let (response, write) = expect_response(outcome);
    assert_eq!(response.text(), "body{}");
    let write = write.expect("cache write should be scheduled");
    assert!(!gated.stored.load(std::sync::atomic::Ordering::SeqCst));

    gated.release.notify_one();
    write.await.unwrap();
    assert!(gated.stored.load(std::sync::atomic::Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_without_cache_uses_network_then_placeholder() {
    let policy = FetchPolicy::from_config(&Config::default()).unwrap();
    let fetcher = ScriptedFetcher::new().ok(&url("/dashboard").to_string(), "live");

    let (response, write) =
      expect_response(on_fetch(html_get("/dashboard"), &policy, None, &fetcher).await);
    assert_eq!(response.text(), "live");
    assert!(write.is_none());

    fetcher.set_offline(true);
    let (response, _) =
      expect_response(on_fetch(html_get("/dashboard"), &policy, None, &fetcher).await);
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text(), "Offline");
  }
}
