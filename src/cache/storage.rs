//! SQLite-backed cache storage. Stores survive restarts of the worker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

use super::traits::{storable_key, Cache, CacheEntry, CacheStorage, RequestKey};
use crate::http::{Request, Response, ResponseType};

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named cache stores
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses keyed by request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    response_type TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_hash),
    FOREIGN KEY (cache_name) REFERENCES cache_stores(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_store ON cache_entries(cache_name);
"#;

type SharedConnection = Arc<Mutex<Connection>>;

fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>> {
  conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
}

/// SQLite-based set of named cache stores.
pub struct SqliteStorage {
  conn: SharedConnection,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn connect(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// A private database that disappears with the connection.
  #[cfg(test)]
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }
}

#[async_trait]
impl CacheStorage for SqliteStorage {
  async fn open(&self, name: &str) -> Result<Arc<dyn Cache>> {
    {
      let conn = lock(&self.conn)?;
      ensure_store(&conn, name)?;
    }

    Ok(Arc::new(SqliteCache {
      conn: Arc::clone(&self.conn),
      name: name.to_string(),
    }))
  }

  async fn keys(&self) -> Result<Vec<String>> {
    let conn = lock(&self.conn)?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  async fn delete(&self, name: &str) -> Result<bool> {
    let conn = lock(&self.conn)?;
    conn
      .execute(
        "DELETE FROM cache_entries WHERE cache_name = ?",
        params![name],
      )
      .map_err(|e| eyre!("Failed to delete entries of cache {}: {}", name, e))?;

    let removed = conn
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    Ok(removed > 0)
  }
}

/// Handle to one named store inside the SQLite database.
pub struct SqliteCache {
  conn: SharedConnection,
  name: String,
}

#[async_trait]
impl Cache for SqliteCache {
  async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
    let key = RequestKey::of(request);
    if !key.is_cacheable() {
      return Ok(None);
    }

    let conn = lock(&self.conn)?;
    let row: Option<(u16, String, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, response_type, headers, body FROM cache_entries
         WHERE cache_name = ? AND request_hash = ?",
        params![self.name, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in cache {}: {}", key.url(), self.name, e))?;

    match row {
      Some((status, response_type, headers, body)) => {
        let status = StatusCode::from_u16(status)
          .map_err(|e| eyre!("Invalid cached status {}: {}", status, e))?;
        let response_type = ResponseType::parse(&response_type)?;
        let headers = decode_headers(&headers)?;
        Ok(Some(Response::new(status, response_type, headers, body)))
      }
      None => Ok(None),
    }
  }

  async fn put(&self, request: &Request, response: Response) -> Result<()> {
    let key = storable_key(request)?;
    let conn = lock(&self.conn)?;
    ensure_store(&conn, &self.name)?;
    insert_entry(&conn, &self.name, &key, response)
  }

  async fn add_all(&self, entries: Vec<(Request, Response)>) -> Result<()> {
    let mut staged = Vec::with_capacity(entries.len());
    for (request, response) in entries {
      staged.push((storable_key(&request)?, response));
    }

    let mut conn = lock(&self.conn)?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_store(&tx, &self.name)?;
    for (key, response) in staged {
      insert_entry(&tx, &self.name, &key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  async fn entries(&self) -> Result<Vec<CacheEntry>> {
    let conn = lock(&self.conn)?;
    let mut stmt = conn
      .prepare(
        "SELECT method, url, status, cached_at FROM cache_entries
         WHERE cache_name = ?
         ORDER BY url",
      )
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let rows = stmt
      .query_map(params![self.name], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, u16>(2)?,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    rows
      .into_iter()
      .map(|(method, url, status, cached_at)| {
        let method = Method::from_bytes(method.as_bytes())
          .map_err(|e| eyre!("Invalid cached method '{}': {}", method, e))?;
        let url =
          Url::parse(&url).map_err(|e| eyre!("Invalid cached URL '{}': {}", url, e))?;
        Ok(CacheEntry {
          key: RequestKey::of(&Request::new(method, url)),
          status,
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }
}

fn ensure_store(conn: &Connection, name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to create cache {}: {}", name, e))?;
  Ok(())
}

fn insert_entry(conn: &Connection, name: &str, key: &RequestKey, response: Response) -> Result<()> {
  let (status, response_type, headers, body) = response.into_parts();
  let headers = encode_headers(&headers)?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (cache_name, request_hash, method, url, status, response_type, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        name,
        key.cache_hash(),
        key.method().as_str(),
        key.url(),
        status.as_u16(),
        response_type.as_str(),
        headers,
        body
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in cache {}: {}", key.url(), name, e))?;

  Ok(())
}

/// Serialize headers as a JSON list of name/value pairs. Non-UTF-8 values are dropped.
fn encode_headers(headers: &HeaderMap) -> Result<String> {
  let pairs: Vec<(&str, &str)> = headers
    .iter()
    .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
    .collect();
  serde_json::to_string(&pairs).map_err(|e| eyre!("Failed to serialize headers: {}", e))
}

fn decode_headers(json: &str) -> Result<HeaderMap> {
  let pairs: Vec<(String, String)> =
    serde_json::from_str(json).map_err(|e| eyre!("Failed to parse cached headers: {}", e))?;

  let mut headers = HeaderMap::new();
  for (name, value) in pairs {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| eyre!("Invalid cached header name '{}': {}", name, e))?;
    let value = HeaderValue::from_str(&value)
      .map_err(|e| eyre!("Invalid cached header value '{}': {}", value, e))?;
    headers.append(name, value);
  }
  Ok(headers)
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::CONTENT_TYPE;

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  fn html(body: &str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
    Response::new(StatusCode::OK, ResponseType::Basic, headers, body)
  }

  #[tokio::test]
  async fn test_put_and_match_preserves_response() {
    let storage = SqliteStorage::in_memory().unwrap();
    let cache = storage.open("grades-app-v1").await.unwrap();

    cache
      .put(&get("http://localhost/"), html("<h1>Grades</h1>"))
      .await
      .unwrap();

    let hit = cache
      .match_request(&get("http://localhost/"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(hit.status(), StatusCode::OK);
    assert_eq!(hit.response_type(), ResponseType::Basic);
    assert_eq!(
      hit.headers().get(CONTENT_TYPE).unwrap().to_str().unwrap(),
      "text/html"
    );
    assert_eq!(hit.text(), "<h1>Grades</h1>");
  }

  #[tokio::test]
  async fn test_stores_are_isolated() {
    let storage = SqliteStorage::in_memory().unwrap();
    let v1 = storage.open("v1").await.unwrap();
    let v2 = storage.open("v2").await.unwrap();

    v1.put(&get("http://localhost/"), html("one")).await.unwrap();
    assert!(v2
      .match_request(&get("http://localhost/"))
      .await
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_add_all_and_entries() {
    let storage = SqliteStorage::in_memory().unwrap();
    let cache = storage.open("v1").await.unwrap();

    cache
      .add_all(vec![
        (get("http://localhost/"), html("shell")),
        (get("http://localhost/static/manifest.json"), html("{}")),
      ])
      .await
      .unwrap();

    let entries = cache.entries().await.unwrap();
    let urls: Vec<&str> = entries.iter().map(|e| e.key.url()).collect();
    assert_eq!(
      urls,
      vec![
        "http://localhost/",
        "http://localhost/static/manifest.json"
      ]
    );
    assert!(entries.iter().all(|e| e.status == 200));
  }

  #[tokio::test]
  async fn test_add_all_is_atomic() {
    let storage = SqliteStorage::in_memory().unwrap();
    let cache = storage.open("v1").await.unwrap();
    let post = Request::new(Method::POST, Url::parse("http://localhost/x").unwrap());

    let result = cache
      .add_all(vec![(get("http://localhost/"), html("shell")), (post, html("x"))])
      .await;

    assert!(result.is_err());
    assert!(cache.entries().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_delete_store_removes_entries() {
    let storage = SqliteStorage::in_memory().unwrap();
    let cache = storage.open("v0").await.unwrap();
    cache.put(&get("http://localhost/"), html("old")).await.unwrap();

    assert!(storage.delete("v0").await.unwrap());
    assert!(storage.keys().await.unwrap().is_empty());

    let reopened = storage.open("v0").await.unwrap();
    assert!(reopened.entries().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_persists_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::connect(&path).unwrap();
      let cache = storage.open("v1").await.unwrap();
      cache.put(&get("http://localhost/"), html("kept")).await.unwrap();
    }

    let storage = SqliteStorage::connect(&path).unwrap();
    assert_eq!(storage.keys().await.unwrap(), vec!["v1"]);
    let cache = storage.open("v1").await.unwrap();
    let hit = cache
      .match_request(&get("http://localhost/"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(hit.text(), "kept");
  }

  #[test]
  fn test_header_encoding_keeps_repeated_values() {
    let mut headers = HeaderMap::new();
    headers.append("set-cookie", HeaderValue::from_static("a=1"));
    headers.append("set-cookie", HeaderValue::from_static("b=2"));

    let decoded = decode_headers(&encode_headers(&headers).unwrap()).unwrap();
    let values: Vec<&str> = decoded
      .get_all("set-cookie")
      .iter()
      .map(|v| v.to_str().unwrap())
      .collect();
    assert_eq!(values, vec!["a=1", "b=2"]);
  }
}
