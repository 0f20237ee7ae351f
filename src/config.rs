use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Cache store name. Bump the version suffix to invalidate everything cached so far.
pub const DEFAULT_CACHE_NAME: &str = "grades-app-v1";

/// Paths making up the application shell, precached on install.
pub const DEFAULT_PRECACHE: &[&str] = &[
  "/",
  "/static/manifest.json",
  "/static/icons/icon-72x72.png",
  "/static/icons/icon-96x96.png",
  "/static/icons/icon-128x128.png",
  "/static/icons/icon-144x144.png",
  "/static/icons/icon-152x152.png",
  "/static/icons/icon-192x192.png",
  "/static/icons/icon-384x384.png",
  "/static/icons/icon-512x512.png",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the application is served from; precache paths resolve against it
  pub origin: String,
  pub cache_name: String,
  /// Root-relative paths stored on install
  pub precache: Vec<String>,
  /// Requests whose URL contains this marker are never intercepted
  pub api_marker: String,
  /// URL substrings produced by broken request construction on the page.
  /// Matching requests are passed through untouched.
  pub malformed_markers: Vec<String>,
  /// Delete cache stores with any other name on activate
  pub cleanup_stale_caches: bool,
  /// Cache database location (defaults to the data directory)
  pub database: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8000".to_string(),
      cache_name: DEFAULT_CACHE_NAME.to_string(),
      precache: DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect(),
      api_marker: "/api/".to_string(),
      malformed_markers: vec!["fetchRequest)".to_string()],
      cleanup_stale_caches: true,
      database: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  /// 4. Built-in defaults
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  pub fn origin_url(&self) -> Result<Url> {
    let origin =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;
    if origin.cannot_be_a_base() {
      return Err(eyre!("Origin '{}' cannot be used as a base URL", self.origin));
    }
    Ok(origin)
  }

  /// Resolve a root-relative path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }

  /// The precache list as absolute URLs, in order.
  pub fn manifest_urls(&self) -> Result<Vec<Url>> {
    self.precache.iter().map(|p| self.resolve(p)).collect()
  }

  /// URL of the shell document served to offline navigations.
  pub fn shell_url(&self) -> Result<Url> {
    self.resolve("/")
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => Ok(data_dir()?.join("cache.db")),
    }
  }
}

/// Per-user data directory for the cache database and logs.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("shellcache"))
}
