mod cache;
mod config;
mod http;
mod network;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::cache::{CacheStorage, MemoryStorage, SqliteStorage};
use crate::http::{Request, Response};
use crate::network::HttpFetcher;
use crate::worker::{FetchOutcome, Worker};

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline-first caching shim for the grades web app shell")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin the app is served from (overrides the config file)
  #[arg(short, long)]
  origin: Option<String>,

  /// Keep cache stores in memory instead of the database
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the application shell
  Install,
  /// Delete cache stores left by older versions
  Activate,
  /// Route one request through the worker and print the response
  Fetch {
    /// Absolute URL or path relative to the origin
    target: String,
    /// Accept header to send
    #[arg(short, long)]
    accept: Option<String>,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
  },
  /// Show cache stores and the entries of the current one
  List,
  /// Delete the current cache store
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging()?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    config::Config { origin, ..config }
  } else {
    config
  };

  let storage: Arc<dyn CacheStorage> = if args.ephemeral {
    Arc::new(MemoryStorage::new())
  } else {
    Arc::new(SqliteStorage::connect(&config.database_path()?)?)
  };
  let fetcher = Arc::new(HttpFetcher::new(config.origin_url()?)?);
  let worker = Worker::new(&config, storage, fetcher)?;

  match args.command {
    Command::Install => {
      let count = worker.install().await?;
      println!("Cached {} assets in {}", count, worker.cache_name());
    }
    Command::Activate => {
      let removed = worker.activate().await?;
      if removed.is_empty() {
        println!("No stale caches");
      }
      for name in removed {
        println!("Deleted {}", name);
      }
    }
    Command::Fetch {
      target,
      accept,
      method,
    } => {
      let request = build_request(&config, &target, &method, accept.as_deref())?;
      fetch(&worker, request).await?;
    }
    Command::List => list(&worker).await?,
    Command::Clear => {
      if worker.storage().delete(worker.cache_name()).await? {
        println!("Deleted {}", worker.cache_name());
      } else {
        println!("{} does not exist", worker.cache_name());
      }
    }
  }

  Ok(())
}

/// Log to a file in the data directory so stdout stays clean.
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = config::data_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::never(&log_dir, "shellcache.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shellcache=info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

fn build_request(
  config: &config::Config,
  target: &str,
  method: &str,
  accept: Option<&str>,
) -> Result<Request> {
  let url = config.resolve(target)?;
  let method = Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;

  let mut request = Request::new(method, url);
  if let Some(accept) = accept {
    let value = HeaderValue::from_str(accept)
      .map_err(|e| eyre!("Invalid Accept header '{}': {}", accept, e))?;
    request = request.with_header(ACCEPT, value);
  }
  Ok(request)
}

async fn fetch(worker: &Worker, request: Request) -> Result<()> {
  match worker.fetch(request).await {
    FetchOutcome::PassThrough(request) => {
      println!("(passed through)");
      let response = worker.fetcher().fetch(request).await?;
      print_response(response);
    }
    FetchOutcome::Respond { response, write } => {
      print_response(response);
      // The process is about to exit; let the cache write land first
      if let Some(write) = write {
        if let Err(e) = write.await {
          tracing::warn!(error = %e, "Cache write task failed");
        }
      }
    }
  }
  Ok(())
}

fn print_response(response: Response) {
  println!(
    "HTTP {} ({})",
    response.status(),
    response.response_type()
  );
  for (name, value) in response.headers() {
    println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
  }
  println!();
  println!("{}", response.text());
}

async fn list(worker: &Worker) -> Result<()> {
  for name in worker.storage().keys().await? {
    let marker = if name == worker.cache_name() { "*" } else { " " };
    println!("{} {}", marker, name);
  }

  let cache = worker.cache().await?;
  for entry in cache.entries().await? {
    println!(
      "  {} {} {} {}",
      entry.key.method(),
      entry.key.url(),
      entry.status,
      entry.cached_at.format("%Y-%m-%d %H:%M:%S")
    );
  }
  Ok(())
}
