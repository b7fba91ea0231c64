mod cache;
mod config;
mod logging;
mod net;
mod server;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use cache::{CacheStorage, SqliteStorage};
use config::Config;
use net::HttpClient;
use worker::{RoutePolicy, Scope, ServiceWorker};

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "An offline caching proxy that serves a web app with service-worker cache semantics")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install and activate the current cache, then proxy requests (default)
  Serve {
    /// Address to listen on, overriding the config file
    #[arg(short, long)]
    listen: Option<SocketAddr>,
  },
  /// Install and activate the current cache, then exit
  Install,
  /// List caches in the store
  Caches,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);

  match args.command.unwrap_or(Command::Serve { listen: None }) {
    Command::Serve { listen } => run_serve(&config, storage, listen).await,
    Command::Install => run_install(&config, storage).await,
    Command::Caches => list_caches(storage.as_ref()),
  }
}

fn new_worker(
  config: &Config,
  storage: Arc<SqliteStorage>,
) -> Result<ServiceWorker<SqliteStorage, HttpClient>> {
  let network = Arc::new(HttpClient::new(&config.network)?);
  let scope = Scope::new(&config.app.origin)?;

  Ok(ServiceWorker::new(
    storage,
    network,
    scope,
    &config.cache,
    config.app.assets.clone(),
  ))
}

async fn run_serve(
  config: &Config,
  storage: Arc<SqliteStorage>,
  listen: Option<SocketAddr>,
) -> Result<()> {
  let mut worker = new_worker(config, storage)?;

  // A failed install leaves the previously active cache in control; the
  // next start tries again.
  match worker.install().await {
    Ok(_) => {
      worker.activate()?;
    }
    Err(e) => warn!(
      state = %worker.state(),
      "Keeping previous cache after failed install: {}",
      e
    ),
  }

  let router = worker.router(RoutePolicy::from_config(config))?;
  let addr = listen.unwrap_or(config.server.listen);
  let listener = tokio::net::TcpListener::bind(addr)
    .await
    .map_err(|e| eyre!("Failed to listen on {}: {}", addr, e))?;

  server::serve(listener, router).await
}

async fn run_install(config: &Config, storage: Arc<SqliteStorage>) -> Result<()> {
  let mut worker = new_worker(config, storage)?;

  let name = worker.install().await?;
  let deleted = worker.activate()?;

  println!("Activated {} ({} assets)", name, config.app.assets.len());
  for stale in deleted {
    println!("Deleted {}", stale);
  }
  Ok(())
}

fn list_caches(storage: &SqliteStorage) -> Result<()> {
  let active = storage.active()?;

  for name in storage.keys()? {
    let marker = if active.as_deref() == Some(name.as_str()) {
      "*"
    } else {
      " "
    };
    println!("{} {} ({} entries)", marker, name, storage.entry_count(&name)?);
  }
  Ok(())
}
