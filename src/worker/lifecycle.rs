//! Worker lifecycle: install pre-caches the asset list, activate purges
//! stale caches and takes control.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

use super::router::{RequestRouter, RoutePolicy};
use super::scope::Scope;
use crate::cache::{CacheStorage, RequestKey};
use crate::config::CacheConfig;
use crate::net::{Network, Request, Response};

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Created, nothing done yet
  Parsed,
  Installing,
  /// Assets cached, waiting to activate
  Installed,
  Activating,
  /// In control of requests
  Activated,
  /// Install failed; this worker will never control anything
  Redundant,
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      WorkerState::Parsed => write!(f, "parsed"),
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Activated => write!(f, "activated"),
      WorkerState::Redundant => write!(f, "redundant"),
    }
  }
}

/// One version of the app's offline cache, from install to control.
pub struct ServiceWorker<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  scope: Scope,
  assets: Vec<String>,
  explicit_name: Option<String>,
  prefix: Option<String>,
  name_prefix: String,
  state: WorkerState,
  cache_name: Option<String>,
}

impl<S: CacheStorage, N: Network> ServiceWorker<S, N> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<N>,
    scope: Scope,
    cache: &CacheConfig,
    assets: Vec<String>,
  ) -> Self {
    Self {
      storage,
      network,
      scope,
      assets,
      explicit_name: cache.name.clone(),
      prefix: cache.prefix.clone(),
      name_prefix: cache.name_prefix().to_string(),
      state: WorkerState::Parsed,
      cache_name: None,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Fetch every asset and store them under the current cache name.
  ///
  /// Any failed fetch or non-success status aborts the install; nothing is
  /// written and the worker becomes redundant.
  pub async fn install(&mut self) -> Result<String> {
    self.state = WorkerState::Installing;
    info!(assets = self.assets.len(), "installing");

    match self.populate().await {
      Ok(name) => {
        info!(cache = %name, "installed");
        self.state = WorkerState::Installed;
        self.cache_name = Some(name.clone());
        Ok(name)
      }
      Err(e) => {
        warn!("install failed: {}", e);
        self.state = WorkerState::Redundant;
        Err(e)
      }
    }
  }

  async fn populate(&self) -> Result<String> {
    let urls = self
      .assets
      .iter()
      .map(|asset| self.scope.resolve(asset))
      .collect::<Result<Vec<_>>>()?;

    let entries = try_join_all(urls.into_iter().map(|url| self.fetch_asset(url))).await?;

    let name = match &self.explicit_name {
      Some(name) => name.clone(),
      None => derive_cache_name(&self.name_prefix, &self.assets, &entries),
    };

    self.storage.add_all(&name, &entries)?;
    Ok(name)
  }

  async fn fetch_asset(&self, url: url::Url) -> Result<(RequestKey, Response)> {
    let request = Request::get(url);
    let response = self.network.fetch(&request).await?;
    if !response.is_success() {
      return Err(eyre!(
        "Failed to fetch asset {}: status {}",
        request.url,
        response.status
      ));
    }
    Ok((request.key(), response))
  }

  /// Delete stale caches and take control. Returns the deleted names.
  pub fn activate(&mut self) -> Result<Vec<String>> {
    let current = match (self.state, &self.cache_name) {
      (WorkerState::Installed, Some(name)) => name.clone(),
      _ => return Err(eyre!("Cannot activate a worker in state {}", self.state)),
    };
    self.state = WorkerState::Activating;

    let mut deleted = Vec::new();
    for name in self.storage.keys()? {
      if name == current {
        continue;
      }
      if let Some(prefix) = &self.prefix {
        if !name.starts_with(prefix.as_str()) {
          continue;
        }
      }
      info!(cache = %name, "clearing stale cache");
      self.storage.delete(&name)?;
      deleted.push(name);
    }

    self.storage.set_active(&current)?;
    self.state = WorkerState::Activated;
    info!(cache = %current, "activated");

    Ok(deleted)
  }

  /// Cache in control of requests: this worker's once activated, otherwise
  /// whichever cache was last activated.
  pub fn controller(&self) -> Result<Option<String>> {
    match (self.state, &self.cache_name) {
      (WorkerState::Activated, Some(name)) => Ok(Some(name.clone())),
      _ => self.storage.active(),
    }
  }

  /// Build the request router for the cache in control.
  pub fn router(&self, policy: RoutePolicy) -> Result<RequestRouter<S, N>> {
    Ok(RequestRouter::new(
      Arc::clone(&self.storage),
      Arc::clone(&self.network),
      self.scope.clone(),
      policy,
      self.controller()?,
    ))
  }
}

/// `<prefix>_<digest>` over the sorted asset paths and their bodies, so the
/// name changes whenever any asset does.
pub fn derive_cache_name(
  prefix: &str,
  assets: &[String],
  entries: &[(RequestKey, Response)],
) -> String {
  let mut pairs: Vec<(&String, &Response)> = assets
    .iter()
    .zip(entries.iter().map(|(_, response)| response))
    .collect();
  pairs.sort_by(|a, b| a.0.cmp(b.0));

  let mut hasher = Sha256::new();
  for (path, response) in pairs {
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(&response.body);
    hasher.update([0u8]);
  }
  let digest = hex::encode(hasher.finalize());

  format!("{}_{}", prefix, &digest[..16])
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::config::Strategy;
  use crate::net::fake::FakeNetwork;

  const ROOT: &str = "https://example.com/tt/";

  fn assets() -> Vec<String> {
    vec!["app".to_string(), "app.js".to_string(), "style.css".to_string()]
  }

  fn network() -> FakeNetwork {
    FakeNetwork::new()
      .with("https://example.com/tt/app", "<html>")
      .with("https://example.com/tt/app.js", "js")
      .with("https://example.com/tt/style.css", "css")
  }

  fn worker(
    network: FakeNetwork,
    cache: CacheConfig,
  ) -> (
    ServiceWorker<SqliteStorage, FakeNetwork>,
    Arc<SqliteStorage>,
    Arc<FakeNetwork>,
  ) {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(network);
    let worker = ServiceWorker::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      Scope::new(ROOT).unwrap(),
      &cache,
      assets(),
    );
    (worker, storage, network)
  }

  fn named(name: &str, prefix: Option<&str>) -> CacheConfig {
    CacheConfig {
      name: Some(name.to_string()),
      prefix: prefix.map(String::from),
      ..CacheConfig::default()
    }
  }

  #[tokio::test]
  async fn test_install_caches_every_asset() {
    let (mut worker, storage, _) = worker(network(), named("v1", None));

    let name = worker.install().await.unwrap();

    assert_eq!(name, "v1");
    assert_eq!(worker.state(), WorkerState::Installed);
    let scope = Scope::new(ROOT).unwrap();
    for asset in assets() {
      let key = RequestKey::get(&scope.resolve(&asset).unwrap());
      assert!(
        storage.match_request("v1", &key).unwrap().is_some(),
        "{} missing from cache",
        asset
      );
    }
  }

  #[tokio::test]
  async fn test_install_fails_on_missing_asset() {
    let network = FakeNetwork::new()
      .with("https://example.com/tt/app", "<html>")
      .with("https://example.com/tt/app.js", "js");
    let (mut worker, storage, _) = worker(network, named("v1", None));

    let err = worker.install().await.unwrap_err();

    assert!(err.to_string().contains("style.css"));
    assert_eq!(worker.state(), WorkerState::Redundant);
    assert!(storage.keys().unwrap().is_empty());
    assert!(worker.activate().is_err());
  }

  #[tokio::test]
  async fn test_install_fails_offline() {
    let (mut worker, storage, network) = worker(network(), named("v1", None));
    network.set_offline(true);

    assert!(worker.install().await.is_err());
    assert!(storage.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_activate_purges_every_other_cache() {
    let (mut worker, storage, _) = worker(network(), named("v2", None));
    storage.open("v1").unwrap();
    storage.open("unrelated").unwrap();

    worker.install().await.unwrap();
    let deleted = worker.activate().unwrap();

    assert_eq!(deleted, vec!["v1", "unrelated"]);
    assert_eq!(storage.keys().unwrap(), vec!["v2"]);
    assert_eq!(storage.active().unwrap(), Some("v2".to_string()));
    assert_eq!(worker.state(), WorkerState::Activated);
  }

  #[tokio::test]
  async fn test_activate_respects_prefix() {
    let (mut worker, storage, _) = worker(network(), named("timetagger_v2", Some("timetagger")));
    storage.open("timetagger_v1").unwrap();
    storage.open("other_app").unwrap();

    worker.install().await.unwrap();
    worker.activate().unwrap();

    assert_eq!(storage.keys().unwrap(), vec!["other_app", "timetagger_v2"]);
  }

  #[tokio::test]
  async fn test_activate_requires_install() {
    let (mut worker, _, _) = worker(network(), named("v1", None));
    assert!(worker.activate().is_err());
    assert_eq!(worker.state(), WorkerState::Parsed);
  }

  #[tokio::test]
  async fn test_derived_name_tracks_asset_contents() {
    let (mut first, _, _) = worker(network(), CacheConfig::default());
    let name_a = first.install().await.unwrap();

    let (mut same, _, _) = worker(network(), CacheConfig::default());
    assert_eq!(same.install().await.unwrap(), name_a);

    let changed = network().with("https://example.com/tt/app.js", "js v2");
    let (mut second, _, _) = worker(changed, CacheConfig::default());
    let name_b = second.install().await.unwrap();

    assert!(name_a.starts_with("swcache_"));
    assert_ne!(name_a, name_b);
  }

  #[tokio::test]
  async fn test_failed_install_keeps_previous_controller() {
    let (mut worker, storage, network) = worker(network(), named("v2", None));
    storage.open("v1").unwrap();
    storage.set_active("v1").unwrap();
    network.set_offline(true);

    assert!(worker.install().await.is_err());
    assert_eq!(worker.controller().unwrap(), Some("v1".to_string()));
  }

  #[tokio::test]
  async fn test_router_is_controlled_after_activate() {
    let (mut worker, _, _) = worker(network(), named("v1", None));
    let policy = RoutePolicy {
      strategy: Strategy::CacheFirst,
      store_misses: true,
      app_shell: "app".to_string(),
      api_prefix: "/api/".to_string(),
      has_assets: true,
    };

    assert_eq!(worker.router(policy.clone()).unwrap().controller(), None);

    worker.install().await.unwrap();
    worker.activate().unwrap();
    assert_eq!(worker.router(policy).unwrap().controller(), Some("v1"));
  }

  #[test]
  fn test_derive_cache_name_ignores_asset_order() {
    let response = |body: &str| Response::ok(body);
    let key = RequestKey::get(&url::Url::parse(ROOT).unwrap());
    let a = vec!["a.js".to_string(), "b.js".to_string()];
    let b = vec!["b.js".to_string(), "a.js".to_string()];

    let name_a = derive_cache_name(
      "p",
      &a,
      &[(key.clone(), response("A")), (key.clone(), response("B"))],
    );
    let name_b = derive_cache_name(
      "p",
      &b,
      &[(key.clone(), response("B")), (key, response("A"))],
    );

    assert_eq!(name_a, name_b);
    assert_eq!(name_a.len(), "p_".len() + 16);
  }
}
