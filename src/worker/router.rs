//! Request routing: decides per intercepted request whether and how the
//! cache is involved.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::sync::Arc;

use super::scope::Scope;
use crate::cache::{CacheLayer, CacheSource, CacheStorage};
use crate::config::{Config, Strategy};
use crate::net::{Network, Request, Response};

/// Request-handling mode. Only the network-first strategy ever leaves
/// `Online`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
  #[default]
  Online,
  /// The app shell could not be fetched; static assets come from cache first
  Offline,
}

impl std::fmt::Display for Mode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Mode::Online => write!(f, "online"),
      Mode::Offline => write!(f, "offline"),
    }
  }
}

/// How a request was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// No activated cache, or an empty asset list
  Uncontrolled,
  /// Anything but GET
  NonGet,
  CrossOrigin,
  Api,
  AppShell,
  /// Path whose last segment has a file extension
  StaticAsset,
  /// Any other page; never cached
  Page,
}

impl Route {
  pub fn uses_cache(&self) -> bool {
    matches!(self, Route::AppShell | Route::StaticAsset)
  }
}

/// Routing knobs taken from configuration
#[derive(Debug, Clone)]
pub struct RoutePolicy {
  pub strategy: Strategy,
  pub store_misses: bool,
  pub app_shell: String,
  pub api_prefix: String,
  pub has_assets: bool,
}

impl RoutePolicy {
  pub fn from_config(config: &Config) -> Self {
    Self {
      strategy: config.cache.strategy,
      store_misses: config.cache.store_misses,
      app_shell: config.app.app_shell.clone(),
      api_prefix: config.app.api_prefix.clone(),
      has_assets: !config.app.assets.is_empty(),
    }
  }
}

/// Outcome of routing one request
#[derive(Debug)]
pub struct Routed {
  pub response: Response,
  pub source: CacheSource,
  /// When the served copy was cached, if it came from the cache
  pub cached_at: Option<DateTime<Utc>>,
  pub route: Route,
  /// Mode observed by a network-first fetch. `None` when the request says
  /// nothing about connectivity and the current mode must stay as it is.
  pub mode: Option<Mode>,
}

/// Routes intercepted requests to the network, the cache, or both.
pub struct RequestRouter<S: CacheStorage, N: Network> {
  cache: CacheLayer<S>,
  network: Arc<N>,
  scope: Scope,
  policy: RoutePolicy,
  /// Name of the cache in control, if any
  controller: Option<String>,
}

impl<S: CacheStorage, N: Network> RequestRouter<S, N> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<N>,
    scope: Scope,
    policy: RoutePolicy,
    controller: Option<String>,
  ) -> Self {
    Self {
      cache: CacheLayer::new(storage),
      network,
      scope,
      policy,
      controller,
    }
  }

  pub fn scope(&self) -> &Scope {
    &self.scope
  }

  pub fn controller(&self) -> Option<&str> {
    self.controller.as_deref()
  }

  pub fn classify(&self, request: &Request) -> Route {
    if self.controller.is_none() || !self.policy.has_assets {
      return Route::Uncontrolled;
    }
    if !request.is_get() {
      return Route::NonGet;
    }
    if !self.scope.is_same_origin(&request.url) {
      return Route::CrossOrigin;
    }

    let path = request.url.path();
    if path.contains(self.policy.api_prefix.as_str()) {
      Route::Api
    } else if self.is_app_shell(path) {
      Route::AppShell
    } else if has_extension(path) {
      Route::StaticAsset
    } else {
      Route::Page
    }
  }

  /// An empty shell path means the app root itself.
  fn is_app_shell(&self, path: &str) -> bool {
    let shell = self.policy.app_shell.trim_matches('/');
    if shell.is_empty() {
      return path == self.scope.root().path();
    }
    path.ends_with(&format!("/{}", shell))
  }

  /// Handle one request in `mode`. Only network-first outcomes set
  /// [`Routed::mode`]; everything else leaves the caller's mode alone.
  pub async fn handle(&self, request: Request, mode: Mode) -> Result<Routed> {
    let route = self.classify(&request);

    let cache_name = match (&self.controller, route.uses_cache()) {
      (Some(name), true) => name.as_str(),
      _ => {
        let response = self.network.fetch(&request).await?;
        return Ok(Routed {
          response,
          source: CacheSource::Network,
          cached_at: None,
          route,
          mode: None,
        });
      }
    };

    let key = request.key();
    let fetch = || self.network.fetch(&request);

    let cache_first = match self.policy.strategy {
      Strategy::CacheFirst => true,
      Strategy::NetworkFirst => mode == Mode::Offline && route == Route::StaticAsset,
    };

    if cache_first {
      let result = self
        .cache
        .cache_first(cache_name, &key, self.policy.store_misses, fetch)
        .await?;
      return Ok(Routed {
        response: result.data,
        source: result.source,
        cached_at: result.cached_at,
        route,
        mode: None,
      });
    }

    let result = self.cache.network_first(cache_name, &key, fetch).await?;
    let mode = match result.source {
      CacheSource::Offline => Mode::Offline,
      _ => Mode::Online,
    };
    Ok(Routed {
      response: result.data,
      source: result.source,
      cached_at: result.cached_at,
      route,
      mode: Some(mode),
    })
  }
}

/// Whether the last path segment looks like `name.ext`.
fn has_extension(path: &str) -> bool {
  let segment = path.rsplit('/').next().unwrap_or("");
  segment
    .rfind('.')
    .is_some_and(|i| i > 0 && i + 1 < segment.len())
}
