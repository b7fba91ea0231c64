//! Cache layer that orchestrates caching strategies with network fetching.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{CacheResult, RequestKey};
use crate::net::Response;

/// Cache layer that applies a caching strategy around a network fetch.
///
/// This layer sits between the request router and the network client. It
/// never decides *whether* a request is cacheable; the router does that.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer over the given storage backend.
  pub fn new(storage: Arc<S>) -> Self {
    Self { storage }
  }

  /// Cache-first strategy.
  ///
  /// 1. Check cache - on hit, return without touching the network
  /// 2. On miss, fetch from network
  /// 3. If `store_miss` is set and the response is a success, store it
  pub async fn cache_first<F, Fut>(
    &self,
    cache: &str,
    key: &RequestKey,
    store_miss: bool,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    if let Some(cached) = self.storage.match_request(cache, key)? {
      return Ok(CacheResult::from_cache(cached.response, cached.stored_at));
    }

    debug!(url = %key.url, "cache miss");
    let response = fetcher().await?;
    if store_miss {
      self.store(cache, key, &response);
    }
    Ok(CacheResult::from_network(response))
  }

  /// Network-first strategy with cache fallback.
  ///
  /// 1. Fetch from network - on success, store a copy and return it
  /// 2. On network failure, return the cached copy (offline)
  /// 3. With nothing cached, the network error propagates
  pub async fn network_first<F, Fut>(
    &self,
    cache: &str,
    key: &RequestKey,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    match fetcher().await {
      Ok(response) => {
        self.store(cache, key, &response);
        Ok(CacheResult::from_network(response))
      }
      Err(err) => match self.storage.match_request(cache, key)? {
        Some(cached) => {
          debug!(url = %key.url, error = %err, "network failed, serving cached copy");
          Ok(CacheResult::offline(cached.response, cached.stored_at))
        }
        None => Err(err),
      },
    }
  }

  /// Store a successful response. A failed write is logged, not returned,
  /// since the response itself is still good to serve.
  fn store(&self, cache: &str, key: &RequestKey, response: &Response) {
    if !response.is_success() {
      return;
    }
    if let Err(e) = self.storage.put(cache, key, response) {
      warn!(url = %key.url, "Failed to cache response: {}", e);
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}
