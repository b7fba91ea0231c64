//! HTTP front end: every request that reaches the proxy is handed to the
//! request router, the way a browser hands fetch events to a worker.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response as HttpResponse};
use color_eyre::{eyre::eyre, Report, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::net::{is_forwardable, Network, Request, Response};
use crate::worker::{Mode, RequestRouter};

/// Shared handler state. The mode lives only here; the router receives it
/// per request and reports a new one only after a network-first fetch.
struct ProxyState<S: CacheStorage, N: Network> {
  router: Arc<RequestRouter<S, N>>,
  mode: Arc<watch::Sender<Mode>>,
}

impl<S: CacheStorage, N: Network> Clone for ProxyState<S, N> {
  fn clone(&self) -> Self {
    Self {
      router: Arc::clone(&self.router),
      mode: Arc::clone(&self.mode),
    }
  }
}

/// Build the axum app around a router.
pub fn app<S: CacheStorage + 'static, N: Network>(router: RequestRouter<S, N>) -> axum::Router {
  let (mode, _) = watch::channel(Mode::Online);
  let state = ProxyState {
    router: Arc::new(router),
    mode: Arc::new(mode),
  };

  axum::Router::new()
    .fallback(proxy::<S, N>)
    .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve<S: CacheStorage + 'static, N: Network>(
  listener: TcpListener,
  router: RequestRouter<S, N>,
) -> Result<()> {
  let addr = listener
    .local_addr()
    .map_err(|e| eyre!("Failed to read listen address: {}", e))?;
  info!(
    %addr,
    origin = %router.scope().root(),
    controller = router.controller().unwrap_or("none"),
    "serving"
  );

  axum::serve(listener, app(router))
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| eyre!("Server error: {}", e))
}

async fn shutdown_signal() {
  if tokio::signal::ctrl_c().await.is_err() {
    // No signal handler available, run until killed
    std::future::pending::<()>().await;
  }
  info!("shutting down");
}

async fn proxy<S: CacheStorage + 'static, N: Network>(
  State(state): State<ProxyState<S, N>>,
  method: Method,
  uri: Uri,
  headers: HeaderMap,
  body: Bytes,
) -> HttpResponse {
  let url = match state.router.scope().request_url(&uri.to_string()) {
    Ok(url) => url,
    Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
  };

  let headers = headers
    .iter()
    .filter(|(name, _)| is_forwardable(name.as_str()))
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();

  let request = Request {
    method: method.as_str().to_string(),
    url,
    headers,
    body: body.to_vec(),
  };
  let target = request.url.to_string();

  let mode = *state.mode.borrow();
  match state.router.handle(request, mode).await {
    Ok(routed) => {
      if let Some(next) = routed.mode {
        state.mode.send_if_modified(|current| {
          if *current == next {
            return false;
          }
          info!(from = %current, to = %next, "mode changed");
          *current = next;
          true
        });
      }
      debug!(
        %method,
        url = %target,
        route = ?routed.route,
        source = %routed.source,
        cached_at = ?routed.cached_at,
        status = routed.response.status,
        "served"
      );
      into_http(routed.response)
    }
    Err(e) => {
      warn!(%method, url = %target, "request failed: {}", e);
      error_response(StatusCode::BAD_GATEWAY, &e)
    }
  }
}

fn into_http(response: Response) -> HttpResponse {
  let mut builder = axum::http::Response::builder().status(response.status);
  for (name, value) in &response.headers {
    builder = builder.header(name.as_str(), value.as_str());
  }

  builder
    .body(Body::from(response.body))
    .unwrap_or_else(|e| {
      error_response(
        StatusCode::BAD_GATEWAY,
        &eyre!("Invalid upstream response: {}", e),
      )
    })
}

fn error_response(status: StatusCode, err: &Report) -> HttpResponse {
  (status, err.to_string()).into_response()
}
