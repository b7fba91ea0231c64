//! In-process network double for router and lifecycle tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::client::Network;
use super::types::{Request, Response};

/// Serves canned responses by URL and records every fetch.
/// Unknown URLs answer 404; `set_offline(true)` makes every fetch fail.
/// A delayed URL checks the offline flag only after its delay.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Response>>,
  delays: Mutex<HashMap<String, Duration>>,
  offline: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(self, url: &str, body: &str) -> Self {
    self.set(url, Response::ok(body));
    self
  }

  pub fn set(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn with_delay(self, url: &str, delay: Duration) -> Self {
    self.delays.lock().unwrap().insert(url.to_string(), delay);
    self
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// URLs fetched so far, in order.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(url.clone());

    let delay = self.delays.lock().unwrap().get(&url).copied();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to fetch {}: network unreachable", url));
    }

    let routes = self.routes.lock().unwrap();
    Ok(
      routes
        .get(&url)
        .cloned()
        .unwrap_or_else(|| Response::with_status(404, "not found")),
    )
  }
}
