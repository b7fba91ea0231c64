use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::RequestKey;

/// Headers that describe a single connection and must not be forwarded
/// by a proxy. The encoding pair is here because the client negotiates
/// compression itself and hands us decoded bodies.
const HOP_BY_HOP: &[&str] = &[
  "connection",
  "keep-alive",
  "proxy-authenticate",
  "proxy-authorization",
  "proxy-connection",
  "te",
  "trailer",
  "transfer-encoding",
  "upgrade",
  "host",
  "content-length",
  "content-encoding",
  "accept-encoding",
];

/// Whether a header should travel through the proxy.
pub fn is_forwardable(name: &str) -> bool {
  !HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// An intercepted request
#[derive(Debug, Clone)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Request {
  /// A bodyless GET, as issued when pre-fetching assets.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Cache identity of this request.
  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// A response, either fresh from the network or replayed from a cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  /// True for 2xx statuses. Only these are ever written to a cache.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  #[cfg(test)]
  pub fn ok(body: &str) -> Self {
    Self::with_status(200, body)
  }

  #[cfg(test)]
  pub fn with_status(status: u16, body: &str) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.as_bytes().to_vec(),
    }
  }
}
