//! Network access for the proxy.

mod client;
#[cfg(test)]
pub mod fake;
mod types;

pub use client::{HttpClient, Network};
pub use types::{is_forwardable, Request, Response};
