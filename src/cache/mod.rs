//! Response cache for offline support.
//!
//! This module provides the named multi-cache store behind the request router:
//! - Responses are keyed by request identity (method + URL)
//! - Caches are created by name and deleted as a whole
//! - Cache-first and network-first strategies live in [`CacheLayer`]

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheSource, RequestKey};
