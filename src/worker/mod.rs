//! The offline worker: lifecycle management and request routing.

mod lifecycle;
mod router;
mod scope;

pub use lifecycle::ServiceWorker;
pub use router::{Mode, RequestRouter, RoutePolicy};
pub use scope::Scope;
