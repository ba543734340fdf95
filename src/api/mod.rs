//! HTTP surface of the recording proxy.
//!
//! - [`handlers`]: state, router and `/health`
//! - [`proxy`]: the catch-all forwarding handler
//! - [`streaming`]: body relays that capture while forwarding
//! - [`guard`]: exactly-once finalization of a request's recording

pub mod guard;
pub mod handlers;
pub mod proxy;
pub mod streaming;

pub use handlers::{build_router, create_http_client, health, AppState};
pub use proxy::proxy_handler;
