//! Shared application state, the router and the health endpoint.

use crate::api::proxy::proxy_handler;
use crate::core::config::AppConfig;
use crate::core::recorder::Recorder;
use axum::{routing::any, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub http_client: reqwest::Client,
    pub recorder: Arc<Recorder>,
}

impl AppState {
    pub fn new(config: AppConfig, http_client: reqwest::Client, recorder: Arc<Recorder>) -> Self {
        Self {
            config,
            http_client,
            recorder,
        }
    }
}

/// Liveness probe. Never forwarded, never recorded.
pub async fn health() -> &'static str {
    "OK"
}

/// Build the router: `/health` plus the catch-all proxy.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", any(health))
        .fallback(proxy_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// HTTP client used for every upstream call.
///
/// Redirects are handed back to the caller untouched. The timeout covers the
/// whole exchange including streamed bodies.
pub fn create_http_client(config: &AppConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
}
