//! HTTP service surface.
//!
//! Two routes: the generation endpoint consumed by the storefront UI, and
//! a read-only metrics endpoint for monitoring, optionally gated by a
//! shared secret.

pub mod config;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

pub use routes::AppState;

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/generate", post(routes::generate))
        .route("/api/metrics", get(routes::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
