use std::path::Path;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Create the HTTP API router
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(api::health_check))
        .route("/sessions", get(api::list_sessions))
        .route("/alerts", post(api::receive_alert))
        .layer(TraceLayer::new_for_http())
}

/// Serve the browser UI (`/`), the viewer page (`/viewer`) and `/static/*`
/// from `static_dir`.
pub fn create_static_router(static_dir: &Path) -> Router<Arc<AppState>> {
    Router::new()
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .route_service("/viewer", ServeFile::new(static_dir.join("viewer.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
}
