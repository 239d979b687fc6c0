//! Session WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::realtime::{session_ws_handler, viewer_ws_handler};
use crate::state::AppState;
use std::sync::Arc;

/// Create the session WebSocket router
///
/// # Endpoints
///
/// - `GET /ws/{session_id}` - Primary duplex connection for one session
/// - `GET /ws/{session_id}/events` - Read-only viewer stream
///
/// # Example
///
/// ```json
/// // Client sends text
/// {"type": "text", "text": "Hola"}
///
/// // Server acknowledges, then relays upstream events
/// {"type": "client_info", "info": "text_enqueued"}
/// {"type": "conversation.item.created", "item": {...}}
/// {"type": "history_added", "item": {...}}
/// ```
pub fn create_realtime_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/{session_id}", get(session_ws_handler))
        .route("/ws/{session_id}/events", get(viewer_ws_handler))
        .layer(TraceLayer::new_for_http())
}
