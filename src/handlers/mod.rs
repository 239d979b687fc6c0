//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check, session listing and alerts webhook
//! - `realtime` - Session and viewer WebSockets

pub mod api;
pub mod realtime;

pub use realtime::{session_ws_handler, viewer_ws_handler};
