//! HTTP endpoints: health, session listing and the alerts webhook.

use std::sync::Arc;

use axum::{Json, extract::State};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    fn ok() -> Self {
        Self { status: "ok" }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<String>,
}

/// `GET /health`
pub async fn health_check() -> Json<StatusResponse> {
    Json(StatusResponse::ok())
}

/// `GET /sessions`: active session ids, oldest first.
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.registry.list(),
    })
}

/// `POST /alerts`: accept an arbitrary JSON alert and log it.
pub async fn receive_alert(Json(payload): Json<Value>) -> Json<StatusResponse> {
    info!(alert = %payload, "Alert received");
    Json(StatusResponse::ok())
}
