//! Test Fixtures Module
//!
//! - A relay server bound to an ephemeral port, dialing a mock upstream
//! - WebSocket client helpers for session and viewer connections

// Allow dead code in test fixtures - not every test uses every helper
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use realtime_relay::core::realtime::openai_factory;
use realtime_relay::{AgentCatalog, ServerConfig, ToolRegistry, routes, state::AppState};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay configuration pointing at `upstream_url`.
pub fn relay_config(upstream_url: &str) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.openai_api_key = "test-key".to_string();
    config.openai_realtime_url = upstream_url.to_string();
    config.timezone = "UTC".to_string();
    config
}

/// Start a relay with the default agent catalog.
pub async fn start_relay(upstream_url: &str) -> (SocketAddr, Arc<AppState>) {
    start_relay_with_agents(upstream_url, AgentCatalog::default()).await
}

pub async fn start_relay_with_agents(
    upstream_url: &str,
    agents: AgentCatalog,
) -> (SocketAddr, Arc<AppState>) {
    let config = relay_config(upstream_url);
    let tools = ToolRegistry::with_builtins(&config.timezone);
    let state = AppState::with_parts(config, openai_factory(), agents, tools);

    let app = routes::api::create_api_router()
        .merge(routes::realtime::create_realtime_router())
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind relay");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

pub async fn connect_session(addr: SocketAddr, session_id: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws/{session_id}"))
        .await
        .expect("Failed to connect session socket");
    ws
}

pub async fn connect_viewer(addr: SocketAddr, session_id: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws/{session_id}/events"))
        .await
        .expect("Failed to connect viewer socket");
    ws
}

pub async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("Failed to send client message");
}

/// What the next frame on a relay socket turned out to be.
#[derive(Debug)]
pub enum Received {
    Json(Value),
    Closed(Option<CloseFrame>),
}

pub async fn next_frame(ws: &mut Client) -> Received {
    loop {
        let msg = timeout(FRAME_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for relay frame");
        match msg {
            Some(Ok(Message::Text(text))) => {
                return Received::Json(
                    serde_json::from_str(text.as_str()).expect("relay sent invalid JSON"),
                );
            }
            Some(Ok(Message::Close(frame))) => return Received::Closed(frame),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return Received::Closed(None),
        }
    }
}

pub async fn next_json(ws: &mut Client) -> Value {
    match next_frame(ws).await {
        Received::Json(value) => value,
        Received::Closed(frame) => panic!("socket closed unexpectedly: {frame:?}"),
    }
}

/// Skip frames until one of type `event_type` arrives.
pub async fn expect_type(ws: &mut Client, event_type: &str) -> Value {
    loop {
        let value = next_json(ws).await;
        if value["type"] == event_type {
            return value;
        }
    }
}

/// Skip frames until the socket closes; returns the close frame, if any.
pub async fn expect_close(ws: &mut Client) -> Option<CloseFrame> {
    loop {
        if let Received::Closed(frame) = next_frame(ws).await {
            return frame;
        }
    }
}

/// Poll until the registry has no session named `session_id`.
pub async fn wait_for_removal(state: &AppState, session_id: &str) {
    for _ in 0..100 {
        if !state.registry.list().iter().any(|id| id == session_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session {session_id} was never removed");
}
