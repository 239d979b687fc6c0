//! Viewer WebSocket handler
//!
//! Viewers get a read-only mirror of a session: the history snapshot first,
//! then every frame the session relays. Anything a viewer sends is ignored.

use std::sync::Arc;

use axum::{
    extract::{
        Path, State,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::select;
use tracing::{debug, info};

use crate::state::AppState;

/// Viewer WebSocket handler for `GET /ws/{session_id}/events`.
pub async fn viewer_ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let tasks = state.tasks.clone();
    ws.on_upgrade(move |socket| tasks.track_future(handle_viewer_socket(socket, session_id, state)))
}

async fn handle_viewer_socket(socket: WebSocket, session_id: String, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let subscription = state
        .registry
        .get(&session_id)
        .and_then(|session| session.subscribe().map(|(id, rx)| (session, id, rx)));

    let (session, viewer_id, mut frames) = match subscription {
        Ok(subscription) => subscription,
        Err(e) => {
            info!(session_id = %session_id, "Rejecting viewer: {}", e);
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: Utf8Bytes::from_static("Unknown session"),
                })))
                .await;
            return;
        }
    };

    loop {
        select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    // session closed, or this viewer fell behind and was dropped
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: Utf8Bytes::from_static("session closed"),
                        })))
                        .await;
                    break;
                }
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    session.unsubscribe(&viewer_id);
    debug!(session_id = %session_id, viewer_id = %viewer_id, "Viewer connection terminated");
}
