//! Primary session WebSocket handler
//!
//! One client connection owns one session. The connection registers the
//! session, dials the upstream realtime API through the bridge, and then runs
//! a single receive loop translating client messages until either side goes
//! away. Teardown always runs through the registry.

use std::sync::Arc;

use axum::{
    extract::{
        Path, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::{select, time::Duration};
use tracing::{debug, error, info, warn};

use crate::core::bridge::UpstreamBridge;
use crate::core::session::media::{DEFAULT_IMAGE_PROMPT, chunk_ack_due};
use crate::core::session::{CLOSE_UPSTREAM_GONE, ClientRoute, ImageAssembler, RelayEvent};
use crate::errors::{RelayError, RelayResult};
use crate::state::AppState;

use super::messages::ClientMessage;

/// Outgoing queue depth for the client send task
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// How long the send task gets to flush a close frame
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Session WebSocket handler
///
/// Upgrades `GET /ws/{session_id}` to a WebSocket carrying the client
/// protocol (audio, text, images, interrupts) for one session.
pub async fn session_ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!(session_id = %session_id, "Session WebSocket upgrade requested");

    let max_size = state.config.max_message_size;
    let tasks = state.tasks.clone();
    ws.max_frame_size(max_size)
        .max_message_size(max_size)
        .on_upgrade(move |socket| {
            tasks.track_future(handle_session_socket(socket, session_id, state))
        })
}

async fn run_sender(
    mut sender: SplitSink<WebSocket, Message>,
    mut routes: mpsc::Receiver<ClientRoute>,
) {
    while let Some(route) = routes.recv().await {
        let (message, should_close) = match route {
            ClientRoute::Frame(frame) => (Message::Text(frame.to_string().into()), false),
            ClientRoute::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };

        if let Err(e) = sender.send(message).await {
            debug!("Failed to send WebSocket message: {}", e);
            break;
        }
        if should_close {
            break;
        }
    }
}

/// Let the send task flush what is queued, then stop it.
async fn finish_sender(sender_task: JoinHandle<()>, client_tx: mpsc::Sender<ClientRoute>) {
    drop(client_tx);
    let abort = sender_task.abort_handle();
    if tokio::time::timeout(CLOSE_GRACE, sender_task).await.is_err() {
        abort.abort();
    }
}

async fn handle_session_socket(socket: WebSocket, session_id: String, state: Arc<AppState>) {
    let (sender, mut receiver) = socket.split();
    let (client_tx, client_rx) = mpsc::channel::<ClientRoute>(CHANNEL_BUFFER_SIZE);
    let sender_task = tokio::spawn(run_sender(sender, client_rx));

    let session = match state.registry.create(&session_id, client_tx.clone()) {
        Ok(session) => session,
        Err(e) => {
            warn!(session_id = %session_id, "Rejecting session connection: {}", e);
            let _ = client_tx
                .send(ClientRoute::Close {
                    code: close_code::POLICY,
                    reason: e.to_string(),
                })
                .await;
            finish_sender(sender_task, client_tx).await;
            return;
        }
    };

    let bridge = match UpstreamBridge::open(
        session.clone(),
        &state.factory,
        state.config.realtime_config(),
        state.agents.clone(),
        state.tools.clone(),
    )
    .await
    {
        Ok(bridge) => bridge,
        Err(e) => {
            error!(session_id = %session_id, "Failed to open upstream: {}", e);
            session
                .send_to_client(RelayEvent::error(e.client_message()))
                .await;
            session
                .close_client(CLOSE_UPSTREAM_GONE, "upstream unavailable")
                .await;
            state.registry.teardown(&session).await;
            finish_sender(sender_task, client_tx).await;
            return;
        }
    };

    info!(session_id = %session_id, "Session WebSocket connection established");

    let cancel = session.cancel_token();
    let mut images =
        ImageAssembler::new(state.config.max_image_bytes, state.config.max_pending_images);

    loop {
        select! {
            _ = cancel.cancelled() => {
                debug!(session_id = %session_id, "Session cancelled");
                break;
            }
            msg_result = receiver.next() => match msg_result {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = process_client_text(text.as_str(), &bridge, &mut images).await {
                        if e.is_fatal() {
                            error!(session_id = %session_id, "Upstream unusable: {}", e);
                            break;
                        }
                        warn!(session_id = %session_id, "Client message failed: {}", e);
                        session
                            .send_to_client(RelayEvent::error(e.client_message()))
                            .await;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!(session_id = %session_id, "Ignoring binary frame: {} bytes", data.len());
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(session_id = %session_id, "Session WebSocket closed by client");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(session_id = %session_id, "Session WebSocket error: {}", e);
                    break;
                }
            }
        }
    }

    // Cleanup
    images.clear();
    state.registry.teardown(&session).await;
    session.close_client(close_code::NORMAL, "session closed").await;
    drop(bridge);
    drop(session);
    finish_sender(sender_task, client_tx).await;

    info!(session_id = %session_id, "Session WebSocket connection terminated");
}

async fn process_client_text(
    text: &str,
    bridge: &UpstreamBridge,
    images: &mut ImageAssembler,
) -> RelayResult<()> {
    let message = ClientMessage::parse(text)?;
    debug!(
        session_id = %bridge.session().id(),
        "Received {} message",
        message.message_type()
    );
    process_client_message(message, bridge, images).await
}

/// Translate one client message into upstream events and client acks.
async fn process_client_message(
    message: ClientMessage,
    bridge: &UpstreamBridge,
    images: &mut ImageAssembler,
) -> RelayResult<()> {
    let session = bridge.session();
    match message {
        ClientMessage::Audio { data } => bridge.send_audio(&data).await,
        ClientMessage::Text { text } => bridge.send_text(&text).await,
        ClientMessage::Interrupt => bridge.interrupt().await,
        ClientMessage::CommitAudio => bridge.commit_audio().await,
        ClientMessage::Image { data_url, text } => {
            let prompt = text
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_IMAGE_PROMPT.to_string());
            bridge
                .send_image(None, data_url.as_deref().unwrap_or_default(), &prompt)
                .await
        }
        ClientMessage::ImageStart { id, text } => {
            images.start(&id, text)?;
            session.send_to_client(RelayEvent::image_start_ack(&id)).await;
            Ok(())
        }
        ClientMessage::ImageChunk { id, chunk } => match images.push_chunk(&id, chunk) {
            Ok(count) => {
                if chunk_ack_due(count) {
                    session
                        .send_to_client(RelayEvent::image_chunk_ack(&id, count))
                        .await;
                }
                Ok(())
            }
            Err(RelayError::OrphanChunk(id)) => {
                warn!(session_id = %session.id(), "Dropping chunk for unknown image id {}", id);
                Ok(())
            }
            Err(e) => Err(e),
        },
        ClientMessage::ImageEnd { id } => {
            let image = images.finish(&id)?;
            bridge
                .send_image(Some(&image.id), &image.data_url, &image.prompt)
                .await
        }
    }
}
