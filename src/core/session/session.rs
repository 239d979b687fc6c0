//! A live relay session: history, viewer fan-out and lifecycle state.
//!
//! History mutation and viewer broadcast share one lock. A viewer that
//! subscribes under that lock receives the snapshot first and then every
//! later event, with nothing lost or duplicated in between.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::realtime::BaseRealtime;
use crate::errors::{RelayError, RelayResult};

use super::events::{Frame, RelayEvent};
use super::history::ConversationHistory;

/// Close code sent when a session ends because its upstream went away.
pub const CLOSE_UPSTREAM_GONE: u16 = 1011;

/// What the client send task should do next.
#[derive(Debug, Clone)]
pub enum ClientRoute {
    Frame(Frame),
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

struct SessionInner {
    state: SessionState,
    history: ConversationHistory,
    viewers: HashMap<Uuid, mpsc::Sender<Frame>>,
}

pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    inner: Mutex<SessionInner>,
    cancel: CancellationToken,
    client_tx: mpsc::Sender<ClientRoute>,
    upstream: Mutex<Option<Arc<dyn BaseRealtime>>>,
    /// Held across a whole `publish` so the client sees frames in the same
    /// order as the viewers
    publish_order: tokio::sync::Mutex<()>,
    viewer_buffer: usize,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(id: String, client_tx: mpsc::Sender<ClientRoute>, viewer_buffer: usize) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Connecting,
                history: ConversationHistory::new(),
                viewers: HashMap::new(),
            }),
            cancel: CancellationToken::new(),
            client_tx,
            upstream: Mutex::new(None),
            publish_order: tokio::sync::Mutex::new(()),
            // the snapshot must always fit in a fresh viewer queue
            viewer_buffer: viewer_buffer.max(1),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closing(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Closing | SessionState::Closed
        )
    }

    pub fn viewer_count(&self) -> usize {
        self.inner.lock().viewers.len()
    }

    pub fn history(&self) -> ConversationHistory {
        self.inner.lock().history.clone()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// `CONNECTING → ACTIVE`. Returns false if the session left `CONNECTING`.
    pub fn mark_active(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Connecting {
            return false;
        }
        inner.state = SessionState::Active;
        true
    }

    /// Enter `CLOSING`. Only the first caller gets `true`.
    pub fn begin_close(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Closing | SessionState::Closed => false,
            SessionState::Connecting | SessionState::Active => {
                inner.state = SessionState::Closing;
                true
            }
        }
    }

    pub fn mark_closed(&self) {
        self.inner.lock().state = SessionState::Closed;
    }

    // -------------------------------------------------------------------------
    // Upstream
    // -------------------------------------------------------------------------

    pub fn attach_upstream(&self, provider: Arc<dyn BaseRealtime>) -> RelayResult<()> {
        let mut upstream = self.upstream.lock();
        if upstream.is_some() {
            return Err(RelayError::UpstreamAlreadyAttached(self.id.clone()));
        }
        *upstream = Some(provider);
        Ok(())
    }

    pub fn upstream(&self) -> Option<Arc<dyn BaseRealtime>> {
        self.upstream.lock().clone()
    }

    pub fn take_upstream(&self) -> Option<Arc<dyn BaseRealtime>> {
        self.upstream.lock().take()
    }

    // -------------------------------------------------------------------------
    // Fan-out
    // -------------------------------------------------------------------------

    /// Register a viewer. Its queue starts with a `history_updated` snapshot.
    pub fn subscribe(&self) -> RelayResult<(Uuid, mpsc::Receiver<Frame>)> {
        let mut inner = self.inner.lock();
        if matches!(inner.state, SessionState::Closing | SessionState::Closed) {
            return Err(RelayError::NotFound(self.id.clone()));
        }

        let (tx, rx) = mpsc::channel(self.viewer_buffer);
        let snapshot = RelayEvent::HistoryUpdated {
            history: inner.history.snapshot(),
        }
        .to_frame();
        if tx.try_send(snapshot).is_err() {
            return Err(RelayError::SendFailure(self.id.clone()));
        }

        let viewer_id = Uuid::new_v4();
        inner.viewers.insert(viewer_id, tx);
        info!(session_id = %self.id, viewer_id = %viewer_id, "Viewer subscribed");
        Ok((viewer_id, rx))
    }

    pub fn unsubscribe(&self, viewer_id: &Uuid) -> bool {
        let removed = self.inner.lock().viewers.remove(viewer_id).is_some();
        if removed {
            debug!(session_id = %self.id, viewer_id = %viewer_id, "Viewer unsubscribed");
        }
        removed
    }

    /// Drop every viewer queue; their send tasks see the channel close.
    pub fn close_viewers(&self) {
        let viewers = std::mem::take(&mut self.inner.lock().viewers);
        if !viewers.is_empty() {
            debug!(session_id = %self.id, count = viewers.len(), "Closing viewers");
        }
    }

    /// Relay an optional raw upstream frame plus the relay events produced by
    /// `update`, to viewers and the client.
    ///
    /// `update` runs under the fan-out lock, so history changes and their
    /// broadcast are atomic with respect to `subscribe`.
    pub async fn publish<F>(&self, raw: Option<Frame>, update: F)
    where
        F: FnOnce(&mut ConversationHistory) -> Vec<RelayEvent>,
    {
        let _order = self.publish_order.lock().await;
        let frames = {
            let mut inner = self.inner.lock();
            let events = update(&mut inner.history);

            let mut frames = Vec::with_capacity(events.len() + 1);
            frames.extend(raw);
            frames.extend(events.iter().map(RelayEvent::to_frame));

            let session_id = &self.id;
            inner.viewers.retain(|viewer_id, tx| {
                for frame in &frames {
                    match tx.try_send(frame.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(
                                session_id = %session_id,
                                viewer_id = %viewer_id,
                                "{}",
                                RelayError::SendFailure(viewer_id.to_string())
                            );
                            return false;
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!(session_id = %session_id, viewer_id = %viewer_id, "Viewer gone");
                            return false;
                        }
                    }
                }
                true
            });
            frames
        };

        for frame in frames {
            self.send_route(ClientRoute::Frame(frame)).await;
        }
    }

    /// Publish relay events that carry no upstream frame.
    pub async fn broadcast(&self, events: Vec<RelayEvent>) {
        self.publish(None, move |_| events).await;
    }

    /// Send an event to the client only.
    pub async fn send_to_client(&self, event: RelayEvent) {
        self.send_route(ClientRoute::Frame(event.to_frame())).await;
    }

    /// Ask the client send task to close the socket.
    pub async fn close_client(&self, code: u16, reason: impl Into<String>) {
        self.send_route(ClientRoute::Close {
            code,
            reason: reason.into(),
        })
        .await;
    }

    async fn send_route(&self, route: ClientRoute) {
        if self.client_tx.send(route).await.is_err() {
            debug!(session_id = %self.id, "Client send task already gone");
        }
    }
}
