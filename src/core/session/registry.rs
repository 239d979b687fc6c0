//! In-memory registry of live sessions, owned by the application state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::errors::{RelayError, RelayResult};

use super::session::{ClientRoute, Session};

/// Longest accepted session id.
pub const MAX_SESSION_ID_LEN: usize = 128;

pub const DEFAULT_VIEWER_BUFFER: usize = 256;

/// Session ids are 1..=128 characters of `[A-Za-z0-9_.-]`.
pub fn validate_session_id(id: &str) -> RelayResult<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(RelayError::InvalidSessionId(id.to_string()))
    }
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    viewer_buffer: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_VIEWER_BUFFER)
    }
}

impl SessionRegistry {
    pub fn new(viewer_buffer: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            viewer_buffer,
        }
    }

    /// Register a new session for `id`. Fails while a live session holds it.
    pub fn create(
        &self,
        id: &str,
        client_tx: mpsc::Sender<ClientRoute>,
    ) -> RelayResult<Arc<Session>> {
        validate_session_id(id)?;

        let mut sessions = self.sessions.write();
        if sessions.contains_key(id) {
            return Err(RelayError::SessionExists(id.to_string()));
        }
        let session = Arc::new(Session::new(id.to_string(), client_tx, self.viewer_buffer));
        sessions.insert(id.to_string(), session.clone());
        info!(session_id = %id, "Session registered");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> RelayResult<Arc<Session>> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(id.to_string()))
    }

    /// Remove `id` only if it still maps to `session`.
    pub fn remove(&self, id: &str, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(id) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Active session ids, oldest first.
    pub fn list(&self) -> Vec<String> {
        let sessions = self.sessions.read();
        let mut entries: Vec<_> = sessions
            .values()
            .map(|s| (s.created_at(), s.id().to_string()))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, id)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Shutdown: cancel every session, close its viewers and forget it. The
    /// owning connections finish their own teardown when they see the cancel.
    pub fn clear(&self) {
        let drained: Vec<_> = self.sessions.write().drain().map(|(_, s)| s).collect();
        if !drained.is_empty() {
            info!("Clearing {} active sessions", drained.len());
        }
        for session in drained {
            session.cancel_token().cancel();
            session.close_viewers();
        }
    }

    /// Tear a session down. Idempotent: returns false if another caller
    /// already started closing it.
    pub async fn teardown(&self, session: &Arc<Session>) -> bool {
        if !session.begin_close() {
            return false;
        }
        session.cancel_token().cancel();

        if let Some(upstream) = session.take_upstream()
            && let Err(e) = upstream.disconnect().await
        {
            warn!(session_id = %session.id(), "Failed to disconnect upstream: {}", e);
        }

        session.close_viewers();
        self.remove(session.id(), session);
        session.mark_closed();
        info!(session_id = %session.id(), "Session closed");
        true
    }
}
