//! Relay-level error taxonomy.
//!
//! None of these are retried. `NotFound`, `MalformedMessage`, `OrphanChunk`,
//! the image limits and `SendFailure` are absorbed where they happen; the
//! connection that hit them stays open. `UpstreamDisconnect` and `Upstream`
//! end the owning session.

use thiserror::Error;

use crate::core::realtime::RealtimeError;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Lookup of an unknown or already removed session
    #[error("Session not found: {0}")]
    NotFound(String),

    /// A live session already holds this id
    #[error("Session already active: {0}")]
    SessionExists(String),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// A session already has its single upstream connection
    #[error("Session {0} already has an upstream connection")]
    UpstreamAlreadyAttached(String),

    #[error("Upstream disconnected: {0}")]
    UpstreamDisconnect(String),

    /// Unparseable JSON or unknown message type
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Image chunk or end for an upload that was never started
    #[error("Unknown image upload id: {0}")]
    OrphanChunk(String),

    #[error("Image upload {id} exceeds {limit} bytes")]
    ImageTooLarge { id: String, limit: usize },

    #[error("Too many pending image uploads (limit {0})")]
    TooManyUploads(usize),

    #[error("Empty image upload: {0}")]
    EmptyImage(String),

    #[error("Empty text message")]
    EmptyText,

    /// Single-shot `image` message without a data URL
    #[error("Image message without data_url")]
    MissingDataUrl,

    /// A viewer queue was full or closed
    #[error("Failed to deliver event to viewer {0}")]
    SendFailure(String),

    #[error(transparent)]
    Upstream(#[from] RealtimeError),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// Message sent to the client in an `error` event.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::EmptyText => "Empty text message.".to_string(),
            RelayError::EmptyImage(_) => "Empty image.".to_string(),
            RelayError::OrphanChunk(_) => "Unknown image id for image_end.".to_string(),
            RelayError::MissingDataUrl => "No data_url for image message.".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether this error ends the session that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::UpstreamDisconnect(_)
                | RelayError::Upstream(RealtimeError::NotConnected)
                | RelayError::Upstream(RealtimeError::WebSocketError(_))
        )
    }
}
