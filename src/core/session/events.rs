//! Events the relay itself emits to clients and viewers.
//!
//! Upstream frames are relayed verbatim; these are the relay's own events
//! layered on top of them.

use std::sync::Arc;

use serde::Serialize;

use super::history::HistoryItem;

/// A serialized text frame ready to go out on a socket. Shared between the
/// client and every viewer without copying.
pub type Frame = Arc<str>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    HistoryUpdated {
        history: Vec<HistoryItem>,
    },
    HistoryAdded {
        item: HistoryItem,
    },
    ToolStart {
        tool: String,
    },
    ToolEnd {
        tool: String,
        output: String,
    },
    Handoff {
        from: String,
        to: String,
    },
    AgentStart {
        agent: String,
    },
    AgentEnd {
        agent: String,
    },
    AudioEnd,
    AudioInterrupted,
    /// Acknowledgements for client input (`text_enqueued`, `image_enqueued`,
    /// `image_start_ack`, `image_chunk_ack`)
    ClientInfo {
        info: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        count: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<usize>,
    },
    Error {
        error: String,
    },
}

impl RelayEvent {
    pub fn info(info: impl Into<String>) -> Self {
        RelayEvent::ClientInfo {
            info: info.into(),
            id: None,
            count: None,
            size: None,
        }
    }

    /// `id` is the chunked upload id; single-shot images have none.
    pub fn image_enqueued(id: Option<&str>, size: usize) -> Self {
        RelayEvent::ClientInfo {
            info: "image_enqueued".to_string(),
            id: id.map(str::to_string),
            count: None,
            size: Some(size),
        }
    }

    pub fn image_start_ack(id: &str) -> Self {
        RelayEvent::ClientInfo {
            info: "image_start_ack".to_string(),
            id: Some(id.to_string()),
            count: None,
            size: None,
        }
    }

    pub fn image_chunk_ack(id: &str, count: usize) -> Self {
        RelayEvent::ClientInfo {
            info: "image_chunk_ack".to_string(),
            id: Some(id.to_string()),
            count: Some(count),
            size: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        RelayEvent::Error {
            error: error.into(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            RelayEvent::HistoryUpdated { .. } => "history_updated",
            RelayEvent::HistoryAdded { .. } => "history_added",
            RelayEvent::ToolStart { .. } => "tool_start",
            RelayEvent::ToolEnd { .. } => "tool_end",
            RelayEvent::Handoff { .. } => "handoff",
            RelayEvent::AgentStart { .. } => "agent_start",
            RelayEvent::AgentEnd { .. } => "agent_end",
            RelayEvent::AudioEnd => "audio_end",
            RelayEvent::AudioInterrupted => "audio_interrupted",
            RelayEvent::ClientInfo { .. } => "client_info",
            RelayEvent::Error { .. } => "error",
        }
    }

    /// Serialize into a shareable frame.
    pub fn to_frame(&self) -> Frame {
        match serde_json::to_string(self) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                // Only reachable if a history item stops being serializable
                tracing::error!("Failed to serialize {} event: {}", self.event_type(), e);
                Arc::from(r#"{"type":"error","error":"internal serialization failure"}"#)
            }
        }
    }
}
