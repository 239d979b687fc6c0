//! Client WebSocket message types
//!
//! Messages a client (browser UI or Unity) sends on `/ws/{session_id}`.
//! Everything the server sends back is either a verbatim upstream frame or
//! a [`RelayEvent`](crate::core::session::RelayEvent).

use serde::{Deserialize, Deserializer, de};
use serde_json::Value;

use crate::errors::{RelayError, RelayResult};

/// Incoming WebSocket messages from the client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// int16 PCM samples, 24kHz mono
    Audio { data: Vec<i16> },

    Text {
        #[serde(default)]
        text: String,
    },

    /// Cancel the response being generated
    Interrupt,

    /// Commit the input audio buffer (manual turn taking)
    CommitAudio,

    /// Single-shot image as a complete data URL
    Image {
        #[serde(default)]
        data_url: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },

    ImageStart {
        #[serde(deserialize_with = "upload_id")]
        id: String,
        #[serde(default)]
        text: Option<String>,
    },

    ImageChunk {
        #[serde(deserialize_with = "upload_id")]
        id: String,
        #[serde(default)]
        chunk: String,
    },

    ImageEnd {
        #[serde(deserialize_with = "upload_id")]
        id: String,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> RelayResult<Self> {
        serde_json::from_str(text).map_err(|e| RelayError::MalformedMessage(e.to_string()))
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::Audio { .. } => "audio",
            ClientMessage::Text { .. } => "text",
            ClientMessage::Interrupt => "interrupt",
            ClientMessage::CommitAudio => "commit_audio",
            ClientMessage::Image { .. } => "image",
            ClientMessage::ImageStart { .. } => "image_start",
            ClientMessage::ImageChunk { .. } => "image_chunk",
            ClientMessage::ImageEnd { .. } => "image_end",
        }
    }
}

/// Upload ids may be JSON strings or numbers; numbers are stringified.
fn upload_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "image id must be a string or number, got {other}"
        ))),
    }
}
