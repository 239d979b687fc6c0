//! Base traits and types for realtime conversational providers.
//!
//! A provider owns exactly one outbound connection to a realtime API. Events
//! travel upstream through [`BaseRealtime::send_event`] and come back as a
//! stream of [`UpstreamFrame`]s on the receiver returned by
//! [`BaseRealtime::connect`]. The receiver closing means the upstream side is
//! gone.
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian at 24kHz, base64 encoded on the wire.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use super::messages::{ClientEvent, ContentPart, ServerEvent};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Session error
    #[error("Session error: {0}")]
    SessionError(String),
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Base configuration for realtime providers.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// API key for authentication
    pub api_key: String,

    /// WebSocket endpoint, without the model query parameter
    #[serde(default)]
    pub url: String,

    /// Model to use (e.g., "gpt-realtime")
    #[serde(default)]
    pub model: String,

    /// Voice ID for audio output
    #[serde(default)]
    pub voice: Option<String>,

    /// Playback speed of the generated voice
    #[serde(default)]
    pub speed: Option<f32>,

    /// System instructions for the assistant
    #[serde(default)]
    pub instructions: Option<String>,

    /// Temperature for response generation
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Input audio format
    #[serde(default)]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(default)]
    pub output_audio_format: Option<String>,

    /// Enable input audio transcription
    #[serde(default)]
    pub input_audio_transcription: Option<InputTranscriptionConfig>,

    /// Turn detection configuration
    #[serde(default)]
    pub turn_detection: Option<TurnDetectionConfig>,

    /// Tool definitions for function calling
    #[serde(default)]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Tool choice strategy
    #[serde(default)]
    pub tool_choice: Option<String>,

    /// Response modalities (text, audio, or both)
    #[serde(default)]
    pub modalities: Option<Vec<String>>,
}

impl fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("api_key", &"<redacted>")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("speed", &self.speed)
            .field("input_audio_transcription", &self.input_audio_transcription)
            .field("turn_detection", &self.turn_detection)
            .field(
                "tools",
                &self
                    .tools
                    .as_ref()
                    .map(|t| t.iter().map(|d| d.name.as_str()).collect::<Vec<_>>()),
            )
            .finish_non_exhaustive()
    }
}

/// Configuration for input audio transcription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputTranscriptionConfig {
    /// Model to use for transcription (e.g., "gpt-4o-mini-transcribe")
    pub model: String,
    /// ISO-639-1 language hint
    #[serde(default)]
    pub language: Option<String>,
    /// Optional prompt to guide transcription
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Configuration for turn detection (VAD).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Server-side VAD based on audio energy
    #[serde(rename = "server_vad")]
    ServerVad {
        #[serde(default)]
        threshold: Option<f32>,
        #[serde(default)]
        prefix_padding_ms: Option<u32>,
        #[serde(default)]
        silence_duration_ms: Option<u32>,
        #[serde(default)]
        create_response: Option<bool>,
        #[serde(default)]
        interrupt_response: Option<bool>,
    },
    /// Semantic-aware turn detection
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// Eagerness level (low, medium, high, auto)
        #[serde(default)]
        eagerness: Option<String>,
        #[serde(default)]
        create_response: Option<bool>,
        #[serde(default)]
        interrupt_response: Option<bool>,
    },
    /// No automatic turn detection
    #[serde(rename = "none")]
    None,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        TurnDetectionConfig::SemanticVad {
            eagerness: Some("auto".to_string()),
            create_response: Some(true),
            interrupt_response: Some(true),
        }
    }
}

/// Function tool exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Function name
    pub name: String,
    /// Function description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state for realtime providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected to the provider
    #[default]
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
    /// Connection failed
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Upstream Frames
// =============================================================================

/// One text frame received from the upstream API.
///
/// `raw` is the exact text that arrived and is what gets relayed downstream;
/// `event` is its typed interpretation, used to drive history and tools.
#[derive(Debug, Clone)]
pub struct UpstreamFrame {
    pub raw: Arc<str>,
    pub event: ServerEvent,
}

impl UpstreamFrame {
    /// Interpret a raw upstream text frame. Never fails: anything that does not
    /// match a known event shape becomes [`ServerEvent::Passthrough`].
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: Arc::from(raw),
            event: ServerEvent::parse(raw),
        }
    }
}

// =============================================================================
// Base Trait
// =============================================================================

/// Base trait for realtime providers.
///
/// All methods take `&self` so one provider can be shared between the task
/// reading client messages and the task reading upstream events.
#[async_trait]
pub trait BaseRealtime: Send + Sync {
    /// Open the upstream connection and send the initial session configuration.
    ///
    /// Returns the stream of upstream frames. The stream ends when the
    /// connection closes for any reason.
    async fn connect(&self) -> RealtimeResult<mpsc::Receiver<UpstreamFrame>>;

    /// Close the upstream connection. Calling it twice is a no-op.
    async fn disconnect(&self) -> RealtimeResult<()>;

    /// Check if the provider is connected and ready.
    fn is_ready(&self) -> bool;

    /// Get the current connection state.
    fn get_connection_state(&self) -> ConnectionState;

    /// Queue a protocol event for the upstream connection.
    async fn send_event(&self, event: ClientEvent) -> RealtimeResult<()>;

    /// Replace the session configuration (instructions, tools, voice).
    async fn update_session(&self, config: &RealtimeConfig) -> RealtimeResult<()>;

    /// Get provider information.
    fn get_provider_info(&self) -> serde_json::Value;

    // -------------------------------------------------------------------------
    // Convenience wrappers
    // -------------------------------------------------------------------------

    /// Append PCM16 audio to the upstream input buffer.
    async fn send_audio(&self, audio_data: Bytes) -> RealtimeResult<()> {
        self.send_event(ClientEvent::audio_append(&audio_data))
            .await
    }

    /// Add a user message to the conversation and ask for a response.
    async fn send_user_message(&self, content: Vec<ContentPart>) -> RealtimeResult<()> {
        self.send_event(ClientEvent::user_message(content)).await?;
        self.create_response().await
    }

    /// Request the model to generate a response.
    async fn create_response(&self) -> RealtimeResult<()> {
        self.send_event(ClientEvent::ResponseCreate { response: None })
            .await
    }

    /// Cancel the current response generation.
    async fn cancel_response(&self) -> RealtimeResult<()> {
        self.send_event(ClientEvent::ResponseCancel).await
    }

    /// Commit the audio buffer (for manual turn detection).
    async fn commit_audio_buffer(&self) -> RealtimeResult<()> {
        self.send_event(ClientEvent::InputAudioBufferCommit).await
    }

    /// Submit a function call result. Does not trigger a response.
    async fn submit_function_result(&self, call_id: &str, output: &str) -> RealtimeResult<()> {
        self.send_event(ClientEvent::function_output(call_id, output))
            .await
    }
}

/// Boxed trait object for realtime providers.
pub type BoxedRealtime = Box<dyn BaseRealtime>;
