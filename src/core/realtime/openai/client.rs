//! OpenAI Realtime API client implementation.
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! The client owns one WebSocket. A spawned connection task multiplexes
//! outgoing [`ClientEvent`]s and incoming frames; incoming text frames are
//! handed to the caller as [`UpstreamFrame`]s. There is no reconnection: when
//! the socket ends, the frame channel closes and the caller decides what to
//! do.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use parking_lot::RwLock;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message, client::IntoClientRequest};
use url::Url;

use super::config::{
    DEFAULT_REALTIME_MODEL, Modality, OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat,
};
use crate::core::realtime::base::{
    BaseRealtime, ConnectionState, RealtimeConfig, RealtimeError, RealtimeResult, UpstreamFrame,
};
use crate::core::realtime::messages::{
    ClientEvent, InputAudioTranscription, SessionConfig, ToolDef, TurnDetection,
};

/// Channel capacity for outgoing events.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Channel capacity for incoming frames handed to the caller.
const FRAME_CHANNEL_CAPACITY: usize = 1024;

/// How long `disconnect` waits for the close handshake before aborting.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// OpenAI Realtime API client.
pub struct OpenAIRealtime {
    config: RealtimeConfig,
    audio_format: OpenAIRealtimeAudioFormat,
    /// Shared with the connection task, which resets it when the socket ends
    state: Arc<RwLock<ConnectionState>>,
    ws_sender: Arc<Mutex<Option<mpsc::Sender<ClientEvent>>>>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl OpenAIRealtime {
    /// Create a new client. Does not connect.
    pub fn new(config: RealtimeConfig) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let audio_format = config
            .input_audio_format
            .as_deref()
            .map(OpenAIRealtimeAudioFormat::from_str_or_default)
            .unwrap_or_default();

        Ok(Self {
            config,
            audio_format,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            ws_sender: Arc::new(Mutex::new(None)),
            connection_handle: Mutex::new(None),
        })
    }

    /// Build the WebSocket URL with model parameter.
    fn build_ws_url(&self) -> RealtimeResult<Url> {
        let base = if self.config.url.is_empty() {
            OPENAI_REALTIME_URL
        } else {
            self.config.url.as_str()
        };
        let model = if self.config.model.is_empty() {
            DEFAULT_REALTIME_MODEL
        } else {
            self.config.model.as_str()
        };

        let mut url = Url::parse(base)
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("bad url {base}: {e}")))?;
        url.query_pairs_mut().append_pair("model", model);
        Ok(url)
    }

    /// Build the session configuration from a provider config.
    fn build_session_config(&self, config: &RealtimeConfig) -> SessionConfig {
        let audio_format = config
            .output_audio_format
            .as_deref()
            .map(OpenAIRealtimeAudioFormat::from_str_or_default)
            .unwrap_or(self.audio_format);

        SessionConfig {
            modalities: Some(config.modalities.clone().unwrap_or_else(|| {
                vec![
                    Modality::Text.as_str().to_string(),
                    Modality::Audio.as_str().to_string(),
                ]
            })),
            instructions: config.instructions.clone(),
            voice: config.voice.clone(),
            speed: config.speed,
            input_audio_format: Some(self.audio_format.as_str().to_string()),
            output_audio_format: Some(audio_format.as_str().to_string()),
            input_audio_transcription: config
                .input_audio_transcription
                .as_ref()
                .map(InputAudioTranscription::from),
            turn_detection: config
                .turn_detection
                .as_ref()
                .and_then(TurnDetection::from_config),
            tools: config
                .tools
                .as_ref()
                .map(|tools| tools.iter().map(ToolDef::from).collect()),
            tool_choice: config.tool_choice.clone(),
            temperature: config.temperature,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }
}

/// Classify a handshake failure; 401/403 responses are reported as auth errors.
fn map_connect_error(error: tungstenite::Error) -> RealtimeError {
    match error {
        tungstenite::Error::Http(response)
            if response.status() == http::StatusCode::UNAUTHORIZED
                || response.status() == http::StatusCode::FORBIDDEN =>
        {
            RealtimeError::AuthenticationFailed(format!(
                "upstream rejected credentials ({})",
                response.status()
            ))
        }
        other => RealtimeError::ConnectionFailed(other.to_string()),
    }
}

#[async_trait]
impl BaseRealtime for OpenAIRealtime {
    async fn connect(&self) -> RealtimeResult<mpsc::Receiver<UpstreamFrame>> {
        if self.is_ready() {
            return Err(RealtimeError::SessionError(
                "upstream connection already open".to_string(),
            ));
        }

        self.set_state(ConnectionState::Connecting);

        let url = self.build_ws_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        request.headers_mut().insert(http::header::AUTHORIZATION, auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _response) = match tokio_tungstenite::connect_async(request).await {
            Ok(connected) => connected,
            Err(e) => {
                self.set_state(ConnectionState::Failed);
                return Err(map_connect_error(e));
            }
        };

        tracing::info!(url = %url.as_str(), "Connected to realtime API");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        let (frame_tx, frame_rx) = mpsc::channel::<UpstreamFrame>(FRAME_CHANNEL_CAPACITY);
        *self.ws_sender.lock().await = Some(tx);

        let state = self.state.clone();
        let ws_sender = self.ws_sender.clone();

        self.set_state(ConnectionState::Connected);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else {
                            // Every sender dropped: orderly shutdown requested
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        };

                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize event: {}", e);
                                continue;
                            }
                        };

                        tracing::debug!(event_type = event.event_type(), "Sending upstream event");
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::error!("Failed to send WebSocket message: {}", e);
                            break;
                        }
                    }

                    msg = ws_stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let frame = UpstreamFrame::parse(text.as_str());
                                if frame_tx.send(frame).await.is_err() {
                                    tracing::debug!("Frame receiver dropped, closing upstream");
                                    let _ = ws_sink.send(Message::Close(None)).await;
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                tracing::info!(?frame, "WebSocket closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!("WebSocket error: {}", e);
                                break;
                            }
                            None => {
                                tracing::info!("WebSocket stream ended");
                                break;
                            }
                        }
                    }
                }
            }

            *state.write() = ConnectionState::Disconnected;
            *ws_sender.lock().await = None;
            tracing::info!("Realtime connection task ended");
        });

        *self.connection_handle.lock().await = Some(handle);

        let session = self.build_session_config(&self.config);
        self.send_event(ClientEvent::SessionUpdate { session }).await?;

        Ok(frame_rx)
    }

    async fn disconnect(&self) -> RealtimeResult<()> {
        // Dropping the sender asks the connection task to close the socket
        self.ws_sender.lock().await.take();

        if let Some(mut handle) = self.connection_handle.lock().await.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                tracing::warn!("Close handshake timed out, aborting connection task");
                handle.abort();
            }
            tracing::info!("Disconnected from realtime API");
        }

        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        *self.state.read() == ConnectionState::Connected
    }

    fn get_connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    async fn send_event(&self, event: ClientEvent) -> RealtimeResult<()> {
        if let Some(sender) = self.ws_sender.lock().await.as_ref() {
            sender
                .send(event)
                .await
                .map_err(|e| RealtimeError::WebSocketError(e.to_string()))?;
            Ok(())
        } else {
            Err(RealtimeError::NotConnected)
        }
    }

    async fn update_session(&self, config: &RealtimeConfig) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }

        let session = self.build_session_config(config);
        self.send_event(ClientEvent::SessionUpdate { session }).await
    }

    fn get_provider_info(&self) -> serde_json::Value {
        serde_json::json!({
            "provider": "openai",
            "api_type": "WebSocket Realtime",
            "endpoint": if self.config.url.is_empty() { OPENAI_REALTIME_URL } else { self.config.url.as_str() },
            "model": if self.config.model.is_empty() { DEFAULT_REALTIME_MODEL } else { self.config.model.as_str() },
            "audio_format": self.audio_format.as_str(),
            "sample_rate": self.audio_format.sample_rate(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::base::{ToolDefinition, TurnDetectionConfig};
    use bytes::Bytes;

    fn test_config() -> RealtimeConfig {
        RealtimeConfig {
            api_key: "test_key".to_string(),
            model: "gpt-realtime".to_string(),
            voice: Some("marin".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_api_key_required() {
        let config = RealtimeConfig {
            api_key: String::new(),
            ..Default::default()
        };

        match OpenAIRealtime::new(config) {
            Err(RealtimeError::AuthenticationFailed(_)) => {}
            _ => panic!("Expected AuthenticationFailed error"),
        }
    }

    #[tokio::test]
    async fn test_send_audio_requires_connection() {
        let realtime = OpenAIRealtime::new(test_config()).unwrap();
        assert!(!realtime.is_ready());
        assert_eq!(
            realtime.get_connection_state(),
            ConnectionState::Disconnected
        );

        let result = realtime.send_audio(Bytes::from(vec![0u8; 100])).await;
        assert!(matches!(result, Err(RealtimeError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let realtime = OpenAIRealtime::new(test_config()).unwrap();
        realtime.disconnect().await.unwrap();
        realtime.disconnect().await.unwrap();
        assert_eq!(
            realtime.get_connection_state(),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_build_ws_url() {
        let realtime = OpenAIRealtime::new(test_config()).unwrap();
        let url = realtime.build_ws_url().unwrap();
        assert_eq!(url.as_str(), "wss://api.openai.com/v1/realtime?model=gpt-realtime");
    }

    #[test]
    fn test_build_ws_url_custom_endpoint() {
        let config = RealtimeConfig {
            url: "ws://127.0.0.1:9000/v1/realtime".to_string(),
            model: String::new(),
            ..test_config()
        };
        let realtime = OpenAIRealtime::new(config).unwrap();
        let url = realtime.build_ws_url().unwrap();
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert!(url.as_str().ends_with("model=gpt-realtime"));
    }

    #[test]
    fn test_build_ws_url_rejects_garbage() {
        let config = RealtimeConfig {
            url: "not a url".to_string(),
            ..test_config()
        };
        let realtime = OpenAIRealtime::new(config).unwrap();
        assert!(matches!(
            realtime.build_ws_url(),
            Err(RealtimeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_session_config_mapping() {
        let config = RealtimeConfig {
            instructions: Some("Be brief.".to_string()),
            speed: Some(1.0),
            turn_detection: Some(TurnDetectionConfig::default()),
            tools: Some(vec![ToolDefinition {
                name: "get_weather".to_string(),
                description: Some("Weather".to_string()),
                parameters: None,
            }]),
            ..test_config()
        };
        let realtime = OpenAIRealtime::new(config.clone()).unwrap();
        let session = realtime.build_session_config(&config);

        assert_eq!(session.voice.as_deref(), Some("marin"));
        assert_eq!(session.input_audio_format.as_deref(), Some("pcm16"));
        assert_eq!(session.output_audio_format.as_deref(), Some("pcm16"));
        assert_eq!(session.instructions.as_deref(), Some("Be brief."));
        assert!(matches!(
            session.turn_detection,
            Some(TurnDetection::SemanticVad { .. })
        ));
        let tools = session.tools.unwrap();
        assert_eq!(tools[0].tool_type, "function");
        assert_eq!(tools[0].name, "get_weather");
    }

    #[test]
    fn test_provider_info() {
        let realtime = OpenAIRealtime::new(test_config()).unwrap();
        let info = realtime.get_provider_info();
        assert_eq!(info["provider"], "openai");
        assert_eq!(info["model"], "gpt-realtime");
        assert_eq!(info["sample_rate"], 24000);
    }
}
