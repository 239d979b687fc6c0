//! Realtime conversational provider module.
//!
//! # Architecture
//!
//! - `BaseRealtime` trait for provider abstraction
//! - `messages` for the wire protocol shared by every provider
//! - A factory function type so the server can be handed a provider
//!   constructor (real or fake) at startup
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian at 24kHz.

mod base;
pub mod messages;
pub mod openai;

use std::sync::Arc;

pub use base::{
    BaseRealtime, BoxedRealtime, ConnectionState, InputTranscriptionConfig, RealtimeConfig,
    RealtimeError, RealtimeResult, ToolDefinition, TurnDetectionConfig, UpstreamFrame,
};
pub use messages::{ClientEvent, ContentPart, ConversationItem, ServerEvent};
pub use openai::{OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIRealtime};

/// Constructor for realtime providers, one call per session.
pub type RealtimeFactoryFn =
    Arc<dyn Fn(RealtimeConfig) -> RealtimeResult<BoxedRealtime> + Send + Sync>;

/// Create a realtime provider by name.
///
/// # Supported Providers
///
/// - `"openai"` - OpenAI Realtime API
pub fn create_realtime_provider(
    provider_type: &str,
    config: RealtimeConfig,
) -> RealtimeResult<BoxedRealtime> {
    match provider_type.to_lowercase().as_str() {
        "openai" => Ok(Box::new(OpenAIRealtime::new(config)?)),
        other => Err(RealtimeError::InvalidConfiguration(format!(
            "Unsupported realtime provider: {other}. Supported providers: {}",
            get_supported_realtime_providers().join(", ")
        ))),
    }
}

/// The factory used by the server binary.
pub fn openai_factory() -> RealtimeFactoryFn {
    Arc::new(|config| create_realtime_provider("openai", config))
}

/// Get list of supported realtime providers.
pub fn get_supported_realtime_providers() -> Vec<&'static str> {
    vec!["openai"]
}
