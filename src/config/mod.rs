//! Configuration module for the relay server
//!
//! Configuration comes from environment variables (with `.env` loaded in
//! `main`) and, optionally, a YAML file whose values override them.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `env`: Environment variable loading
//! - `yaml`: YAML configuration file loading and merging
//!
//! # Example
//! ```rust,no_run
//! use realtime_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

mod env;
mod yaml;

use crate::core::realtime::openai::{
    DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_VOICE, DEFAULT_TRANSCRIPTION_MODEL,
};
use crate::core::realtime::{
    InputTranscriptionConfig, OPENAI_REALTIME_URL, RealtimeConfig, TurnDetectionConfig,
};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_TIMEZONE: &str = "Atlantic/Canary";
pub const DEFAULT_TRANSCRIPTION_LANGUAGE: &str = "es";
pub const DEFAULT_VAD_EAGERNESS: &str = "auto";
pub const DEFAULT_STATIC_DIR: &str = "static";
/// Image data URLs travel inside single WebSocket messages
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_VIEWER_BUFFER_SIZE: usize = 256;
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_MAX_PENDING_IMAGES: usize = 8;

/// Server configuration
///
/// Contains:
/// - Listen address
/// - Upstream realtime API settings (key, endpoint, model, voice, transcription, VAD)
/// - Agent and tool settings (agents file, timezone)
/// - Browser UI assets and CORS
/// - Relay limits (message size, viewer queues, image uploads)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Upstream realtime API
    /// OpenAI API key used for every upstream session
    pub openai_api_key: String,
    pub openai_realtime_url: String,
    pub realtime_model: String,
    pub realtime_voice: String,
    pub realtime_speed: f32,
    pub transcription_model: String,
    /// Language hint for input transcription; `None` lets the model detect it
    pub transcription_language: Option<String>,
    /// Semantic VAD eagerness (low, medium, high, auto)
    pub vad_eagerness: String,

    // Agents and tools
    /// IANA zone reported by the time and date tools
    pub timezone: String,
    /// YAML agent catalog; the built-in agent is used when unset
    pub agents_file: Option<PathBuf>,

    // Browser UI
    pub static_dir: PathBuf,
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Relay limits
    pub max_message_size: usize,
    /// Queue depth per viewer; a viewer that falls this far behind is dropped
    pub viewer_buffer_size: usize,
    pub max_image_bytes: usize,
    pub max_pending_images: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            openai_api_key: String::new(),
            openai_realtime_url: OPENAI_REALTIME_URL.to_string(),
            realtime_model: DEFAULT_REALTIME_MODEL.to_string(),
            realtime_voice: DEFAULT_REALTIME_VOICE.to_string(),
            realtime_speed: 1.0,
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            transcription_language: Some(DEFAULT_TRANSCRIPTION_LANGUAGE.to_string()),
            vad_eagerness: DEFAULT_VAD_EAGERNESS.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            agents_file: None,
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            cors_allowed_origins: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            viewer_buffer_size: DEFAULT_VIEWER_BUFFER_SIZE,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_pending_images: DEFAULT_MAX_PENDING_IMAGES,
        }
    }
}

/// Zeroize the API key when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.openai_api_key.zeroize();
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = env::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base.
    ///
    /// Environment variables (and `.env`, loaded in `main`) provide the base
    /// configuration; values present in the YAML file override them.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let mut config = env::load_from_env()?;
        yaml_config.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Get the server address as a string ("host:port").
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn has_api_key(&self) -> bool {
        !self.openai_api_key.trim().is_empty()
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if !(0.25..=1.5).contains(&self.realtime_speed) {
            return Err(format!(
                "REALTIME_SPEED must be between 0.25 and 1.5, got {}",
                self.realtime_speed
            )
            .into());
        }
        if !matches!(
            self.vad_eagerness.as_str(),
            "low" | "medium" | "high" | "auto"
        ) {
            return Err(format!(
                "VAD_EAGERNESS must be one of low, medium, high, auto; got {}",
                self.vad_eagerness
            )
            .into());
        }
        for (name, value) in [
            ("MAX_MESSAGE_SIZE", self.max_message_size),
            ("VIEWER_BUFFER_SIZE", self.viewer_buffer_size),
            ("MAX_IMAGE_BYTES", self.max_image_bytes),
            ("MAX_PENDING_IMAGES", self.max_pending_images),
        ] {
            if value == 0 {
                return Err(format!("{name} must be greater than zero").into());
            }
        }
        if let Err(e) = url::Url::parse(&self.openai_realtime_url) {
            return Err(format!(
                "Invalid OPENAI_REALTIME_URL '{}': {}",
                self.openai_realtime_url, e
            )
            .into());
        }
        Ok(())
    }

    /// Upstream session configuration shared by every session, before the
    /// active agent's instructions and tools are applied.
    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            api_key: self.openai_api_key.clone(),
            url: self.openai_realtime_url.clone(),
            model: self.realtime_model.clone(),
            voice: Some(self.realtime_voice.clone()),
            speed: Some(self.realtime_speed),
            input_audio_format: Some("pcm16".to_string()),
            output_audio_format: Some("pcm16".to_string()),
            input_audio_transcription: Some(InputTranscriptionConfig {
                model: self.transcription_model.clone(),
                language: self.transcription_language.clone(),
                prompt: None,
            }),
            turn_detection: Some(TurnDetectionConfig::SemanticVad {
                eagerness: Some(self.vad_eagerness.clone()),
                create_response: Some(true),
                interrupt_response: Some(true),
            }),
            ..Default::default()
        }
    }
}
