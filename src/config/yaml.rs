use serde::Deserialize;
use std::path::PathBuf;

use super::ServerConfig;

/// Complete YAML configuration structure
///
/// All fields are optional; values present here override the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8000
///
/// openai:
///   api_key: "sk-..."
///   realtime_url: "wss://api.openai.com/v1/realtime"
///
/// realtime:
///   model: "gpt-realtime"
///   voice: "marin"
///   speed: 1.0
///   transcription_model: "gpt-4o-mini-transcribe"
///   transcription_language: "es"
///   vad_eagerness: "auto"
///
/// agents:
///   file: "agents.yaml"
///   timezone: "Atlantic/Canary"
///
/// security:
///   static_dir: "static"
///   cors_allowed_origins: "*"
///
/// limits:
///   max_message_size: 16777216
///   viewer_buffer_size: 256
///   max_image_bytes: 16777216
///   max_pending_images: 8
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub openai: Option<OpenAIYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub agents: Option<AgentsYaml>,
    pub security: Option<SecurityYaml>,
    pub limits: Option<LimitsYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
    pub realtime_url: Option<String>,
}

impl std::fmt::Debug for OpenAIYaml {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIYaml")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("realtime_url", &self.realtime_url)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub model: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
    pub transcription_model: Option<String>,
    /// Empty string disables the language hint
    pub transcription_language: Option<String>,
    pub vad_eagerness: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AgentsYaml {
    pub file: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub static_dir: Option<String>,
    pub cors_allowed_origins: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LimitsYaml {
    pub max_message_size: Option<usize>,
    pub viewer_buffer_size: Option<usize>,
    pub max_image_bytes: Option<usize>,
    pub max_pending_images: Option<usize>,
}

impl YamlConfig {
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;
        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Override `config` with every value present in this file.
    pub fn apply(self, config: &mut ServerConfig) {
        if let Some(server) = self.server {
            if let Some(host) = server.host {
                config.host = host;
            }
            if let Some(port) = server.port {
                config.port = port;
            }
        }

        if let Some(openai) = self.openai {
            if let Some(key) = openai.api_key {
                config.openai_api_key = key;
            }
            if let Some(url) = openai.realtime_url {
                config.openai_realtime_url = url;
            }
        }

        if let Some(realtime) = self.realtime {
            if let Some(model) = realtime.model {
                config.realtime_model = model;
            }
            if let Some(voice) = realtime.voice {
                config.realtime_voice = voice;
            }
            if let Some(speed) = realtime.speed {
                config.realtime_speed = speed;
            }
            if let Some(model) = realtime.transcription_model {
                config.transcription_model = model;
            }
            if let Some(language) = realtime.transcription_language {
                config.transcription_language = (!language.is_empty()).then_some(language);
            }
            if let Some(eagerness) = realtime.vad_eagerness {
                config.vad_eagerness = eagerness.to_lowercase();
            }
        }

        if let Some(agents) = self.agents {
            if let Some(file) = agents.file {
                config.agents_file = Some(PathBuf::from(file));
            }
            if let Some(timezone) = agents.timezone {
                config.timezone = timezone;
            }
        }

        if let Some(security) = self.security {
            if let Some(dir) = security.static_dir {
                config.static_dir = PathBuf::from(dir);
            }
            if let Some(origins) = security.cors_allowed_origins {
                config.cors_allowed_origins = Some(origins);
            }
        }

        if let Some(limits) = self.limits {
            if let Some(v) = limits.max_message_size {
                config.max_message_size = v;
            }
            if let Some(v) = limits.viewer_buffer_size {
                config.viewer_buffer_size = v;
            }
            if let Some(v) = limits.max_image_bytes {
                config.max_image_bytes = v;
            }
            if let Some(v) = limits.max_pending_images {
                config.max_pending_images = v;
            }
        }
    }
}
