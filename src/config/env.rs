use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::ServerConfig;

/// Read a variable, treating unset and blank the same.
fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| format!("Invalid value for {name} ('{raw}'): {e}").into()),
        None => Ok(default),
    }
}

/// Build a configuration from environment variables over the defaults.
pub(super) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::default();

    if let Some(host) = var("HOST") {
        config.host = host;
    }
    config.port = parse_var("PORT", config.port)?;

    if let Some(key) = var("OPENAI_API_KEY") {
        config.openai_api_key = key;
    }
    if let Some(url) = var("OPENAI_REALTIME_URL") {
        config.openai_realtime_url = url;
    }
    if let Some(model) = var("REALTIME_MODEL") {
        config.realtime_model = model;
    }
    if let Some(voice) = var("REALTIME_VOICE") {
        config.realtime_voice = voice;
    }
    config.realtime_speed = parse_var("REALTIME_SPEED", config.realtime_speed)?;
    if let Some(model) = var("TRANSCRIPTION_MODEL") {
        config.transcription_model = model;
    }
    // set-but-empty disables the language hint
    if let Ok(language) = env::var("TRANSCRIPTION_LANGUAGE") {
        let language = language.trim();
        config.transcription_language = (!language.is_empty()).then(|| language.to_string());
    }
    if let Some(eagerness) = var("VAD_EAGERNESS") {
        config.vad_eagerness = eagerness.to_lowercase();
    }

    if let Some(timezone) = var("TIMEZONE") {
        config.timezone = timezone;
    }
    config.agents_file = var("AGENTS_FILE").map(PathBuf::from);

    if let Some(dir) = var("STATIC_DIR") {
        config.static_dir = PathBuf::from(dir);
    }
    config.cors_allowed_origins = var("CORS_ALLOWED_ORIGINS");

    config.max_message_size = parse_var("MAX_MESSAGE_SIZE", config.max_message_size)?;
    config.viewer_buffer_size = parse_var("VIEWER_BUFFER_SIZE", config.viewer_buffer_size)?;
    config.max_image_bytes = parse_var("MAX_IMAGE_BYTES", config.max_image_bytes)?;
    config.max_pending_images = parse_var("MAX_PENDING_IMAGES", config.max_pending_images)?;

    Ok(config)
}
