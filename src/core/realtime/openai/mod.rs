//! OpenAI Realtime API provider.
//!
//! Bidirectional audio and text over one WebSocket per session, with server
//! side VAD, input transcription and function calling.
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz.
//! G.711 u-law and a-law are also supported at 8kHz.

mod client;
mod config;

pub use client::OpenAIRealtime;
pub use config::{
    DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_VOICE, DEFAULT_TRANSCRIPTION_MODEL, Modality,
    OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat,
};
