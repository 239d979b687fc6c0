//! Realtime session WebSocket handlers
//!
//! # Protocol
//!
//! ## Client → Server (`/ws/{session_id}`)
//!
//! - **audio**: `{data: [int16]}` PCM samples, 24kHz mono
//! - **text**: Send a text message to the conversation
//! - **interrupt**: Cancel the current response
//! - **commit_audio**: Commit the input audio buffer
//! - **image**: Single-shot image `{data_url, text?}`
//! - **image_start / image_chunk / image_end**: Chunked image upload
//!
//! ## Server → Client and viewers
//!
//! - Every upstream realtime API event, verbatim
//! - **history_updated / history_added**: Conversation history changes
//! - **tool_start / tool_end / handoff**: Tool execution and agent changes
//! - **audio_end / audio_interrupted**: Playback control
//! - **client_info**: Acknowledgements (client only)
//! - **error**: Errors
//!
//! Viewers (`/ws/{session_id}/events`) receive `history_updated` with the
//! current history first, then the live stream.

mod handler;
pub mod messages;
mod viewer;

pub use handler::session_ws_handler;
pub use viewer::viewer_ws_handler;
