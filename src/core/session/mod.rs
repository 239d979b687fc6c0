//! Session state shared between the client connection, the upstream bridge
//! and viewers.

pub mod events;
pub mod history;
pub mod media;
mod registry;
#[allow(clippy::module_inception)]
mod session;

pub use events::{Frame, RelayEvent};
pub use history::{ConversationHistory, HistoryItem, MessageContent, Role};
pub use media::{AssembledImage, ImageAssembler, pcm16_from_samples};
pub use registry::{SessionRegistry, validate_session_id};
pub use session::{CLOSE_UPSTREAM_GONE, ClientRoute, Session, SessionState};
