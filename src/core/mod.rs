pub mod agent;
pub mod bridge;
pub mod realtime;
pub mod session;

// Re-export commonly used types for convenience
pub use agent::{AgentCatalog, AgentDefinition, Tool, ToolError, ToolRegistry};
pub use bridge::UpstreamBridge;
pub use realtime::{
    BaseRealtime, BoxedRealtime, OpenAIRealtime, RealtimeConfig, RealtimeError,
    RealtimeFactoryFn, RealtimeResult, create_realtime_provider, get_supported_realtime_providers,
};
pub use session::{RelayEvent, Session, SessionRegistry, SessionState};
