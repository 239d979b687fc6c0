//! Application state shared by every handler.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::core::agent::{AgentCatalog, ToolRegistry};
use crate::core::realtime::{RealtimeFactoryFn, openai_factory};
use crate::core::session::SessionRegistry;

/// Application state
///
/// Owns the session registry (there is no global one), the upstream
/// provider factory, and the agent and tool configuration every session
/// starts from.
pub struct AppState {
    pub config: ServerConfig,
    pub registry: SessionRegistry,
    pub factory: RealtimeFactoryFn,
    pub agents: Arc<AgentCatalog>,
    pub tools: Arc<ToolRegistry>,
    /// Session and viewer connection tasks, awaited on shutdown
    pub tasks: TaskTracker,
}

impl AppState {
    /// Build the state used by the server binary: OpenAI upstream, agents
    /// from `AGENTS_FILE` (or the built-in agent) and the built-in tools.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let agents = match &config.agents_file {
            Some(path) => {
                let catalog = AgentCatalog::from_file(path)?;
                info!(
                    "Loaded {} agents from {} (starting agent: {})",
                    catalog.agents.len(),
                    path.display(),
                    catalog.starting_agent
                );
                catalog
            }
            None => AgentCatalog::default(),
        };
        let tools = ToolRegistry::with_builtins(&config.timezone);
        Ok(Self::with_parts(config, openai_factory(), agents, tools))
    }

    /// Build a state from explicit parts, e.g. a fake upstream factory.
    pub fn with_parts(
        config: ServerConfig,
        factory: RealtimeFactoryFn,
        agents: AgentCatalog,
        tools: ToolRegistry,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: SessionRegistry::new(config.viewer_buffer_size),
            config,
            factory,
            agents: Arc::new(agents),
            tools: Arc::new(tools),
            tasks: TaskTracker::new(),
        })
    }

    /// Cancel every session and wait up to `grace` for the connection tasks
    /// to finish their teardown. Returns false if the grace period ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.registry.clear();
        self.tasks.close();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            warn!(
                "{} connection tasks still running after {:?}",
                self.tasks.len(),
                grace
            );
            return false;
        }
        true
    }
}
