//! Agent definitions and handoffs.
//!
//! An agent is a set of instructions plus the tools it may call. Agents can
//! hand the conversation to each other through generated
//! `transfer_to_<agent>` tools; the bridge intercepts those calls and swaps
//! the upstream session configuration.

pub mod tools;

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::core::realtime::{RealtimeConfig, ToolDefinition};

pub use tools::{Tool, ToolError, ToolRegistry};

const HANDOFF_TOOL_PREFIX: &str = "transfer_to_";

pub const DEFAULT_AGENT_NAME: &str = "assistant";

const DEFAULT_AGENT_INSTRUCTIONS: &str = "You are a friendly voice assistant. \
Keep answers short (two or three sentences) and clear. \
When the user shares an image, describe what is relevant to their question.";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to read agents file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse agents file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid agent catalog: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    pub instructions: String,
    /// Names of tools from the tool registry
    #[serde(default)]
    pub tools: Vec<String>,
    /// Names of agents this one may hand off to
    #[serde(default)]
    pub handoffs: Vec<String>,
    /// Shown to other agents in the description of the transfer tool
    #[serde(default)]
    pub handoff_description: Option<String>,
}

impl AgentDefinition {
    pub fn builtin() -> Self {
        Self {
            name: DEFAULT_AGENT_NAME.to_string(),
            instructions: DEFAULT_AGENT_INSTRUCTIONS.to_string(),
            tools: vec![
                "get_current_time".to_string(),
                "get_current_date".to_string(),
                "get_weather".to_string(),
            ],
            handoffs: Vec::new(),
            handoff_description: None,
        }
    }
}

/// Name of the tool that transfers the conversation to `agent`.
pub fn transfer_tool_name(agent: &str) -> String {
    let slug: String = agent
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{HANDOFF_TOOL_PREFIX}{slug}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCatalog {
    pub starting_agent: String,
    pub agents: Vec<AgentDefinition>,
}

impl Default for AgentCatalog {
    fn default() -> Self {
        Self {
            starting_agent: DEFAULT_AGENT_NAME.to_string(),
            agents: vec![AgentDefinition::builtin()],
        }
    }
}

impl AgentCatalog {
    /// Load and validate a catalog from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| AgentError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, AgentError> {
        let catalog: AgentCatalog = serde_yaml::from_str(contents)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.agents.is_empty() {
            return Err(AgentError::Invalid("no agents defined".to_string()));
        }
        for (i, agent) in self.agents.iter().enumerate() {
            if agent.name.trim().is_empty() {
                return Err(AgentError::Invalid(format!("agent #{i} has no name")));
            }
            if self.agents[..i].iter().any(|a| a.name == agent.name) {
                return Err(AgentError::Invalid(format!(
                    "duplicate agent name: {}",
                    agent.name
                )));
            }
        }
        if self.get(&self.starting_agent).is_none() {
            return Err(AgentError::Invalid(format!(
                "starting agent {} is not defined",
                self.starting_agent
            )));
        }
        for agent in &self.agents {
            for target in &agent.handoffs {
                if self.get(target).is_none() {
                    return Err(AgentError::Invalid(format!(
                        "agent {} hands off to unknown agent {}",
                        agent.name, target
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn starting(&self) -> Option<&AgentDefinition> {
        self.get(&self.starting_agent)
    }

    /// If `tool_name` is a handoff tool available to `from`, the target agent.
    pub fn handoff_target(&self, from: &str, tool_name: &str) -> Option<&AgentDefinition> {
        if !tool_name.starts_with(HANDOFF_TOOL_PREFIX) {
            return None;
        }
        self.get(from)?
            .handoffs
            .iter()
            .filter_map(|name| self.get(name))
            .find(|target| transfer_tool_name(&target.name) == tool_name)
    }

    /// Function tools plus generated handoff tools for `agent`.
    pub fn tool_definitions(
        &self,
        agent: &AgentDefinition,
        registry: &ToolRegistry,
    ) -> Vec<ToolDefinition> {
        let mut defs = registry.definitions_for(&agent.tools);
        defs.extend(
            agent
                .handoffs
                .iter()
                .filter_map(|name| self.get(name))
                .map(handoff_tool),
        );
        defs
    }

    /// Upstream configuration for a session currently driven by `agent`.
    pub fn realtime_config(
        &self,
        base: &RealtimeConfig,
        agent: &AgentDefinition,
        registry: &ToolRegistry,
    ) -> RealtimeConfig {
        let tools = self.tool_definitions(agent, registry);
        RealtimeConfig {
            instructions: Some(agent.instructions.clone()),
            tool_choice: (!tools.is_empty()).then(|| "auto".to_string()),
            tools: Some(tools),
            ..base.clone()
        }
    }
}

fn handoff_tool(target: &AgentDefinition) -> ToolDefinition {
    let mut description = format!(
        "Handoff to the {} agent to handle the request.",
        target.name
    );
    if let Some(extra) = &target.handoff_description {
        description.push(' ');
        description.push_str(extra);
    }
    ToolDefinition {
        name: transfer_tool_name(&target.name),
        description: Some(description),
        parameters: Some(json!({"type": "object", "properties": {}, "required": []})),
    }
}
