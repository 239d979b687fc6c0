//! Function tools the bridge executes on behalf of the model.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;

use crate::core::realtime::ToolDefinition;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("Tool {tool} failed: {reason}")]
    Execution { tool: String, reason: String },
}

/// A function tool callable by the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    /// Run the tool. The returned string is sent upstream as the function
    /// call output.
    async fn call(&self, args: Value) -> Result<String, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            parameters: Some(self.parameters()),
        }
    }
}

/// Thread-safe tool lookup shared by every session.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tools, reporting time in `timezone`.
    pub fn with_builtins(timezone: &str) -> Self {
        let registry = Self::new();
        registry.register(Arc::new(CurrentTime::new(timezone)));
        registry.register(Arc::new(CurrentDate::new(timezone)));
        registry.register(Arc::new(Weather));
        registry
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| t.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    /// Definitions for `names`, in the given order. Unknown names are skipped.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| match self.get(name) {
                Some(tool) => Some(tool.definition()),
                None => {
                    warn!("Agent references unknown tool: {}", name);
                    None
                }
            })
            .collect()
    }

    /// Invoke `name` with the raw JSON argument string from the model.
    pub async fn invoke(&self, name: &str, raw_args: &str) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let args = if raw_args.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(raw_args).map_err(|e| ToolError::InvalidArguments {
                tool: name.to_string(),
                reason: e.to_string(),
            })?
        };

        tool.call(args).await
    }
}

// =============================================================================
// Built-in tools
// =============================================================================

/// Resolve a zone name, falling back to UTC.
fn resolve_timezone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("No time zone found with key {}, falling back to UTC", name);
            chrono_tz::UTC
        }
    }
}

fn local_now(tz: Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(&tz)
}

pub struct CurrentTime {
    timezone: String,
    tz: Tz,
}

impl CurrentTime {
    pub fn new(timezone: &str) -> Self {
        Self {
            timezone: timezone.to_string(),
            tz: resolve_timezone(timezone),
        }
    }
}

#[async_trait]
impl Tool for CurrentTime {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Tool to get current time (hour and minutes)."
    }

    async fn call(&self, _args: Value) -> Result<String, ToolError> {
        let now = local_now(self.tz);
        Ok(json!({
            "current_hour": now.format("%H").to_string(),
            "current_minutes": now.format("%M").to_string(),
            "timezone": self.timezone,
        })
        .to_string())
    }
}

pub struct CurrentDate {
    timezone: String,
    tz: Tz,
}

impl CurrentDate {
    pub fn new(timezone: &str) -> Self {
        Self {
            timezone: timezone.to_string(),
            tz: resolve_timezone(timezone),
        }
    }
}

#[async_trait]
impl Tool for CurrentDate {
    fn name(&self) -> &str {
        "get_current_date"
    }

    fn description(&self) -> &str {
        "Tool to get current date (day and month)."
    }

    async fn call(&self, _args: Value) -> Result<String, ToolError> {
        let now = local_now(self.tz);
        Ok(json!({
            "current_day": now.format("%d").to_string(),
            "current_month": now.format("%m").to_string(),
            "timezone": self.timezone,
        })
        .to_string())
    }
}

pub struct Weather;

#[async_trait]
impl Tool for Weather {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Tool to get weather in certain city."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": {"type": "string"}
            },
            "required": ["city"]
        })
    }

    // TODO: query a real weather API once one is configured
    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let city = args
            .get("city")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments {
                tool: self.name().to_string(),
                reason: "missing string field `city`".to_string(),
            })?;
        Ok(format!("The weather in {city} is sunny."))
    }
}
