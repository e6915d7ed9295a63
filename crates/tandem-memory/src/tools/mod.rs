//! # Agent Tools
//!
//! The orchestration loop exposes memory, resolution and retrieval to its
//! agents as named tools. Each tool is a [`ToolHandler`] with a JSON input
//! schema; the [`ToolRegistry`] maps a [`ToolName`] to its handler and is
//! built once at startup.
//!
//! ```rust,no_run
//! use tandem_memory::config::MemorySettings;
//! use tandem_memory::services::MemoryServices;
//! use tandem_memory::tools::{AgentContext, ToolRegistry};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let services = Arc::new(MemoryServices::in_memory(MemorySettings::default())?);
//! let registry = ToolRegistry::with_builtin_tools();
//! let ctx = AgentContext::new(services, "session-1", "alice", "planner");
//!
//! let output = registry
//!     .call(&ctx, "resolve_entity", json!({ "reference": "the checkpointer task" }))
//!     .await?;
//! println!("{output}");
//! # Ok(())
//! # }
//! ```

mod builtin;

pub use builtin::{
    ChooseDisambiguationTool, ReceiveHandoffTool, RecallPreferencesTool, RememberPreferenceTool,
    ResolveEntityTool, SearchEntitiesTool, SendHandoffTool,
};

use crate::error::{MemoryError, MemoryResult};
use crate::services::MemoryServices;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Identifies a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ResolveEntity,
    ChooseDisambiguation,
    SearchEntities,
    RememberPreference,
    RecallPreferences,
    SendHandoff,
    ReceiveHandoff,
}

impl ToolName {
    /// Every built-in tool
    pub const ALL: [ToolName; 7] = [
        ToolName::ResolveEntity,
        ToolName::ChooseDisambiguation,
        ToolName::SearchEntities,
        ToolName::RememberPreference,
        ToolName::RecallPreferences,
        ToolName::SendHandoff,
        ToolName::ReceiveHandoff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::ResolveEntity => "resolve_entity",
            ToolName::ChooseDisambiguation => "choose_disambiguation",
            ToolName::SearchEntities => "search_entities",
            ToolName::RememberPreference => "remember_preference",
            ToolName::RecallPreferences => "recall_preferences",
            ToolName::SendHandoff => "send_handoff",
            ToolName::ReceiveHandoff => "receive_handoff",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|name| name.as_str() == s.trim())
            .ok_or_else(|| MemoryError::validation("tool", format!("unknown tool '{}'", s.trim())))
    }
}

/// Who is calling a tool, and with which services
#[derive(Clone)]
pub struct AgentContext {
    /// Shared memory, resolver and search
    pub services: Arc<MemoryServices>,

    /// Conversation session
    pub session_id: String,

    /// End user the session belongs to
    pub user_id: String,

    /// Agent making the call
    pub agent_name: String,
}

impl AgentContext {
    pub fn new(
        services: Arc<MemoryServices>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            services,
            session_id: session_id.into(),
            user_id: user_id.into(),
            agent_name: agent_name.into(),
        }
    }

    /// Same session and user, acting as another agent
    pub fn as_agent(&self, agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            ..self.clone()
        }
    }
}

/// Tool description for a language model's tool list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: ToolName,
    pub description: String,
    pub input_schema: Value,
}

/// A callable tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Tool identifier
    fn name(&self) -> ToolName;

    /// What the tool does, for the model
    fn description(&self) -> &'static str;

    /// JSON schema of the input object
    fn input_schema(&self) -> Value;

    /// Run the tool
    async fn call(&self, ctx: &AgentContext, input: Value) -> MemoryResult<Value>;
}

/// Deserialize a tool input, reporting failures as validation errors
pub(crate) fn parse_input<T: DeserializeOwned>(tool: ToolName, input: Value) -> MemoryResult<T> {
    // Tools without arguments may be called with null
    let input = if input.is_null() {
        Value::Object(Default::default())
    } else {
        input
    };
    serde_json::from_value(input).map_err(|e| MemoryError::validation(tool.as_str(), e.to_string()))
}

/// Serialize a tool output
pub(crate) fn to_output<T: Serialize>(tool: ToolName, output: &T) -> MemoryResult<Value> {
    serde_json::to_value(output).map_err(|e| MemoryError::serialization(tool.as_str(), e))
}

/// Tool name -> handler dispatch table
#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<ToolName, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ResolveEntityTool));
        registry.register(Arc::new(ChooseDisambiguationTool));
        registry.register(Arc::new(SearchEntitiesTool));
        registry.register(Arc::new(RememberPreferenceTool));
        registry.register(Arc::new(RecallPreferencesTool));
        registry.register(Arc::new(SendHandoffTool));
        registry.register(Arc::new(ReceiveHandoffTool));
        registry
    }

    /// Register a handler, replacing any handler with the same name
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.name();
        if self.handlers.insert(name, handler).is_some() {
            tracing::debug!(tool = %name, "Replaced tool handler");
        }
    }

    /// Handler for a tool
    pub fn get(&self, name: ToolName) -> Option<&Arc<dyn ToolHandler>> {
        self.handlers.get(&name)
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Definitions of every registered tool, ordered by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .handlers
            .values()
            .map(|handler| ToolDefinition {
                name: handler.name(),
                description: handler.description().to_string(),
                input_schema: handler.input_schema(),
            })
            .collect();
        definitions.sort_by_key(|definition| definition.name);
        definitions
    }

    /// Dispatch a call by tool name
    pub async fn call(&self, ctx: &AgentContext, tool: &str, input: Value) -> MemoryResult<Value> {
        let name: ToolName = tool.parse()?;
        let handler = self.get(name).ok_or_else(|| {
            MemoryError::validation("tool", format!("tool '{name}' is not registered"))
        })?;

        tracing::debug!(
            tool = %name,
            session_id = %ctx.session_id,
            agent = %ctx.agent_name,
            "Calling tool"
        );
        handler.call(ctx, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySettings;
    use serde_json::json;

    fn context() -> AgentContext {
        let services = MemoryServices::in_memory(MemorySettings::default()).unwrap();
        AgentContext::new(Arc::new(services), "s1", "u1", "planner")
    }

    #[test]
    fn test_tool_names_round_trip() {
        for name in ToolName::ALL {
            assert_eq!(name.as_str().parse::<ToolName>().unwrap(), name);
            assert_eq!(serde_json::to_value(name).unwrap(), json!(name.as_str()));
        }
        assert!("drop_tables".parse::<ToolName>().unwrap_err().is_validation());
    }

    #[test]
    fn test_builtin_registry_lists_all_tools() {
        let registry = ToolRegistry::with_builtin_tools();
        assert_eq!(registry.len(), ToolName::ALL.len());

        let definitions = registry.definitions();
        let names: Vec<_> = definitions.iter().map(|d| d.name).collect();
        assert_eq!(names, ToolName::ALL.to_vec());
        for definition in &definitions {
            assert_eq!(definition.input_schema["type"], json!("object"));
            assert!(!definition.description.is_empty());
        }
    }

    #[tokio::test]
    async fn test_unknown_or_unregistered_tool_is_rejected() {
        let ctx = context();
        let err = ToolRegistry::with_builtin_tools()
            .call(&ctx, "format_disk", json!({}))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = ToolRegistry::new()
            .call(&ctx, "send_handoff", json!({}))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_malformed_input_is_a_validation_error() {
        let ctx = context();
        let err = ToolRegistry::with_builtin_tools()
            .call(&ctx, "remember_preference", json!({ "key": 7 }))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
