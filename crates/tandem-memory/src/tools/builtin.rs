//! Built-in memory tools

use super::{parse_input, to_output, AgentContext, ToolHandler, ToolName};
use crate::entity::EntityKind;
use crate::error::MemoryResult;
use crate::memory::{HandoffPriority, NewHandoff, PreferenceSource};
use crate::search::{EntityCandidate, ResolveRequest, ScopeHint, SearchMode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// `{ field: value }`
fn wrap<T: Serialize>(tool: ToolName, field: &str, value: &T) -> MemoryResult<Value> {
    let mut output = Map::new();
    output.insert(field.to_string(), to_output(tool, value)?);
    Ok(Value::Object(output))
}

fn default_entity_kind() -> EntityKind {
    EntityKind::Task
}

/// Resolve an informal reference to one task or project
pub struct ResolveEntityTool;

#[derive(Debug, Deserialize)]
struct ResolveEntityInput {
    reference: String,
    #[serde(default = "default_entity_kind")]
    entity_type: EntityKind,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    threshold: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum ResolveStatus {
    Matched,
    Ambiguous,
    NotFound,
}

#[derive(Debug, Serialize)]
struct ResolveEntityOutput {
    status: ResolveStatus,
    confidence: f64,
    #[serde(rename = "match")]
    matched: Option<EntityCandidate>,
    alternatives: Vec<EntityCandidate>,
    /// True when the options were stored for `choose_disambiguation`
    awaiting_choice: bool,
}

#[async_trait]
impl ToolHandler for ResolveEntityTool {
    fn name(&self) -> ToolName {
        ToolName::ResolveEntity
    }

    fn description(&self) -> &'static str {
        "Find the task or project the user is referring to. When several entities fit, \
         the options are saved and the user should be asked to choose one."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reference": {
                    "type": "string",
                    "description": "The user's wording, e.g. 'the API doc task'"
                },
                "entity_type": { "type": "string", "enum": ["task", "project"], "default": "task" },
                "project": {
                    "type": "string",
                    "description": "Informal project name to search within"
                },
                "project_id": {
                    "type": "string",
                    "description": "Exact project id to search within"
                },
                "threshold": { "type": "number", "minimum": 0, "maximum": 1 }
            },
            "required": ["reference"]
        })
    }

    async fn call(&self, ctx: &AgentContext, input: Value) -> MemoryResult<Value> {
        let input: ResolveEntityInput = parse_input(self.name(), input)?;

        let mut request = ResolveRequest::new(input.reference.as_str(), input.entity_type);
        if let Some(project_id) = input.project_id {
            request = request.with_scope(ScopeHint::ProjectId(project_id));
        } else if let Some(project) = input.project {
            request = request.with_scope(ScopeHint::ProjectName(project));
        }
        if let Some(threshold) = input.threshold {
            request = request.with_threshold(threshold);
        }

        let result = ctx.services.resolver().resolve(&request).await?;

        let awaiting_choice = result.needs_disambiguation();
        if awaiting_choice {
            ctx.services
                .manager()
                .working()
                .store_disambiguation(
                    &ctx.session_id,
                    &input.reference,
                    result.disambiguation_candidates(),
                    &ctx.agent_name,
                )
                .await?;
        }

        let status = match (&result.matched, awaiting_choice) {
            (Some(_), false) => ResolveStatus::Matched,
            (_, true) => ResolveStatus::Ambiguous,
            (None, false) => ResolveStatus::NotFound,
        };
        to_output(
            self.name(),
            &ResolveEntityOutput {
                status,
                confidence: result.confidence,
                matched: result.matched,
                alternatives: result.alternatives,
                awaiting_choice,
            },
        )
    }
}

/// Apply the user's pick from the pending options
pub struct ChooseDisambiguationTool;

#[derive(Debug, Deserialize)]
struct ChooseDisambiguationInput {
    index: usize,
}

#[async_trait]
impl ToolHandler for ChooseDisambiguationTool {
    fn name(&self) -> ToolName {
        ToolName::ChooseDisambiguation
    }

    fn description(&self) -> &'static str {
        "Select one of the options offered for an ambiguous reference, by 0-based position."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "index": { "type": "integer", "minimum": 0 }
            },
            "required": ["index"]
        })
    }

    async fn call(&self, ctx: &AgentContext, input: Value) -> MemoryResult<Value> {
        let input: ChooseDisambiguationInput = parse_input(self.name(), input)?;
        let chosen = ctx
            .services
            .manager()
            .working()
            .resolve_disambiguation(&ctx.session_id, input.index)
            .await?;
        to_output(self.name(), &chosen)
    }
}

/// Ranked keyword + semantic search over tasks or projects
pub struct SearchEntitiesTool;

fn default_search_limit() -> usize {
    10
}

#[derive(Debug, Deserialize)]
struct SearchEntitiesInput {
    query: String,
    #[serde(default = "default_entity_kind")]
    entity_type: EntityKind,
    #[serde(default = "default_search_limit")]
    limit: usize,
    #[serde(default)]
    mode: SearchMode,
}

#[async_trait]
impl ToolHandler for SearchEntitiesTool {
    fn name(&self) -> ToolName {
        ToolName::SearchEntities
    }

    fn description(&self) -> &'static str {
        "Search tasks or projects by meaning and keywords, best matches first."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "entity_type": { "type": "string", "enum": ["task", "project"], "default": "task" },
                "limit": { "type": "integer", "minimum": 1, "default": 10 },
                "mode": {
                    "type": "string",
                    "enum": ["hybrid", "vector_only", "text_only"],
                    "default": "hybrid"
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, ctx: &AgentContext, input: Value) -> MemoryResult<Value> {
        let input: SearchEntitiesInput = parse_input(self.name(), input)?;
        let response = ctx
            .services
            .search()
            .search_with_mode(&input.query, input.entity_type, input.limit, input.mode)
            .await?;
        to_output(self.name(), &response)
    }
}

/// Store a user preference
pub struct RememberPreferenceTool;

fn default_source() -> PreferenceSource {
    PreferenceSource::Explicit
}

fn default_confidence() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct RememberPreferenceInput {
    key: String,
    value: Value,
    #[serde(default = "default_source")]
    source: PreferenceSource,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

#[async_trait]
impl ToolHandler for RememberPreferenceTool {
    fn name(&self) -> ToolName {
        ToolName::RememberPreference
    }

    fn description(&self) -> &'static str {
        "Remember a user preference. Writing an existing key replaces its value."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string" },
                "value": {},
                "source": {
                    "type": "string",
                    "enum": ["explicit", "inferred"],
                    "default": "explicit"
                },
                "confidence": { "type": "number", "minimum": 0, "maximum": 1, "default": 1.0 }
            },
            "required": ["key", "value"]
        })
    }

    async fn call(&self, ctx: &AgentContext, input: Value) -> MemoryResult<Value> {
        let input: RememberPreferenceInput = parse_input(self.name(), input)?;
        let id = ctx
            .services
            .manager()
            .semantic()
            .record_preference(
                &ctx.user_id,
                &input.key,
                input.value,
                input.source,
                input.confidence,
            )
            .await?;
        wrap(self.name(), "id", &id)
    }
}

/// Read one preference or all of them
pub struct RecallPreferencesTool;

#[derive(Debug, Deserialize)]
struct RecallPreferencesInput {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    min_confidence: Option<f64>,
}

#[async_trait]
impl ToolHandler for RecallPreferencesTool {
    fn name(&self) -> ToolName {
        ToolName::RecallPreferences
    }

    fn description(&self) -> &'static str {
        "Look up the user's stored preferences, or a single one by key."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string" },
                "min_confidence": { "type": "number", "minimum": 0, "maximum": 1 }
            }
        })
    }

    async fn call(&self, ctx: &AgentContext, input: Value) -> MemoryResult<Value> {
        let input: RecallPreferencesInput = parse_input(self.name(), input)?;
        let semantic = ctx.services.manager().semantic();

        match input.key {
            Some(key) => {
                let preference = semantic.get_preference(&ctx.user_id, &key).await?;
                wrap(self.name(), "preference", &preference)
            }
            None => {
                let preferences = semantic
                    .get_preferences(&ctx.user_id, input.min_confidence)
                    .await?;
                wrap(self.name(), "preferences", &preferences)
            }
        }
    }
}

/// Leave a message for another agent in this session
pub struct SendHandoffTool;

#[derive(Debug, Deserialize)]
struct SendHandoffInput {
    to_agent: String,
    handoff_type: String,
    #[serde(default)]
    payload: Map<String, Value>,
    #[serde(default)]
    priority: HandoffPriority,
    #[serde(default)]
    chain_id: Option<String>,
    #[serde(default)]
    parent_handoff_id: Option<String>,
}

#[async_trait]
impl ToolHandler for SendHandoffTool {
    fn name(&self) -> ToolName {
        ToolName::SendHandoff
    }

    fn description(&self) -> &'static str {
        "Hand work to another agent. The receiving agent gets the message exactly once."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to_agent": { "type": "string" },
                "handoff_type": {
                    "type": "string",
                    "description": "e.g. task_created, needs_clarification"
                },
                "payload": { "type": "object" },
                "priority": {
                    "type": "string",
                    "enum": ["low", "normal", "high", "urgent"],
                    "default": "normal"
                },
                "chain_id": { "type": "string" },
                "parent_handoff_id": { "type": "string" }
            },
            "required": ["to_agent", "handoff_type"]
        })
    }

    async fn call(&self, ctx: &AgentContext, input: Value) -> MemoryResult<Value> {
        let input: SendHandoffInput = parse_input(self.name(), input)?;

        let mut handoff = NewHandoff::new(
            ctx.session_id.as_str(),
            ctx.user_id.as_str(),
            ctx.agent_name.as_str(),
            input.to_agent,
            input.handoff_type,
        )
        .with_payload(Value::Object(input.payload))
        .with_priority(input.priority);
        if let Some(chain_id) = input.chain_id {
            handoff = handoff.in_chain(chain_id);
        }
        if let Some(parent) = input.parent_handoff_id {
            handoff = handoff.with_parent(parent);
        }

        let id = ctx.services.manager().shared().write_handoff(handoff).await?;
        wrap(self.name(), "id", &id)
    }
}

/// Take the oldest pending handoff addressed to the calling agent
pub struct ReceiveHandoffTool;

fn default_consume() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ReceiveHandoffInput {
    #[serde(default = "default_consume")]
    consume: bool,
}

#[async_trait]
impl ToolHandler for ReceiveHandoffTool {
    fn name(&self) -> ToolName {
        ToolName::ReceiveHandoff
    }

    fn description(&self) -> &'static str {
        "Receive the oldest pending handoff for this agent. Set consume=false to peek."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "consume": { "type": "boolean", "default": true }
            }
        })
    }

    async fn call(&self, ctx: &AgentContext, input: Value) -> MemoryResult<Value> {
        let input: ReceiveHandoffInput = parse_input(self.name(), input)?;
        let handoff = ctx
            .services
            .manager()
            .shared()
            .read_handoff(&ctx.session_id, &ctx.agent_name, input.consume)
            .await?;
        wrap(self.name(), "handoff", &handoff)
    }
}
