//! # Memory Tiers Demo
//!
//! Walks one planning session through every part of the memory subsystem:
//!
//! ### 1. Entities and Resolution
//! - Creating projects and tasks (embedded on write)
//! - Resolving "the checkpointer task" to a stored task
//! - Near ties stored as a pending disambiguation and chosen by index
//!
//! ### 2. Hybrid Search
//! - Fused vector + fuzzy text ranking, and the text-only fallback
//!
//! ### 3. Memory Tiers
//! - Session context, episodic log, preferences, rules
//! - Agent-to-agent handoff consumed exactly once
//!
//! ## Run This Example
//!
//! ```bash
//! cargo run --example memory_tiers_demo
//!
//! # With debug logs
//! RUST_LOG=tandem_memory=debug cargo run --example memory_tiers_demo
//! ```

use serde_json::{json, Map};
use std::sync::Arc;
use tandem_memory::config::MemorySettings;
use tandem_memory::entity::{EntityKind, NewProject, NewTask};
use tandem_memory::memory::{NewAction, NewHandoff, PreferenceSource, TimeRange};
use tandem_memory::search::{ResolveRequest, ScopeHint, SearchMode};
use tandem_memory::services::MemoryServices;
use tandem_memory::tools::{AgentContext, ToolRegistry};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SESSION: &str = "demo-session";
const USER: &str = "alice";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== Memory Tiers Demo ===");

    let services = Arc::new(MemoryServices::in_memory(MemorySettings::load(None)?)?);

    info!("=== 1. Entities and Resolution ===");
    demo_resolution(&services).await?;

    info!("=== 2. Hybrid Search ===");
    demo_search(&services).await?;

    info!("=== 3. Memory Tiers ===");
    demo_tiers(&services).await?;

    info!("=== 4. Agent Tools ===");
    demo_tools(Arc::clone(&services)).await?;

    let stats = services.manager().get_memory_stats(SESSION, USER).await?;
    info!(?stats, "Memory before clearing the session");

    let report = services.manager().clear_session(SESSION).await?;
    let stats = services.manager().get_memory_stats(SESSION, USER).await?;
    info!(?report, ?stats, "Session cleared, long-term memory kept");

    info!("=== Demo Complete ===");
    Ok(())
}

async fn demo_resolution(services: &MemoryServices) -> anyhow::Result<()> {
    let entities = services.entities();
    let langgraph = entities
        .create_project(NewProject::new("LangGraph integrations"))
        .await?;
    entities
        .create_task(
            NewTask::new("Implement MongoDB checkpointer for LangGraph")
                .in_project(langgraph.id.clone()),
        )
        .await?;
    entities.create_task(NewTask::new("API documentation")).await?;
    entities.create_task(NewTask::new("API design doc")).await?;
    entities.create_task(NewTask::new("Plan team offsite")).await?;

    for reference in ["checkpointer task", "API doc", "quarterly taxes"] {
        let result = services
            .resolver()
            .resolve(&ResolveRequest::task(reference))
            .await?;
        info!(
            reference,
            matched = result.matched.as_ref().map(|c| c.entity.display_name.as_str()),
            confidence = result.confidence,
            alternatives = result.alternatives.len(),
            "Resolved"
        );
    }

    let scoped = services
        .resolver()
        .resolve(
            &ResolveRequest::task("mongo checkpointer")
                .with_scope(ScopeHint::ProjectName("langgraph".to_string())),
        )
        .await?;
    info!(
        matched = scoped.matched.as_ref().map(|c| c.entity.display_name.as_str()),
        "Resolved within project scope"
    );
    Ok(())
}

async fn demo_search(services: &MemoryServices) -> anyhow::Result<()> {
    for mode in [SearchMode::Hybrid, SearchMode::VectorOnly, SearchMode::TextOnly] {
        let response = services
            .search()
            .search_with_mode("api docs", EntityKind::Task, 3, mode)
            .await?;
        let titles: Vec<_> = response
            .hits
            .iter()
            .map(|hit| hit.entity.display_name.as_str())
            .collect();
        info!(%mode, ?titles, timings = ?response.timings, "Search results");
    }
    Ok(())
}

async fn demo_tiers(services: &MemoryServices) -> anyhow::Result<()> {
    let manager = services.manager();

    let mut context = Map::new();
    context.insert("focus".to_string(), json!("documentation sprint"));
    manager.working().write_session_context(SESSION, context).await?;
    let context = manager.working().read_session_context(SESSION).await?;
    info!(?context, "Session context");

    manager
        .episodic()
        .record_action(NewAction::new(USER, SESSION, "task_created", "planner"))
        .await?;
    manager
        .episodic()
        .record_action(NewAction::new(USER, SESSION, "task_completed", "executor"))
        .await?;
    let summary = manager
        .episodic()
        .get_activity_summary(USER, &TimeRange::Today)
        .await?;
    info!(total = summary.total, by_type = ?summary.by_type, "Today's activity");

    manager
        .semantic()
        .record_preference(USER, "default_priority", "high", PreferenceSource::Explicit, 0.9)
        .await?;
    manager
        .procedural()
        .record_rule(USER, "done", "complete_task", None, PreferenceSource::Explicit, 0.8)
        .await?;
    let rule = manager.procedural().get_rule_for_trigger(USER, "DONE").await?;
    info!(action = rule.as_ref().map(|r| r.action_type.as_str()), "Rule for 'DONE'");

    let id = manager
        .shared()
        .write_handoff(
            NewHandoff::new(SESSION, USER, "planner", "executor", "task_created")
                .with_payload(json!({ "title": "API documentation" })),
        )
        .await?;
    let first = manager.shared().read_handoff(SESSION, "executor", true).await?;
    let second = manager.shared().read_handoff(SESSION, "executor", true).await?;
    info!(
        %id,
        first_read = first.is_some(),
        second_read = second.is_some(),
        "Handoff consumed once"
    );
    Ok(())
}

async fn demo_tools(services: Arc<MemoryServices>) -> anyhow::Result<()> {
    let registry = ToolRegistry::with_builtin_tools();
    let ctx = AgentContext::new(services, SESSION, USER, "planner");

    let resolved = registry
        .call(&ctx, "resolve_entity", json!({ "reference": "API doc", "threshold": 0.5 }))
        .await?;
    info!(status = %resolved["status"], "resolve_entity");

    if resolved["awaiting_choice"] == json!(true) {
        let chosen = registry
            .call(&ctx, "choose_disambiguation", json!({ "index": 0 }))
            .await?;
        info!(chosen = %chosen["display_name"], "choose_disambiguation");
    }
    Ok(())
}
