//! End-to-end scenarios over the public API

use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tandem_memory::config::MemorySettings;
use tandem_memory::embedding::{
    EmbeddingProvider, HashEmbeddingProvider, StaticEmbeddingProvider, UnavailableEmbeddingProvider,
};
use tandem_memory::entity::{EntityKind, NewTask};
use tandem_memory::memory::{MemoryManager, NewAction, NewHandoff, PreferenceSource, TimeRange};
use tandem_memory::search::similarity::combined_score;
use tandem_memory::search::{MatchResult, ResolveRequest};
use tandem_memory::services::MemoryServices;
use tandem_memory::storage::{InMemoryStorage, StorageAdapter};
use tokio_test::{assert_err, assert_ok};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn services_with(embedder: StaticEmbeddingProvider) -> MemoryServices {
    MemoryServices::new(
        Arc::new(InMemoryStorage::new()),
        Arc::new(embedder),
        MemorySettings::default(),
    )
    .unwrap()
}

fn manager() -> MemoryManager {
    MemoryManager::new(
        Arc::new(InMemoryStorage::new()),
        Arc::new(HashEmbeddingProvider::new(64)),
        &MemorySettings::default(),
    )
}

fn patch(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Unit vector at the given cosine from `[1, 0, 0]`, tilted towards `axis`
fn tilted(cosine: f32, axis: usize) -> Vec<f32> {
    let mut vector = vec![cosine, 0.0, 0.0];
    vector[axis] = (1.0 - cosine * cosine).sqrt();
    vector
}

#[tokio::test]
async fn working_memory_merge_is_idempotent() {
    init_tracing();
    let manager = manager();
    let working = manager.working();

    let first = patch(&[("project", json!("docs")), ("step", json!(1))]);
    working.write_session_context("s", first.clone()).await.unwrap();
    working.write_session_context("s", first.clone()).await.unwrap();
    assert_eq!(working.read_session_context("s").await.unwrap(), first);

    working
        .write_session_context("s", patch(&[("step", json!(2))]))
        .await
        .unwrap();
    let context = working.read_session_context("s").await.unwrap();
    assert_eq!(context.get("project"), Some(&json!("docs")));
    assert_eq!(context.get("step"), Some(&json!(2)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handoff_is_consumed_at_most_once() {
    init_tracing();
    let manager = Arc::new(manager());
    manager
        .shared()
        .write_handoff(NewHandoff::new("s", "u", "planner", "executor", "task_created"))
        .await
        .unwrap();

    let readers: Vec<_> = (0..16)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.shared().read_handoff("s", "executor", true).await })
        })
        .collect();

    let mut delivered = 0;
    for reader in readers {
        if reader.await.unwrap().unwrap().is_some() {
            delivered += 1;
        }
    }
    assert_eq!(delivered, 1);
    assert!(!manager.shared().check_pending("s", "executor").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_split_a_queue_without_duplicates() {
    let manager = Arc::new(manager());
    for n in 0..6 {
        manager
            .shared()
            .write_handoff(
                NewHandoff::new("s", "u", "planner", "executor", "work")
                    .with_payload(json!({ "n": n })),
            )
            .await
            .unwrap();
    }

    let readers: Vec<_> = (0..10)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.shared().read_handoff("s", "executor", true).await })
        })
        .collect();

    let mut ids = Vec::new();
    for reader in readers {
        if let Some(handoff) = reader.await.unwrap().unwrap() {
            ids.push(handoff.id);
        }
    }
    assert_eq!(ids.len(), 6);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 6);
}

#[tokio::test]
async fn preference_upsert_on_identical_input() {
    let manager = manager();
    for _ in 0..2 {
        manager
            .semantic()
            .record_preference("u", "k", "v", PreferenceSource::Explicit, 0.9)
            .await
            .unwrap();
    }

    let preferences = manager.semantic().get_preferences("u", None).await.unwrap();
    assert_eq!(preferences.len(), 1);
    assert_eq!(preferences[0].value, json!("v"));
    assert_eq!(preferences[0].confidence, 0.9);
    assert_eq!(preferences[0].times_used, 2);
}

#[tokio::test]
async fn rule_triggers_are_case_insensitive() {
    let manager = manager();
    let id = manager
        .procedural()
        .record_rule("u", "done", "complete_task", None, PreferenceSource::Explicit, 0.8)
        .await
        .unwrap();

    for trigger in ["DONE", "done", " Done "] {
        let rule = manager
            .procedural()
            .get_rule_for_trigger("u", trigger)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rule.id, id);
    }
}

#[tokio::test]
async fn resolver_threshold_is_inclusive() {
    let services = services_with(
        StaticEmbeddingProvider::new(3)
            .with_vector("weekly report", vec![1.0, 0.0, 0.0])
            .with_vector("report", tilted(0.7, 1)),
    );
    services
        .entities()
        .create_task(NewTask::new("Weekly report"))
        .await
        .unwrap();

    let probe = services
        .resolver()
        .resolve(&ResolveRequest::task("report").with_threshold(0.0))
        .await
        .unwrap();
    let exact = probe.confidence;

    let at = services
        .resolver()
        .resolve(&ResolveRequest::task("report").with_threshold(exact))
        .await
        .unwrap();
    assert!(at.is_match());
    assert_eq!(at.confidence, exact);
}

#[tokio::test]
async fn resolver_with_no_entities() {
    let services = services_with(StaticEmbeddingProvider::new(3));
    for kind in [EntityKind::Task, EntityKind::Project] {
        let result = services
            .resolver()
            .resolve(&ResolveRequest::new("anything at all", kind))
            .await
            .unwrap();
        assert_eq!(result, MatchResult::empty());
    }
}

#[tokio::test]
async fn resolver_combines_scores_sixty_forty() {
    let services = services_with(
        StaticEmbeddingProvider::new(3)
            .with_vector("ship it", vec![1.0, 0.0, 0.0])
            .with_vector("ship the installer", tilted(0.5, 1))
            .with_vector("shipping labels", tilted(0.25, 2)),
    );
    for title in ["Ship the installer", "Shipping labels"] {
        services
            .entities()
            .create_task(NewTask::new(title))
            .await
            .unwrap();
    }

    let result = services
        .resolver()
        .resolve(&ResolveRequest::task("ship it").with_threshold(1.0))
        .await
        .unwrap();
    assert_eq!(result.alternatives.len(), 2);
    for candidate in &result.alternatives {
        let expected = 0.6 * candidate.vector_score + 0.4 * candidate.lexical_score;
        assert!((candidate.score - expected).abs() < 1e-9);
        let fused = combined_score(candidate.vector_score, candidate.lexical_score);
        assert!((candidate.score - fused).abs() < 1e-12);
    }
    assert!((result.alternatives[0].vector_score - 0.5).abs() < 1e-6);
    assert!((result.alternatives[1].vector_score - 0.25).abs() < 1e-6);
}

#[tokio::test]
async fn clear_session_keeps_long_term_memory() {
    let manager = manager();
    manager
        .working()
        .write_session_context("s", patch(&[("a", json!(1))]))
        .await
        .unwrap();
    manager
        .working()
        .write_agent_scratch("s", "planner", patch(&[("b", json!(2))]))
        .await
        .unwrap();
    manager
        .shared()
        .write_handoff(NewHandoff::new("s", "u", "planner", "executor", "work"))
        .await
        .unwrap();
    manager
        .episodic()
        .record_action(NewAction::new("u", "s", "create", "planner"))
        .await
        .unwrap();
    manager
        .semantic()
        .record_preference("u", "theme", "dark", PreferenceSource::Explicit, 1.0)
        .await
        .unwrap();
    manager
        .procedural()
        .record_rule("u", "done", "complete_task", None, PreferenceSource::Explicit, 0.8)
        .await
        .unwrap();
    // Another session of the same user is untouched
    manager
        .working()
        .write_session_context("other", patch(&[("a", json!(1))]))
        .await
        .unwrap();

    manager.clear_session("s").await.unwrap();

    assert!(manager.working().read_session_context("s").await.unwrap().is_empty());
    assert!(manager
        .working()
        .read_agent_scratch("s", "planner")
        .await
        .unwrap()
        .is_empty());
    assert!(manager.shared().read_handoff("s", "executor", false).await.unwrap().is_none());
    assert_eq!(manager.working().count("other").await.unwrap(), 1);

    let profile = manager.get_user_memory_profile("u").await.unwrap();
    assert_eq!(profile.preferences.len(), 1);
    assert_eq!(profile.rules.len(), 1);
    assert_eq!(profile.action_summary.total, 1);
}

#[tokio::test]
async fn checkpointer_reference_resolves() {
    init_tracing();
    let services = services_with(
        StaticEmbeddingProvider::new(3)
            .with_vector("implement mongodb checkpointer for langgraph", vec![1.0, 0.0, 0.0])
            .with_vector("checkpointer task", tilted(0.85, 1))
            .with_vector("plan team offsite", vec![0.0, 0.0, 1.0])
            .with_vector("renew passport", vec![0.0, 1.0, 0.0]),
    );
    let target = services
        .entities()
        .create_task(NewTask::new("Implement MongoDB checkpointer for LangGraph"))
        .await
        .unwrap();
    for title in ["Plan team offsite", "Renew passport"] {
        services
            .entities()
            .create_task(NewTask::new(title))
            .await
            .unwrap();
    }

    let result = services
        .resolver()
        .resolve(&ResolveRequest::task("checkpointer task").with_threshold(0.6))
        .await
        .unwrap();

    let matched = result.matched.expect("checkpointer task should resolve");
    assert_eq!(matched.entity.id, target.id);
    assert!(result.confidence >= 0.6);
    assert!(matched.lexical_score > 0.3);
    assert!(result.alternatives.is_empty());
}

#[tokio::test]
async fn near_tie_is_reported_as_alternative() {
    let services = services_with(
        StaticEmbeddingProvider::new(3)
            .with_vector("api doc", vec![1.0, 0.0, 0.0])
            .with_vector("api documentation", tilted(0.9, 1))
            .with_vector("api design doc", tilted(0.9, 2)),
    );
    let documentation = services
        .entities()
        .create_task(NewTask::new("API documentation"))
        .await
        .unwrap();
    let design = services
        .entities()
        .create_task(NewTask::new("API design doc"))
        .await
        .unwrap();

    let result = services
        .resolver()
        .resolve(&ResolveRequest::task("API doc"))
        .await
        .unwrap();

    // Equal vector similarity; "API design doc" is closer lexically
    let matched = result.matched.as_ref().unwrap();
    assert_eq!(matched.entity.id, design.id);
    assert_eq!(result.alternatives.len(), 1);
    assert_eq!(result.alternatives[0].entity.id, documentation.id);
    assert!(result.confidence - result.alternatives[0].score <= 0.1);
    assert!(result.needs_disambiguation());
}

#[tokio::test]
async fn failed_embedding_is_an_error_not_an_empty_result() {
    let services = MemoryServices::new(
        Arc::new(InMemoryStorage::new()),
        Arc::new(UnavailableEmbeddingProvider),
        MemorySettings::default(),
    )
    .unwrap();

    let err = assert_err!(
        services
            .resolver()
            .resolve(&ResolveRequest::task("anything"))
            .await
    );
    assert!(err.is_embedding_failure());

    let err = assert_err!(services.search().search("anything", EntityKind::Task, 5).await);
    assert!(err.is_upstream());
}

#[tokio::test]
async fn optional_embeddings_degrade_gracefully() {
    init_tracing();
    let storage: Arc<dyn StorageAdapter> = Arc::new(InMemoryStorage::new());
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(UnavailableEmbeddingProvider);
    let manager = MemoryManager::new(storage, embedder, &MemorySettings::default());

    let record = assert_ok!(
        manager
            .episodic()
            .record_action(NewAction::new("u", "s", "complete", "executor"))
            .await
    );
    assert!(record.embedding.is_none());

    let history = manager
        .episodic()
        .get_action_history("u", &TimeRange::Today)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    assert!(manager
        .episodic()
        .recall_similar_actions("u", "complete", 5)
        .await
        .unwrap_err()
        .is_embedding_failure());
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use tandem_memory::storage::SqliteStorage;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn handoff_is_consumed_at_most_once_on_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::open(dir.path().join("memory.db")).await.unwrap();
        let manager = Arc::new(MemoryManager::new(
            Arc::new(storage),
            Arc::new(HashEmbeddingProvider::new(32)),
            &MemorySettings::default(),
        ));
        manager
            .shared()
            .write_handoff(NewHandoff::new("s", "u", "planner", "executor", "task_created"))
            .await
            .unwrap();

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(
                    async move { manager.shared().read_handoff("s", "executor", true).await },
                )
            })
            .collect();

        let mut delivered = 0;
        for reader in readers {
            if reader.await.unwrap().unwrap().is_some() {
                delivered += 1;
            }
        }
        assert_eq!(delivered, 1);
    }
}
