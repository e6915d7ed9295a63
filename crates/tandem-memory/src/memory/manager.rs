//! Memory manager - one handle over every tier

use super::episodic::{ActivitySummary, EpisodicMemory, TimeRange};
use super::procedural::{ProceduralMemory, Rule};
use super::semantic::{Preference, SemanticMemory};
use super::shared::SharedMemory;
use super::working::WorkingMemory;
use crate::config::MemorySettings;
use crate::embedding::EmbeddingProvider;
use crate::error::MemoryResult;
use crate::storage::StorageAdapter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Everything long-term memory knows about a user
#[derive(Debug, Clone)]
pub struct UserMemoryProfile {
    pub user_id: String,
    pub preferences: Vec<Preference>,
    pub rules: Vec<Rule>,
    pub action_summary: ActivitySummary,
}

/// Record counts per tier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Live working-memory entries of the session
    pub working: usize,
    /// Live handoffs of the session
    pub handoffs: usize,
    /// Recorded actions of the user
    pub episodic: usize,
    /// Preferences of the user
    pub semantic: usize,
    /// Rules of the user
    pub procedural: usize,
}

/// What a session clear removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClearReport {
    pub working_deleted: usize,
    pub shared_deleted: usize,
}

/// Owns the working, long-term and shared memory tiers
pub struct MemoryManager {
    working: WorkingMemory,
    episodic: EpisodicMemory,
    semantic: SemanticMemory,
    procedural: ProceduralMemory,
    shared: SharedMemory,
}

impl MemoryManager {
    /// Create a manager over one storage backend
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: &MemorySettings,
    ) -> Self {
        tracing::debug!(backend = storage.backend_name(), "Creating memory manager");

        Self {
            working: WorkingMemory::new(Arc::clone(&storage), settings.working_ttl()),
            episodic: EpisodicMemory::new(Arc::clone(&storage), embedder),
            semantic: SemanticMemory::new(Arc::clone(&storage)),
            procedural: ProceduralMemory::new(Arc::clone(&storage)),
            shared: SharedMemory::new(
                storage,
                settings.handoff_ttl(),
                settings.handoffs.consume_batch,
            ),
        }
    }

    /// Session context, agent scratch and pending disambiguation
    pub fn working(&self) -> &WorkingMemory {
        &self.working
    }

    /// Action log
    pub fn episodic(&self) -> &EpisodicMemory {
        &self.episodic
    }

    /// Preferences
    pub fn semantic(&self) -> &SemanticMemory {
        &self.semantic
    }

    /// Trigger rules
    pub fn procedural(&self) -> &ProceduralMemory {
        &self.procedural
    }

    /// Handoffs
    pub fn shared(&self) -> &SharedMemory {
        &self.shared
    }

    /// Preferences, rules and an all-time activity summary for a user
    pub async fn get_user_memory_profile(&self, user_id: &str) -> MemoryResult<UserMemoryProfile> {
        let (preferences, rules, action_summary) = futures::try_join!(
            self.semantic.get_preferences(user_id, None),
            self.procedural.list_rules(user_id),
            self.episodic.get_activity_summary(user_id, &TimeRange::All),
        )?;

        Ok(UserMemoryProfile {
            user_id: user_id.to_string(),
            preferences,
            rules,
            action_summary,
        })
    }

    /// Counts by tier for a session and its user
    pub async fn get_memory_stats(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> MemoryResult<MemoryStats> {
        let (working, handoffs, episodic, semantic, procedural) = futures::try_join!(
            self.working.count(session_id),
            self.shared.count(session_id),
            self.episodic.count_for_user(user_id),
            self.semantic.count_for_user(user_id),
            self.procedural.count_for_user(user_id),
        )?;

        Ok(MemoryStats {
            working,
            handoffs,
            episodic,
            semantic,
            procedural,
        })
    }

    /// Drop the session's working memory and handoffs
    ///
    /// Long-term memory is user-scoped and survives.
    pub async fn clear_session(&self, session_id: &str) -> MemoryResult<SessionClearReport> {
        let working_deleted = self.working.clear_session(session_id).await?;
        let shared_deleted = self.shared.clear_session(session_id).await?;

        tracing::info!(
            session_id = %session_id,
            working_deleted,
            shared_deleted,
            "Cleared session memory"
        );
        Ok(SessionClearReport {
            working_deleted,
            shared_deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingProvider;
    use crate::memory::{NewAction, NewHandoff, PreferenceSource};
    use crate::storage::InMemoryStorage;
    use serde_json::{json, Map};

    fn manager() -> MemoryManager {
        MemoryManager::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(HashEmbeddingProvider::new(32)),
            &MemorySettings::default(),
        )
    }

    async fn populate(manager: &MemoryManager) {
        let mut patch = Map::new();
        patch.insert("focus".to_string(), json!("docs"));
        manager.working().write_session_context("s1", patch.clone()).await.unwrap();
        manager
            .working()
            .write_agent_scratch("s1", "planner", patch)
            .await
            .unwrap();
        manager
            .shared()
            .write_handoff(NewHandoff::new("s1", "u1", "planner", "executor", "work"))
            .await
            .unwrap();
        manager
            .episodic()
            .record_action(NewAction::new("u1", "s1", "create", "task_agent"))
            .await
            .unwrap();
        manager
            .semantic()
            .record_preference("u1", "theme", "dark", PreferenceSource::Explicit, 0.9)
            .await
            .unwrap();
        manager
            .procedural()
            .record_rule("u1", "done", "complete_task", None, PreferenceSource::Explicit, 0.8)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stats_and_profile() {
        let manager = manager();
        populate(&manager).await;

        let stats = manager.get_memory_stats("s1", "u1").await.unwrap();
        assert_eq!(
            stats,
            MemoryStats {
                working: 2,
                handoffs: 1,
                episodic: 1,
                semantic: 1,
                procedural: 1,
            }
        );

        let profile = manager.get_user_memory_profile("u1").await.unwrap();
        assert_eq!(profile.preferences.len(), 1);
        assert_eq!(profile.rules.len(), 1);
        assert_eq!(profile.action_summary.total, 1);
    }

    #[tokio::test]
    async fn test_clear_session_keeps_long_term_memory() {
        let manager = manager();
        populate(&manager).await;

        let report = manager.clear_session("s1").await.unwrap();
        assert_eq!(report.working_deleted, 2);
        assert_eq!(report.shared_deleted, 1);

        let stats = manager.get_memory_stats("s1", "u1").await.unwrap();
        assert_eq!(stats.working, 0);
        assert_eq!(stats.handoffs, 0);
        assert_eq!(stats.episodic, 1);
        assert_eq!(stats.semantic, 1);
        assert_eq!(stats.procedural, 1);
    }
}
