//! Working memory - short-lived per-session state
//!
//! Three kinds of entry live here, all expiring a fixed time after their last
//! write:
//!
//! - session context: `session::{session_id}::context`
//! - agent scratch: `session::{session_id}::scratch::{agent_name}`
//! - pending disambiguation: `session::{session_id}::disambiguation`
//!
//! Key segments are escaped with [`compose_key`], so ids containing `::`
//! cannot collide with another entry's key.
//!
//! Context and scratch writes merge into the stored payload key by key, so
//! concurrent writers to different keys both keep their values. The
//! disambiguation slot holds at most one candidate set and is consumed when
//! the user picks one.

use crate::entity::EntityKind;
use crate::error::{MemoryError, MemoryResult};
use crate::storage::{
    collections, compose_key, current_time, from_document, timestamp_value, Filter,
    StorageAdapter, Update,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

const KIND_CONTEXT: &str = "session_context";
const KIND_SCRATCH: &str = "agent_scratch";
const KIND_DISAMBIGUATION: &str = "pending_disambiguation";

/// An option offered to the user when a reference was ambiguous
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisambiguationCandidate {
    /// Entity id
    pub id: String,

    /// Entity class
    pub kind: EntityKind,

    /// Title or name shown to the user
    pub display_name: String,

    /// Resolver score at the time the options were offered
    pub score: f64,
}

/// The candidate set awaiting the user's choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDisambiguation {
    /// Session the question was asked in
    pub session_id: String,

    /// The reference that could not be resolved unambiguously
    pub query: String,

    /// Options in the order they were presented
    pub candidates: Vec<DisambiguationCandidate>,

    /// Agent that asked
    pub proposing_agent: String,

    /// When the options were stored
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

/// Working memory for session context, agent scratch and disambiguation
pub struct WorkingMemory {
    /// Storage backend
    storage: Arc<dyn StorageAdapter>,

    /// Lifetime of an entry after its last write
    ttl: chrono::Duration,
}

impl WorkingMemory {
    /// Create a new working memory
    pub fn new(storage: Arc<dyn StorageAdapter>, ttl: chrono::Duration) -> Self {
        Self { storage, ttl }
    }

    /// Merge `patch` into the session context, creating it if needed
    ///
    /// New keys override stored ones; other stored keys are kept. The TTL
    /// restarts on every write.
    pub async fn write_session_context(
        &self,
        session_id: &str,
        patch: Map<String, Value>,
    ) -> MemoryResult<()> {
        let filter = Self::entry_filter(session_id, KIND_CONTEXT, None);
        self.merge(&filter, patch).await?;

        tracing::debug!(session_id = %session_id, "Updated session context");
        Ok(())
    }

    /// Session context, or an empty map when absent or expired
    pub async fn read_session_context(&self, session_id: &str) -> MemoryResult<Map<String, Value>> {
        self.read_payload(&Self::entry_filter(session_id, KIND_CONTEXT, None))
            .await
    }

    /// Merge `patch` into an agent's scratch space
    pub async fn write_agent_scratch(
        &self,
        session_id: &str,
        agent_name: &str,
        patch: Map<String, Value>,
    ) -> MemoryResult<()> {
        if agent_name.trim().is_empty() {
            return Err(MemoryError::validation("agent_name", "must not be empty"));
        }

        let filter = Self::entry_filter(session_id, KIND_SCRATCH, Some(agent_name));
        self.merge(&filter, patch).await
    }

    /// An agent's scratch space, or an empty map
    pub async fn read_agent_scratch(
        &self,
        session_id: &str,
        agent_name: &str,
    ) -> MemoryResult<Map<String, Value>> {
        self.read_payload(&Self::entry_filter(session_id, KIND_SCRATCH, Some(agent_name)))
            .await
    }

    /// Store the options for an ambiguous reference, replacing any pending set
    pub async fn store_disambiguation(
        &self,
        session_id: &str,
        query: &str,
        candidates: Vec<DisambiguationCandidate>,
        proposing_agent: &str,
    ) -> MemoryResult<()> {
        if candidates.is_empty() {
            return Err(MemoryError::validation(
                "candidates",
                "a disambiguation needs at least one option",
            ));
        }

        let now = current_time();
        let candidates = serde_json::to_value(&candidates)
            .map_err(|e| MemoryError::serialization("disambiguation candidates", e))?;
        let filter = Self::entry_filter(session_id, KIND_DISAMBIGUATION, None);
        let update = Update::new()
            .set("query", query)
            .set("candidates", candidates)
            .set("proposing_agent", proposing_agent)
            .set("created_at", timestamp_value(now))
            .expire_at(now + self.ttl);

        self.storage
            .upsert(collections::WORKING, &filter, &update)
            .await?;
        tracing::debug!(
            session_id = %session_id,
            proposing_agent = %proposing_agent,
            "Stored pending disambiguation"
        );
        Ok(())
    }

    /// The pending disambiguation without consuming it
    pub async fn peek_disambiguation(
        &self,
        session_id: &str,
    ) -> MemoryResult<Option<PendingDisambiguation>> {
        let filter = Self::entry_filter(session_id, KIND_DISAMBIGUATION, None);
        self.storage
            .find_one(collections::WORKING, &filter)
            .await?
            .map(|doc| from_document(doc, "pending disambiguation"))
            .transpose()
    }

    /// Pick one option and clear the slot
    ///
    /// An invalid index leaves the slot in place so the user can choose again.
    pub async fn resolve_disambiguation(
        &self,
        session_id: &str,
        selected_index: usize,
    ) -> MemoryResult<DisambiguationCandidate> {
        let pending = self
            .peek_disambiguation(session_id)
            .await?
            .ok_or_else(|| MemoryError::not_found("pending disambiguation", session_id))?;

        let count = pending.candidates.len();
        let Some(chosen) = pending.candidates.into_iter().nth(selected_index) else {
            return Err(MemoryError::out_of_range(
                "selected_index",
                selected_index,
                format!("0..{count}"),
            ));
        };

        // Only consume the exact set that was read; a concurrent resolve or
        // overwrite means this selection no longer applies
        let filter = Self::entry_filter(session_id, KIND_DISAMBIGUATION, None)
            .eq("created_at", timestamp_value(pending.created_at));
        let deleted = self.storage.delete_many(collections::WORKING, &filter).await?;
        if deleted == 0 {
            return Err(MemoryError::not_found("pending disambiguation", session_id));
        }

        tracing::debug!(
            session_id = %session_id,
            selected_index,
            entity_id = %chosen.id,
            "Resolved disambiguation"
        );
        Ok(chosen)
    }

    /// Drop the pending disambiguation; returns whether one existed
    pub async fn clear_disambiguation(&self, session_id: &str) -> MemoryResult<bool> {
        let filter = Self::entry_filter(session_id, KIND_DISAMBIGUATION, None);
        let deleted = self
            .storage
            .delete_many(collections::WORKING, &filter)
            .await?;
        Ok(deleted > 0)
    }

    /// Delete every working-memory entry of the session
    pub async fn clear_session(&self, session_id: &str) -> MemoryResult<usize> {
        self.storage
            .delete_many(collections::WORKING, &Filter::new().eq("session_id", session_id))
            .await
    }

    /// Live entries of the session
    pub async fn count(&self, session_id: &str) -> MemoryResult<usize> {
        self.storage
            .count(collections::WORKING, &Filter::new().eq("session_id", session_id))
            .await
    }

    async fn merge(&self, filter: &Filter, patch: Map<String, Value>) -> MemoryResult<()> {
        let now = current_time();
        let mut update = Update::new()
            .set("updated_at", timestamp_value(now))
            .expire_at(now + self.ttl);

        for (key, value) in patch {
            if key.is_empty() || key.contains('.') || key.starts_with('$') {
                return Err(MemoryError::validation(
                    "patch",
                    format!("invalid key '{key}'"),
                ));
            }
            update = update.set(format!("payload.{key}"), value);
        }

        self.storage
            .upsert(collections::WORKING, filter, &update)
            .await?;
        Ok(())
    }

    async fn read_payload(&self, filter: &Filter) -> MemoryResult<Map<String, Value>> {
        let payload = self
            .storage
            .find_one(collections::WORKING, filter)
            .await?
            .and_then(|mut doc| doc.remove("payload"))
            .and_then(|payload| match payload {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default();
        Ok(payload)
    }

    /// Make a fully qualified entry key
    fn entry_key(session_id: &str, kind: &str, agent_name: Option<&str>) -> String {
        match (kind, agent_name) {
            (KIND_SCRATCH, Some(agent)) => compose_key(&["session", session_id, "scratch", agent]),
            (KIND_DISAMBIGUATION, _) => compose_key(&["session", session_id, "disambiguation"]),
            _ => compose_key(&["session", session_id, "context"]),
        }
    }

    /// Match one entry by key and by the fields the key was built from
    fn entry_filter(session_id: &str, kind: &str, agent_name: Option<&str>) -> Filter {
        let filter = Filter::by_id(Self::entry_key(session_id, kind, agent_name))
            .eq("session_id", session_id)
            .eq("kind", kind);
        match agent_name {
            Some(agent) => filter.eq("agent_name", agent),
            None => filter,
        }
    }
}
