//! Shared memory - one-time handoffs between agents
//!
//! A handoff is created pending and becomes consumed exactly once, on the
//! first consuming read by its addressee. Consumption is a compare-and-swap on
//! `status` at the storage boundary, so any number of readers racing on the
//! same `(session_id, to_agent)` queue never receive the same handoff twice.
//! Unconsumed handoffs expire after their own TTL.

use crate::entity::parse_entity_id;
use crate::error::{MemoryError, MemoryResult};
use crate::storage::{
    collections, current_time, from_document, timestamp_value, to_document, Filter, FindOptions,
    StorageAdapter, Update,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Handoff lifecycle: `pending -> consumed`, one way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    Pending,
    Consumed,
}

impl HandoffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffStatus::Pending => "pending",
            HandoffStatus::Consumed => "consumed",
        }
    }
}

impl fmt::Display for HandoffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency hint for the receiving agent; does not affect delivery order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// A stored handoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    /// Unique identifier
    #[serde(rename = "_id")]
    pub id: String,

    pub session_id: String,
    pub user_id: String,
    pub from_agent: String,
    pub to_agent: String,

    /// Kind of message ("task_created", "needs_clarification", ...)
    pub handoff_type: String,

    #[serde(default)]
    pub payload: Value,

    #[serde(default)]
    pub priority: HandoffPriority,

    pub status: HandoffStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_handoff_id: Option<String>,

    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(default, with = "chrono::serde::ts_microseconds_option")]
    pub consumed_at: Option<DateTime<Utc>>,

    /// When the handoff is reclaimed if nobody reads it
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub expires_at: DateTime<Utc>,
}

/// Input for [`SharedMemory::write_handoff`]
#[derive(Debug, Clone)]
pub struct NewHandoff {
    pub session_id: String,
    pub user_id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub handoff_type: String,
    pub payload: Value,
    pub priority: HandoffPriority,
    pub chain_id: Option<String>,
    pub parent_handoff_id: Option<String>,
}

impl NewHandoff {
    /// Create a new handoff with an empty payload
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        handoff_type: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            handoff_type: handoff_type.into(),
            payload: Value::Object(Default::default()),
            priority: HandoffPriority::default(),
            chain_id: None,
            parent_handoff_id: None,
        }
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: HandoffPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach to a chain
    pub fn in_chain(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = Some(chain_id.into());
        self
    }

    /// Reply to an earlier handoff; inherits its chain unless one is set
    pub fn with_parent(mut self, parent_handoff_id: impl Into<String>) -> Self {
        self.parent_handoff_id = Some(parent_handoff_id.into());
        self
    }
}

/// Progress of a handoff chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainStatus {
    pub chain_id: String,
    pub total: usize,
    pub pending: usize,
    pub consumed: usize,
    /// Every sender and receiver in the chain
    pub agents_involved: BTreeSet<String>,
}

/// Shared memory for agent-to-agent handoffs
pub struct SharedMemory {
    /// Storage backend
    storage: Arc<dyn StorageAdapter>,

    /// Lifetime of a handoff
    ttl: chrono::Duration,

    /// Pending handoffs fetched per consume round
    consume_batch: usize,
}

impl SharedMemory {
    /// Create a new shared memory
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        ttl: chrono::Duration,
        consume_batch: usize,
    ) -> Self {
        Self {
            storage,
            ttl,
            consume_batch: consume_batch.max(1),
        }
    }

    /// Create a pending handoff; returns its id
    pub async fn write_handoff(&self, handoff: NewHandoff) -> MemoryResult<String> {
        for (field, value) in [
            ("session_id", &handoff.session_id),
            ("from_agent", &handoff.from_agent),
            ("to_agent", &handoff.to_agent),
            ("handoff_type", &handoff.handoff_type),
        ] {
            if value.trim().is_empty() {
                return Err(MemoryError::validation(field, "must not be empty"));
            }
        }

        let mut chain_id = handoff.chain_id;
        if let Some(parent_id) = &handoff.parent_handoff_id {
            let parent = self
                .get_handoff(parent_id)
                .await?
                .ok_or_else(|| MemoryError::not_found("handoff", parent_id.clone()))?;
            if chain_id.is_none() {
                chain_id = parent.chain_id;
            }
        }

        let now = current_time();
        let record = Handoff {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: handoff.session_id,
            user_id: handoff.user_id,
            from_agent: handoff.from_agent,
            to_agent: handoff.to_agent,
            handoff_type: handoff.handoff_type,
            payload: handoff.payload,
            priority: handoff.priority,
            status: HandoffStatus::Pending,
            chain_id,
            parent_handoff_id: handoff.parent_handoff_id,
            created_at: now,
            consumed_at: None,
            expires_at: now + self.ttl,
        };

        let id = self
            .storage
            .insert(collections::HANDOFFS, to_document(&record, "handoff")?)
            .await?;
        tracing::debug!(
            handoff_id = %id,
            session_id = %record.session_id,
            from_agent = %record.from_agent,
            to_agent = %record.to_agent,
            handoff_type = %record.handoff_type,
            "Wrote handoff"
        );
        Ok(id)
    }

    /// Get a handoff by id, whatever its status
    pub async fn get_handoff(&self, id: &str) -> MemoryResult<Option<Handoff>> {
        parse_entity_id("handoff", id)?;
        self.storage
            .find_one(collections::HANDOFFS, &Filter::by_id(id.trim()))
            .await?
            .map(|doc| from_document(doc, "handoff"))
            .transpose()
    }

    /// Whether anything is waiting for `to_agent`; never consumes
    pub async fn check_pending(&self, session_id: &str, to_agent: &str) -> MemoryResult<bool> {
        let count = self
            .storage
            .count(collections::HANDOFFS, &Self::pending_filter(session_id, to_agent))
            .await?;
        Ok(count > 0)
    }

    /// Oldest pending handoff for `to_agent`, optionally consuming it
    ///
    /// With `consume`, each returned handoff is delivered to exactly one
    /// caller; a caller that loses a race moves on to the next pending one.
    pub async fn read_handoff(
        &self,
        session_id: &str,
        to_agent: &str,
        consume: bool,
    ) -> MemoryResult<Option<Handoff>> {
        let filter = Self::pending_filter(session_id, to_agent);

        if !consume {
            return self
                .oldest_pending(&filter, 1)
                .await
                .map(|batch| batch.into_iter().next());
        }

        loop {
            let batch = self.oldest_pending(&filter, self.consume_batch).await?;
            if batch.is_empty() {
                return Ok(None);
            }

            for mut handoff in batch {
                let consumed_at = current_time();
                let claimed = self
                    .storage
                    .atomic_conditional_update(
                        collections::HANDOFFS,
                        &Filter::by_id(handoff.id.as_str())
                            .eq("status", HandoffStatus::Pending.as_str()),
                        &Update::new()
                            .set("status", HandoffStatus::Consumed.as_str())
                            .set("consumed_at", timestamp_value(consumed_at)),
                    )
                    .await?;

                if claimed {
                    handoff.status = HandoffStatus::Consumed;
                    handoff.consumed_at = Some(consumed_at);
                    tracing::info!(
                        handoff_id = %handoff.id,
                        session_id = %session_id,
                        to_agent = %to_agent,
                        "Consumed handoff"
                    );
                    return Ok(Some(handoff));
                }
            }
            // Every candidate was claimed by another reader; look again
        }
    }

    /// Handoffs of a chain, oldest first
    pub async fn get_chain(&self, chain_id: &str) -> MemoryResult<Vec<Handoff>> {
        self.storage
            .find_many(
                collections::HANDOFFS,
                &Filter::new().eq("chain_id", chain_id),
                &FindOptions::new().sort_asc("created_at"),
            )
            .await?
            .into_iter()
            .map(|doc| from_document(doc, "handoff"))
            .collect()
    }

    /// Counts and participants of a chain
    pub async fn get_chain_status(&self, chain_id: &str) -> MemoryResult<ChainStatus> {
        let handoffs = self.get_chain(chain_id).await?;

        let mut status = ChainStatus {
            chain_id: chain_id.to_string(),
            total: handoffs.len(),
            ..Default::default()
        };
        for handoff in handoffs {
            match handoff.status {
                HandoffStatus::Pending => status.pending += 1,
                HandoffStatus::Consumed => status.consumed += 1,
            }
            status.agents_involved.insert(handoff.from_agent);
            status.agents_involved.insert(handoff.to_agent);
        }
        Ok(status)
    }

    /// Delete every handoff of the session, pending or consumed
    pub async fn clear_session(&self, session_id: &str) -> MemoryResult<usize> {
        self.storage
            .delete_many(collections::HANDOFFS, &Filter::new().eq("session_id", session_id))
            .await
    }

    /// Live handoffs of the session
    pub async fn count(&self, session_id: &str) -> MemoryResult<usize> {
        self.storage
            .count(collections::HANDOFFS, &Filter::new().eq("session_id", session_id))
            .await
    }

    async fn oldest_pending(&self, filter: &Filter, limit: usize) -> MemoryResult<Vec<Handoff>> {
        self.storage
            .find_many(
                collections::HANDOFFS,
                filter,
                &FindOptions::new().sort_asc("created_at").limit(limit),
            )
            .await?
            .into_iter()
            .map(|doc| from_document(doc, "handoff"))
            .collect()
    }

    fn pending_filter(session_id: &str, to_agent: &str) -> Filter {
        Filter::new()
            .eq("session_id", session_id)
            .eq("to_agent", to_agent)
            .eq("status", HandoffStatus::Pending.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use serde_json::json;

    fn shared() -> SharedMemory {
        SharedMemory::new(Arc::new(InMemoryStorage::new()), chrono::Duration::minutes(10), 16)
    }

    #[tokio::test]
    async fn test_fifo_consumption() {
        let shared = shared();
        let first = shared
            .write_handoff(
                NewHandoff::new("s1", "u1", "planner", "executor", "task_created")
                    .with_payload(json!({"task": "a"})),
            )
            .await
            .unwrap();
        let second = shared
            .write_handoff(
                NewHandoff::new("s1", "u1", "planner", "executor", "task_created")
                    .with_priority(HandoffPriority::Urgent),
            )
            .await
            .unwrap();

        assert!(shared.check_pending("s1", "executor").await.unwrap());
        assert!(!shared.check_pending("s1", "planner").await.unwrap());

        let peeked = shared.read_handoff("s1", "executor", false).await.unwrap().unwrap();
        assert_eq!(peeked.id, first);
        assert_eq!(peeked.status, HandoffStatus::Pending);

        let one = shared.read_handoff("s1", "executor", true).await.unwrap().unwrap();
        let two = shared.read_handoff("s1", "executor", true).await.unwrap().unwrap();
        assert_eq!(one.id, first);
        assert_eq!(one.payload, json!({"task": "a"}));
        assert_eq!(two.id, second);
        assert_eq!(two.status, HandoffStatus::Consumed);
        assert!(two.consumed_at.is_some());

        assert!(shared.read_handoff("s1", "executor", true).await.unwrap().is_none());
        assert!(!shared.check_pending("s1", "executor").await.unwrap());

        let stored = shared.get_handoff(&first).await.unwrap().unwrap();
        assert_eq!(stored.status, HandoffStatus::Consumed);
    }

    #[tokio::test]
    async fn test_scoped_by_session() {
        let shared = shared();
        shared
            .write_handoff(NewHandoff::new("s1", "u1", "a", "b", "note"))
            .await
            .unwrap();
        assert!(shared.read_handoff("s2", "b", true).await.unwrap().is_none());
        assert!(shared.read_handoff("s1", "b", true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_chains_and_parents() {
        let shared = shared();
        let root = shared
            .write_handoff(NewHandoff::new("s1", "u1", "router", "planner", "plan").in_chain("c1"))
            .await
            .unwrap();
        let child = shared
            .write_handoff(
                NewHandoff::new("s1", "u1", "planner", "executor", "execute").with_parent(&root),
            )
            .await
            .unwrap();

        let child = shared.get_handoff(&child).await.unwrap().unwrap();
        assert_eq!(child.chain_id.as_deref(), Some("c1"));
        assert_eq!(child.parent_handoff_id.as_deref(), Some(root.as_str()));

        shared.read_handoff("s1", "planner", true).await.unwrap();
        let status = shared.get_chain_status("c1").await.unwrap();
        assert_eq!(status.total, 2);
        assert_eq!(status.pending, 1);
        assert_eq!(status.consumed, 1);
        let agents: Vec<_> = status.agents_involved.iter().map(String::as_str).collect();
        assert_eq!(agents, vec!["executor", "planner", "router"]);

        let err = shared
            .write_handoff(NewHandoff::new("s1", "u1", "a", "b", "x").with_parent("not-a-uuid"))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidReference { .. }));

        let missing = uuid::Uuid::new_v4().to_string();
        let err = shared
            .write_handoff(NewHandoff::new("s1", "u1", "a", "b", "x").with_parent(missing))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_expired_handoffs_are_not_delivered() {
        let shared = SharedMemory::new(
            Arc::new(InMemoryStorage::new()),
            chrono::Duration::milliseconds(-1),
            16,
        );
        shared
            .write_handoff(NewHandoff::new("s1", "u1", "a", "b", "note"))
            .await
            .unwrap();
        assert!(!shared.check_pending("s1", "b").await.unwrap());
        assert!(shared.read_handoff("s1", "b", true).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_receive_distinct_handoffs() {
        let shared = Arc::new(SharedMemory::new(
            Arc::new(InMemoryStorage::new()),
            chrono::Duration::minutes(10),
            2,
        ));
        for i in 0..5 {
            shared
                .write_handoff(
                    NewHandoff::new("s1", "u1", "planner", "executor", "work")
                        .with_payload(json!({"n": i})),
                )
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..12 {
            let shared = Arc::clone(&shared);
            handles.push(tokio::spawn(async move {
                shared.read_handoff("s1", "executor", true).await.unwrap()
            }));
        }

        let mut delivered = Vec::new();
        for handle in handles {
            if let Some(handoff) = handle.await.unwrap() {
                delivered.push(handoff.id);
            }
        }
        assert_eq!(delivered.len(), 5);
        delivered.sort();
        delivered.dedup();
        assert_eq!(delivered.len(), 5);
    }
}
