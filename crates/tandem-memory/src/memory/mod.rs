//! # Agent Memory System
//!
//! Gives a stateless agent loop continuity across turns and between agents.
//!
//! ## Memory Tiers
//!
//! - **Working**: session context, per-agent scratch and the pending
//!   disambiguation slot; expires a fixed time after the last write
//! - **Episodic**: append-only log of recorded actions, user-scoped
//! - **Semantic**: `(user, key)` preferences with confidence and usage counts
//! - **Procedural**: `(user, trigger)` rules; lookups count as uses
//! - **Shared**: one-time handoffs between agents within a session
//!
//! ## Key Layout
//!
//! - `session::<session_id>::context`
//! - `session::<session_id>::scratch::<agent_name>`
//! - `session::<session_id>::disambiguation`
//! - `user::<user_id>::preference::<key>`
//! - `user::<user_id>::rule::<trigger>`
//!
//! Each segment is escaped with [`compose_key`](crate::storage::compose_key)
//! (`%` and `:` are percent-encoded), and reads also match the owning fields.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tandem_memory::config::MemorySettings;
//! use tandem_memory::embedding::HashEmbeddingProvider;
//! use tandem_memory::memory::{MemoryManager, NewHandoff, PreferenceSource};
//! use tandem_memory::storage::InMemoryStorage;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = MemoryManager::new(
//!     Arc::new(InMemoryStorage::new()),
//!     Arc::new(HashEmbeddingProvider::new(256)),
//!     &MemorySettings::default(),
//! );
//!
//! // Remember something about the user
//! manager
//!     .semantic()
//!     .record_preference("alice", "default_priority", "high", PreferenceSource::Explicit, 0.9)
//!     .await?;
//!
//! // Pass work to another agent
//! manager
//!     .shared()
//!     .write_handoff(NewHandoff::new("session-1", "alice", "planner", "executor", "task_created"))
//!     .await?;
//! let handoff = manager.shared().read_handoff("session-1", "executor", true).await?;
//! assert!(handoff.is_some());
//! # Ok(())
//! # }
//! ```

mod episodic;
mod manager;
mod procedural;
mod semantic;
mod shared;
mod working;

pub use episodic::{
    ActionRecord, ActivitySummary, EntityRef, EpisodicMemory, NewAction, RecalledAction, TimeRange,
};
pub use manager::{MemoryManager, MemoryStats, SessionClearReport, UserMemoryProfile};
pub use procedural::{normalize_trigger, ProceduralMemory, Rule};
pub use semantic::{Preference, PreferenceSource, SemanticMemory};
pub use shared::{ChainStatus, Handoff, HandoffPriority, HandoffStatus, NewHandoff, SharedMemory};
pub use working::{DisambiguationCandidate, PendingDisambiguation, WorkingMemory};
