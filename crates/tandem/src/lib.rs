//! # Tandem - Memory-First Multi-Agent Assistant Core
//!
//! **Tandem** gives a team of cooperating agents a shared memory:
//!
//! - **Tandem Memory**: tiered agent memory, fuzzy entity resolution and
//!   hybrid retrieval over one storage backend
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tandem::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let services = Arc::new(MemoryServices::in_memory(MemorySettings::default())?);
//!     let tools = ToolRegistry::with_builtin_tools();
//!
//!     let planner = AgentContext::new(Arc::clone(&services), "session-1", "alice", "planner");
//!     tools
//!         .call(
//!             &planner,
//!             "send_handoff",
//!             serde_json::json!({ "to_agent": "executor", "handoff_type": "task_created" }),
//!         )
//!         .await?;
//!
//!     let executor = planner.as_agent("executor");
//!     let received = tools
//!         .call(&executor, "receive_handoff", serde_json::json!({}))
//!         .await?;
//!     println!("{}", received);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Memory Tiers
//!
//! - **Working Memory**: session context, agent scratch, pending disambiguation (TTL)
//! - **Episodic Memory**: log of recorded actions, queryable by time range
//! - **Semantic Memory**: user preferences with confidence and usage counts
//! - **Procedural Memory**: trigger -> action rules
//! - **Shared Memory**: one-time handoffs between agents
//!
//! ## Storage
//!
//! The in-memory backend is always available. Enable the `sqlite` feature
//! for a durable single-file backend:
//!
//! ```toml
//! [dependencies]
//! tandem = { version = "0.1", features = ["sqlite"] }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!  ┌───────────────────────────────┐
//!  │      Orchestration loop       │
//!  └──────────────┬────────────────┘
//!                 │ tools
//!  ┌──────────────▼────────────────┐
//!  │        MemoryServices         │
//!  │ Manager · Resolver · Search   │
//!  └──────┬─────────────────┬──────┘
//!         │                 │
//!  ┌──────▼──────┐   ┌──────▼──────┐
//!  │  Storage    │   │  Embedding  │
//!  │  Adapter    │   │  Provider   │
//!  └─────────────┘   └─────────────┘
//! ```

#![doc(html_root_url = "https://docs.rs/tandem/0.1.0")]

// Re-export sub-crates
#[cfg(feature = "memory")]
pub use tandem_memory as memory;

/// Commonly used types and traits
pub mod prelude {
    #[cfg(feature = "memory")]
    pub use crate::memory::{
        config::MemorySettings,
        embedding::{EmbeddingProvider, HashEmbeddingProvider},
        entity::{EntityKind, EntityStore, NewProject, NewTask},
        error::{MemoryError, MemoryResult},
        memory::{
            EpisodicMemory, MemoryManager, NewAction, NewHandoff, PreferenceSource,
            ProceduralMemory, SemanticMemory, SharedMemory, TimeRange, WorkingMemory,
        },
        search::{EntityResolver, HybridSearch, MatchResult, ResolveRequest, SearchMode},
        services::MemoryServices,
        storage::{InMemoryStorage, StorageAdapter},
        tools::{AgentContext, ToolRegistry},
    };

    #[cfg(feature = "sqlite")]
    pub use crate::memory::storage::SqliteStorage;
}
