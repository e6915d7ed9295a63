//! # Tandem Memory
//!
//! Memory, entity resolution and retrieval for a multi-agent assistant.
//! A stateless agent loop gets continuity from here: what the user is doing
//! right now, what happened before, what they prefer, and what one agent
//! wants another to pick up.
//!
//! ## Components
//!
//! - [`memory::MemoryManager`]: working, episodic, semantic, procedural and
//!   shared (handoff) memory tiers
//! - [`search::EntityResolver`]: informal reference -> one entity, with
//!   confidence and near ties
//! - [`search::HybridSearch`]: vector + fuzzy text retrieval fused into one
//!   ranked list
//! - [`entity::EntityStore`]: task and project records with embeddings
//! - [`tools::ToolRegistry`]: the above as named tools for the agent loop
//!
//! All of them sit on one [`storage::StorageAdapter`] and one
//! [`embedding::EmbeddingProvider`], wired together by
//! [`services::MemoryServices`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tandem_memory::config::MemorySettings;
//! use tandem_memory::entity::NewTask;
//! use tandem_memory::search::ResolveRequest;
//! use tandem_memory::services::MemoryServices;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let services = MemoryServices::in_memory(MemorySettings::load(None)?)?;
//!
//! services
//!     .entities()
//!     .create_task(NewTask::new("Implement MongoDB checkpointer for LangGraph"))
//!     .await?;
//!
//! let result = services
//!     .resolver()
//!     .resolve(&ResolveRequest::task("checkpointer task"))
//!     .await?;
//! if let Some(task) = result.matched {
//!     println!("{} ({:.2})", task.entity.display_name, result.confidence);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `sqlite`: durable [`storage::SqliteStorage`] backend

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod embedding;
pub mod entity;
pub mod error;
pub mod memory;
pub mod search;
pub mod services;
pub mod storage;
pub mod tools;

pub use config::MemorySettings;
pub use error::{MemoryError, MemoryResult};
pub use services::MemoryServices;
