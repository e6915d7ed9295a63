//! # Storage Adapter
//!
//! The single shared mutable resource of the memory subsystem. Every tier,
//! the resolver and the hybrid search talk to storage exclusively through
//! [`StorageAdapter`], so backends are interchangeable:
//!
//! - [`InMemoryStorage`]: process-local, used by tests and demos
//! - `SqliteStorage` (feature `sqlite`): durable single-file backend
//!
//! ## Guarantees required from a backend
//!
//! - Each `upsert` and `atomic_conditional_update` is atomic per document:
//!   concurrent writers to disjoint fields of one document are both retained,
//!   and of two conditional updates racing on the same document at most one
//!   observes the condition and succeeds.
//! - Documents carrying an [`EXPIRY_FIELD`] marker are treated as absent once
//!   the marker has passed and are reclaimed by the backend.
//! - `find_many` sorting is stable; equal keys keep insertion order.

mod document;
mod in_memory;
pub mod scoring;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use document::{
    apply_find_options, compose_key, current_time, document_id, expiry_of, from_document,
    get_path, is_expired, set_path, timestamp_value, to_document, Condition, Document, Filter,
    FindOptions, SortKey, SortOrder, Update, EXPIRY_FIELD, ID_FIELD,
};
pub use in_memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use crate::error::MemoryResult;
use async_trait::async_trait;

/// Collection names used by the memory subsystem
pub mod collections {
    /// Session context, agent scratch and pending disambiguations (TTL)
    pub const WORKING: &str = "working_memory";
    /// Immutable action/event log
    pub const EPISODIC: &str = "episodic_memory";
    /// Preferences and cached knowledge
    pub const SEMANTIC: &str = "semantic_memory";
    /// Trigger -> action rules
    pub const PROCEDURAL: &str = "procedural_memory";
    /// Agent-to-agent handoffs (TTL)
    pub const HANDOFFS: &str = "shared_memory";
    /// Task entities
    pub const TASKS: &str = "tasks";
    /// Project entities
    pub const PROJECTS: &str = "projects";
}

/// Approximate nearest-neighbor request
#[derive(Debug, Clone)]
pub struct VectorQuery {
    /// Field holding the stored vectors
    pub vector_field: String,

    /// Query vector
    pub query_vector: Vec<f32>,

    /// Candidate pool for approximate indexes; exhaustive backends score
    /// every document passing the filter and ignore it
    pub num_candidates: usize,

    /// Maximum results returned
    pub limit: usize,

    /// Pre-filter applied before ranking
    pub filter: Filter,
}

impl VectorQuery {
    /// Create a vector query over `vector_field`
    pub fn new(vector_field: impl Into<String>, query_vector: Vec<f32>, limit: usize) -> Self {
        Self {
            vector_field: vector_field.into(),
            query_vector,
            num_candidates: limit.saturating_mul(10),
            limit,
            filter: Filter::new(),
        }
    }

    /// Set the candidate pool size
    pub fn with_num_candidates(mut self, num_candidates: usize) -> Self {
        self.num_candidates = num_candidates;
        self
    }

    /// Set the pre-filter
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
}

/// Inverted-index text request
#[derive(Debug, Clone)]
pub struct TextQuery {
    /// Fields searched
    pub fields: Vec<String>,

    /// Free-text query
    pub query: String,

    /// Maximum edits per term for fuzzy matching (0 disables fuzziness)
    pub fuzzy_max_edits: u8,

    /// Maximum results returned
    pub limit: usize,

    /// Pre-filter applied before ranking
    pub filter: Filter,
}

impl TextQuery {
    /// Create a text query over `fields`
    pub fn new<S: Into<String>>(
        fields: impl IntoIterator<Item = S>,
        query: impl Into<String>,
        limit: usize,
    ) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            query: query.into(),
            fuzzy_max_edits: 1,
            limit,
            filter: Filter::new(),
        }
    }

    /// Set the fuzzy edit budget per term
    pub fn with_fuzzy_max_edits(mut self, edits: u8) -> Self {
        self.fuzzy_max_edits = edits;
        self
    }

    /// Set the pre-filter
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
}

/// A ranked search hit
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    /// The matching document
    pub document: Document,

    /// Backend-defined similarity or relevance, higher is better
    pub score: f64,
}

/// What an upsert did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Id of the written document
    pub id: String,

    /// True when no document matched and one was created
    pub inserted: bool,
}

/// Persistence and query interface consumed by the memory subsystem
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// First live document matching the filter, in insertion order
    async fn find_one(&self, collection: &str, filter: &Filter) -> MemoryResult<Option<Document>>;

    /// All live documents matching the filter
    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> MemoryResult<Vec<Document>>;

    /// Insert a new document, assigning an `_id` when absent; returns the id
    async fn insert(&self, collection: &str, document: Document) -> MemoryResult<String>;

    /// Update the first document matching `key_filter`, or insert one seeded
    /// from the filter's equality fields
    async fn upsert(
        &self,
        collection: &str,
        key_filter: &Filter,
        update: &Update,
    ) -> MemoryResult<UpsertOutcome>;

    /// Delete every matching document; returns how many were removed
    async fn delete_many(&self, collection: &str, filter: &Filter) -> MemoryResult<usize>;

    /// Count live matching documents
    async fn count(&self, collection: &str, filter: &Filter) -> MemoryResult<usize>;

    /// Nearest neighbors of `query.query_vector`, most similar first
    async fn vector_search(
        &self,
        collection: &str,
        query: &VectorQuery,
    ) -> MemoryResult<Vec<ScoredDocument>>;

    /// Lexical matches for `query.query`, most relevant first
    async fn text_search(
        &self,
        collection: &str,
        query: &TextQuery,
    ) -> MemoryResult<Vec<ScoredDocument>>;

    /// Apply `update` to one document matching `filter` if, at the moment of
    /// the write, it still matches. Returns whether a document was updated.
    async fn atomic_conditional_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> MemoryResult<bool>;

    /// Backend name for logs
    fn backend_name(&self) -> &str;
}
