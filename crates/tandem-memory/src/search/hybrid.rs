//! Hybrid retrieval over task and project entities
//!
//! Two independent ranked retrievals run against one entity collection: a
//! vector search over the embedding field and a fuzzy text search over the
//! title/name and description. Their rankings are merged with weighted
//! reciprocal rank fusion, so a document's fused score is
//!
//! ```text
//! vector_weight / (rrf_k + vector_rank) + text_weight / (rrf_k + text_rank)
//! ```
//!
//! with ranks starting at 1 and a missing rank contributing nothing.
//!
//! Two degraded modes skip one retrieval: [`SearchMode::VectorOnly`] skips
//! the text index, [`SearchMode::TextOnly`] skips both the embedding call
//! and the vector index. Every response carries a latency breakdown.
//!
//! An empty query returns an empty response without touching the embedding
//! provider or storage.

use crate::config::HybridSettings;
use crate::embedding::{EmbeddingMode, EmbeddingProvider};
use crate::entity::{EntityKind, EntityProjection, EMBEDDING_FIELD, TEST_DATA_FIELD};
use crate::error::{MemoryError, MemoryResult};
use crate::storage::{
    document_id, Document, Filter, ScoredDocument, StorageAdapter, TextQuery, VectorQuery,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

/// Which ranked retrievals a search runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Vector and text retrieval, fused
    #[default]
    Hybrid,
    /// Vector retrieval only
    VectorOnly,
    /// Text retrieval only; no embedding call
    TextOnly,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Hybrid => "hybrid",
            SearchMode::VectorOnly => "vector_only",
            SearchMode::TextOnly => "text_only",
        }
    }

    fn uses_vectors(&self) -> bool {
        !matches!(self, SearchMode::TextOnly)
    }

    fn uses_text(&self) -> bool {
        !matches!(self, SearchMode::VectorOnly)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hybrid" => Ok(SearchMode::Hybrid),
            "vector" | "vector_only" => Ok(SearchMode::VectorOnly),
            "text" | "text_only" => Ok(SearchMode::TextOnly),
            other => Err(MemoryError::validation(
                "mode",
                format!("expected hybrid, vector_only or text_only, got '{other}'"),
            )),
        }
    }
}

/// A ranked entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub entity: EntityProjection,

    /// Fused score, higher is better
    pub score: f64,

    /// Similarity reported by the vector index, when it returned this entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,

    /// Relevance reported by the text index, when it returned this entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_score: Option<f64>,
}

/// Where a search spent its time, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyBreakdown {
    pub embedding_ms: u64,
    pub vector_query_ms: u64,
    pub text_query_ms: u64,
    pub total_ms: u64,
}

/// Ranked hits plus how they were produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub mode: SearchMode,
    pub timings: LatencyBreakdown,
}

impl SearchResponse {
    fn empty(mode: SearchMode) -> Self {
        Self {
            hits: Vec::new(),
            mode,
            timings: LatencyBreakdown::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Fusion accumulator for one document
struct FusedHit {
    id: String,
    document: Document,
    score: f64,
    best_rank: usize,
    vector_score: Option<f64>,
    text_score: Option<f64>,
}

#[derive(Clone, Copy)]
enum RankSource {
    Vector,
    Text,
}

/// Hybrid vector + text search engine
pub struct HybridSearch {
    /// Storage backend holding the entities
    storage: Arc<dyn StorageAdapter>,

    /// Embeds queries in query mode
    embedder: Arc<dyn EmbeddingProvider>,

    /// Fusion weights and candidate pool sizes
    settings: HybridSettings,
}

impl HybridSearch {
    /// Create a new search engine
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: HybridSettings,
    ) -> Self {
        Self {
            storage,
            embedder,
            settings,
        }
    }

    /// Hybrid search
    pub async fn search(
        &self,
        query: &str,
        kind: EntityKind,
        limit: usize,
    ) -> MemoryResult<SearchResponse> {
        self.search_with_mode(query, kind, limit, SearchMode::Hybrid)
            .await
    }

    /// Search using the given retrieval mode
    pub async fn search_with_mode(
        &self,
        query: &str,
        kind: EntityKind,
        limit: usize,
        mode: SearchMode,
    ) -> MemoryResult<SearchResponse> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(SearchResponse::empty(mode));
        }

        let started = Instant::now();
        let mut timings = LatencyBreakdown::default();
        let requested = limit.saturating_mul(self.settings.candidate_multiplier);

        let query_vector = if mode.uses_vectors() {
            let embedding_started = Instant::now();
            let embedding = self.embedder.embed(query, EmbeddingMode::Query).await?;
            timings.embedding_ms = embedding_started.elapsed().as_millis() as u64;
            Some(embedding.vector)
        } else {
            None
        };

        let vector_search = async {
            let Some(vector) = query_vector else {
                return Ok::<_, MemoryError>((Vec::new(), 0));
            };
            let vector_started = Instant::now();
            let pool = requested.saturating_mul(self.settings.num_candidates_multiplier);
            let vector_query = VectorQuery::new(EMBEDDING_FIELD, vector, requested)
                .with_num_candidates(pool)
                .with_filter(Self::live_entities());
            let hits = self
                .storage
                .vector_search(kind.collection(), &vector_query)
                .await?;
            Ok((hits, vector_started.elapsed().as_millis() as u64))
        };

        let text_search = async {
            if !mode.uses_text() {
                return Ok::<_, MemoryError>((Vec::new(), 0));
            }
            let text_started = Instant::now();
            let text_query = TextQuery::new(kind.text_fields(), query, requested)
                .with_fuzzy_max_edits(self.settings.fuzzy_max_edits)
                .with_filter(Self::live_entities());
            let hits = self
                .storage
                .text_search(kind.collection(), &text_query)
                .await?;
            Ok((hits, text_started.elapsed().as_millis() as u64))
        };

        let ((vector_hits, vector_ms), (text_hits, text_ms)) =
            futures::try_join!(vector_search, text_search)?;
        timings.vector_query_ms = vector_ms;
        timings.text_query_ms = text_ms;

        let vector_candidates = vector_hits.len();
        let text_candidates = text_hits.len();
        let hits: Vec<SearchHit> = fuse(vector_hits, text_hits, &self.settings)
            .into_iter()
            .filter(|fused| !is_test_data(&fused.document))
            .filter_map(|fused| {
                Some(SearchHit {
                    entity: EntityProjection::from_document(kind, &fused.document)?,
                    score: fused.score,
                    vector_score: fused.vector_score,
                    text_score: fused.text_score,
                })
            })
            .take(limit)
            .collect();
        timings.total_ms = started.elapsed().as_millis() as u64;

        tracing::debug!(
            query = %query,
            entity_type = %kind,
            mode = %mode,
            vector_candidates,
            text_candidates,
            returned = hits.len(),
            embedding_ms = timings.embedding_ms,
            total_ms = timings.total_ms,
            "Hybrid search completed"
        );

        Ok(SearchResponse {
            hits,
            mode,
            timings,
        })
    }

    fn live_entities() -> Filter {
        Filter::new().ne(TEST_DATA_FIELD, true)
    }
}

fn is_test_data(document: &Document) -> bool {
    document.get(TEST_DATA_FIELD).and_then(Value::as_bool) == Some(true)
}

/// Weighted reciprocal rank fusion, best first
///
/// Ties on fused score go to the document with the better single-source
/// rank, then to the smaller id.
fn fuse(
    vector_hits: Vec<ScoredDocument>,
    text_hits: Vec<ScoredDocument>,
    settings: &HybridSettings,
) -> Vec<FusedHit> {
    let mut fused: HashMap<String, FusedHit> = HashMap::new();
    accumulate(&mut fused, vector_hits, settings.vector_weight, settings.rrf_k, RankSource::Vector);
    accumulate(&mut fused, text_hits, settings.text_weight, settings.rrf_k, RankSource::Text);

    let mut ranked: Vec<FusedHit> = fused.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
}

fn accumulate(
    fused: &mut HashMap<String, FusedHit>,
    hits: Vec<ScoredDocument>,
    weight: f64,
    rrf_k: f64,
    source: RankSource,
) {
    for (index, hit) in hits.into_iter().enumerate() {
        let Some(id) = document_id(&hit.document).map(str::to_string) else {
            continue;
        };
        let rank = index + 1;
        let entry = fused.entry(id.clone()).or_insert_with(|| FusedHit {
            id,
            document: hit.document,
            score: 0.0,
            best_rank: rank,
            vector_score: None,
            text_score: None,
        });

        entry.score += weight / (rrf_k + rank as f64);
        entry.best_rank = entry.best_rank.min(rank);
        match source {
            RankSource::Vector => entry.vector_score = Some(hit.score),
            RankSource::Text => entry.text_score = Some(hit.score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{StaticEmbeddingProvider, UnavailableEmbeddingProvider};
    use crate::entity::{EntityStore, NewTask};
    use crate::storage::InMemoryStorage;
    use serde_json::json;

    fn scored(id: &str, score: f64) -> ScoredDocument {
        let mut document = Document::new();
        document.insert("_id".to_string(), json!(id));
        ScoredDocument { document, score }
    }

    #[test]
    fn test_fusion_weights_ranks() {
        let settings = HybridSettings::default();
        let fused = fuse(
            vec![scored("a", 0.9), scored("b", 0.8)],
            vec![scored("b", 7.0), scored("c", 3.0)],
            &settings,
        );
        let ids: Vec<_> = fused.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);

        let b = &fused[0];
        let expected = 0.6 / 62.0 + 0.4 / 61.0;
        assert!((b.score - expected).abs() < 1e-12);
        assert_eq!(b.vector_score, Some(0.8));
        assert_eq!(b.text_score, Some(7.0));

        // a: vector rank 1 only; c: text rank 2 only
        assert!((fused[1].score - 0.6 / 61.0).abs() < 1e-12);
        assert!((fused[2].score - 0.4 / 62.0).abs() < 1e-12);
        assert_eq!(fused[2].vector_score, None);
    }

    #[test]
    fn test_fusion_tie_breaks_on_rank_then_id() {
        let settings = HybridSettings {
            vector_weight: 0.5,
            text_weight: 0.5,
            ..HybridSettings::default()
        };
        let fused = fuse(
            vec![scored("y", 0.9), scored("x", 0.5)],
            vec![scored("x", 2.0), scored("y", 1.0)],
            &settings,
        );
        // Equal fused scores and equal best ranks
        assert_eq!(fused[0].id, "x");
        assert_eq!(fused[1].id, "y");
    }

    async fn seeded(embedder: Arc<dyn EmbeddingProvider>) -> HybridSearch {
        let storage: Arc<dyn StorageAdapter> = Arc::new(InMemoryStorage::new());
        let store = EntityStore::new(Arc::clone(&storage), Arc::clone(&embedder));
        store
            .create_task(
                NewTask::new("API documentation").with_description("Write the REST reference"),
            )
            .await
            .unwrap();
        store
            .create_task(NewTask::new("API design doc"))
            .await
            .unwrap();
        store
            .create_task(NewTask::new("Plan team offsite"))
            .await
            .unwrap();
        store
            .create_task(NewTask::new("API smoke fixture").as_test_data())
            .await
            .unwrap();
        HybridSearch::new(storage, embedder, HybridSettings::default())
    }

    #[tokio::test]
    async fn test_hybrid_search_ranks_and_filters() {
        let search = seeded(Arc::new(StaticEmbeddingProvider::new(64))).await;

        let response = search.search("API", EntityKind::Task, 10).await.unwrap();
        assert_eq!(response.mode, SearchMode::Hybrid);
        assert!(!response.is_empty());
        assert!(response.hits.len() <= 3);
        assert!(response
            .hits
            .iter()
            .all(|hit| hit.entity.display_name != "API smoke fixture"));
        assert!(response.hits[0].entity.display_name.starts_with("API"));
        assert!(response.hits.windows(2).all(|w| w[0].score >= w[1].score));

        let limited = search.search("API", EntityKind::Task, 1).await.unwrap();
        assert_eq!(limited.hits.len(), 1);
    }

    #[tokio::test]
    async fn test_text_only_skips_embedding() {
        let embedder = Arc::new(StaticEmbeddingProvider::new(64));
        let search = seeded(embedder.clone()).await;
        let calls = embedder.calls();

        let response = search
            .search_with_mode("offsite", EntityKind::Task, 5, SearchMode::TextOnly)
            .await
            .unwrap();
        assert_eq!(embedder.calls(), calls);
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].entity.display_name, "Plan team offsite");
        assert!(response.hits[0].vector_score.is_none());
        assert_eq!(response.timings.embedding_ms, 0);
        assert_eq!(response.timings.vector_query_ms, 0);
    }

    #[tokio::test]
    async fn test_vector_only_returns_vector_scores() {
        let search = seeded(Arc::new(StaticEmbeddingProvider::new(64))).await;

        let response = search
            .search_with_mode("API documentation", EntityKind::Task, 2, SearchMode::VectorOnly)
            .await
            .unwrap();
        assert_eq!(response.hits.len(), 2);
        assert!(response.hits.iter().all(|hit| hit.text_score.is_none()));
        assert!(response.hits.iter().all(|hit| hit.vector_score.is_some()));
    }

    #[tokio::test]
    async fn test_empty_query_and_no_match() {
        let search = seeded(Arc::new(StaticEmbeddingProvider::new(64))).await;

        let empty = search.search("  ", EntityKind::Task, 5).await.unwrap();
        assert!(empty.is_empty());

        let none = search
            .search_with_mode("zzzqqq", EntityKind::Task, 5, SearchMode::TextOnly)
            .await
            .unwrap();
        assert!(none.is_empty());

        let projects = search.search("API", EntityKind::Project, 5).await.unwrap();
        assert!(projects.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_is_distinguishable_from_no_results() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(InMemoryStorage::new());
        let search = HybridSearch::new(
            storage,
            Arc::new(UnavailableEmbeddingProvider),
            HybridSettings::default(),
        );

        let err = search.search("API", EntityKind::Task, 5).await.unwrap_err();
        assert!(err.is_embedding_failure());

        // Keyword search still works without the provider
        let response = search
            .search_with_mode("API", EntityKind::Task, 5, SearchMode::TextOnly)
            .await
            .unwrap();
        assert!(response.is_empty());
    }

    #[test]
    fn test_search_mode_parsing() {
        assert_eq!("text".parse::<SearchMode>().unwrap(), SearchMode::TextOnly);
        assert_eq!("Vector_Only".parse::<SearchMode>().unwrap(), SearchMode::VectorOnly);
        assert_eq!("hybrid".parse::<SearchMode>().unwrap(), SearchMode::Hybrid);
        assert!("fuzzy".parse::<SearchMode>().unwrap_err().is_validation());
    }
}
