//! Fuzzy entity resolution
//!
//! Maps an informal reference ("the checkpointer task") to a stored entity.
//! Candidates come from the vector index and are re-scored by blending their
//! embedding similarity with a lexical ratio against the display name. A
//! result carries the best match (if it clears the threshold) and any near
//! ties the caller should confirm with the user before acting.

use super::similarity::{clamp_similarity, combined_score, lexical_ratio};
use crate::config::ResolverSettings;
use crate::embedding::{EmbeddingMode, EmbeddingProvider};
use crate::entity::{
    parse_entity_id, EntityKind, EntityProjection, EMBEDDING_FIELD, TEST_DATA_FIELD,
};
use crate::error::{MemoryError, MemoryResult};
use crate::memory::DisambiguationCandidate;
use crate::storage::{Filter, StorageAdapter, VectorQuery};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Slack when comparing a score gap against the near-tie band
const BAND_TOLERANCE: f64 = 1e-9;

/// Narrows task resolution to one project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScopeHint {
    /// A known project id
    ProjectId(String),
    /// An informal project reference, resolved first
    ProjectName(String),
}

/// Input to [`EntityResolver::resolve`]
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    /// The user's wording
    pub reference: String,

    /// Entity class to search
    pub kind: EntityKind,

    /// Optional project restriction (tasks only)
    pub scope_hint: Option<ScopeHint>,

    /// Match threshold; the class default when unset
    pub threshold: Option<f64>,
}

impl ResolveRequest {
    pub fn new(reference: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            reference: reference.into(),
            kind,
            scope_hint: None,
            threshold: None,
        }
    }

    /// Resolve a task reference
    pub fn task(reference: impl Into<String>) -> Self {
        Self::new(reference, EntityKind::Task)
    }

    /// Resolve a project reference
    pub fn project(reference: impl Into<String>) -> Self {
        Self::new(reference, EntityKind::Project)
    }

    pub fn with_scope(mut self, scope_hint: ScopeHint) -> Self {
        self.scope_hint = Some(scope_hint);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// A scored candidate entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCandidate {
    #[serde(flatten)]
    pub entity: EntityProjection,

    /// Embedding similarity, capped at 1.0
    pub vector_score: f64,

    /// Case-folded character ratio against the display name
    pub lexical_score: f64,

    /// `0.6 * vector_score + 0.4 * lexical_score`
    pub score: f64,

    /// Position in the vector index results, 0-based
    pub ann_rank: usize,
}

impl From<&EntityCandidate> for DisambiguationCandidate {
    fn from(candidate: &EntityCandidate) -> Self {
        Self {
            id: candidate.entity.id.clone(),
            kind: candidate.entity.kind,
            display_name: candidate.entity.display_name.clone(),
            score: candidate.score,
        }
    }
}

/// Outcome of a resolution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Best candidate when it cleared the threshold
    pub matched: Option<EntityCandidate>,

    /// Score of the best candidate, 0.0 when there were none
    pub confidence: f64,

    /// Near ties of the match, or the best options when nothing matched
    pub alternatives: Vec<EntityCandidate>,
}

impl MatchResult {
    /// No candidates at all
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }

    /// True when the user should pick: a match with near ties, or no match
    /// but something to offer
    pub fn needs_disambiguation(&self) -> bool {
        !self.alternatives.is_empty()
    }

    /// Options to present, best first
    pub fn disambiguation_candidates(&self) -> Vec<DisambiguationCandidate> {
        self.matched
            .iter()
            .chain(self.alternatives.iter())
            .map(DisambiguationCandidate::from)
            .collect()
    }
}

/// Resolves informal references to task and project entities
pub struct EntityResolver {
    /// Storage backend holding the entities
    storage: Arc<dyn StorageAdapter>,

    /// Embeds references in query mode
    embedder: Arc<dyn EmbeddingProvider>,

    /// Candidate pool, thresholds and alternative limits
    settings: ResolverSettings,
}

impl EntityResolver {
    /// Create a new resolver
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            storage,
            embedder,
            settings,
        }
    }

    /// Resolver settings in use
    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Default threshold for an entity class
    pub fn default_threshold(&self, kind: EntityKind) -> f64 {
        match kind {
            EntityKind::Task => self.settings.task_threshold,
            EntityKind::Project => self.settings.project_threshold,
        }
    }

    /// Resolve a reference to the best matching entity
    ///
    /// An empty reference resolves to nothing without calling the embedding
    /// provider. An embedding failure is returned as an error, never as an
    /// empty result.
    pub async fn resolve(&self, request: &ResolveRequest) -> MemoryResult<MatchResult> {
        let threshold = request
            .threshold
            .unwrap_or_else(|| self.default_threshold(request.kind));
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MemoryError::out_of_range("threshold", threshold, "[0, 1]"));
        }

        let reference = request.reference.trim();
        if reference.is_empty() {
            return Ok(MatchResult::empty());
        }

        let project_id = match (&request.scope_hint, request.kind) {
            (Some(hint), EntityKind::Task) => self.resolve_scope(hint).await?,
            (Some(_), EntityKind::Project) => {
                tracing::debug!("Ignoring scope hint for project resolution");
                None
            }
            (None, _) => None,
        };

        let candidates = self
            .rank_candidates(reference, request.kind, project_id.as_deref())
            .await?;
        let result = self.select(candidates, threshold);

        tracing::debug!(
            reference = %reference,
            entity_type = %request.kind,
            matched = result.matched.as_ref().map(|c| c.entity.id.as_str()),
            confidence = result.confidence,
            alternatives = result.alternatives.len(),
            "Resolved entity reference"
        );
        Ok(result)
    }

    /// Project id to pre-filter on; `None` when a name hint does not resolve
    async fn resolve_scope(&self, hint: &ScopeHint) -> MemoryResult<Option<String>> {
        match hint {
            ScopeHint::ProjectId(id) => {
                parse_entity_id("project", id)?;
                Ok(Some(id.trim().to_string()))
            }
            ScopeHint::ProjectName(name) => {
                let name = name.trim();
                if name.is_empty() {
                    return Ok(None);
                }

                let candidates = self.rank_candidates(name, EntityKind::Project, None).await?;
                let result = self.select(candidates, self.settings.project_threshold);
                let project_id = result.matched.map(|c| c.entity.id);
                if project_id.is_none() {
                    tracing::debug!(
                        project = %name,
                        confidence = result.confidence,
                        "Scope hint did not resolve, searching all projects"
                    );
                }
                Ok(project_id)
            }
        }
    }

    /// Vector candidates re-scored and sorted best first
    async fn rank_candidates(
        &self,
        reference: &str,
        kind: EntityKind,
        project_id: Option<&str>,
    ) -> MemoryResult<Vec<EntityCandidate>> {
        let embedding = self
            .embedder
            .embed(reference, EmbeddingMode::Query)
            .await
            .map_err(|e| {
                tracing::warn!(entity_type = %kind, error = %e, "Reference embedding failed");
                e
            })?;

        let mut filter = Filter::new().ne(TEST_DATA_FIELD, true);
        if let Some(project_id) = project_id {
            filter = filter.eq("project_id", project_id);
        }
        let limit = self.settings.candidate_limit;
        let query = VectorQuery::new(EMBEDDING_FIELD, embedding.vector, limit).with_filter(filter);

        let hits = self.storage.vector_search(kind.collection(), &query).await?;
        let mut candidates: Vec<EntityCandidate> = hits
            .into_iter()
            .enumerate()
            .filter_map(|(ann_rank, hit)| {
                let entity = EntityProjection::from_document(kind, &hit.document)?;
                let vector_score = clamp_similarity(hit.score);
                let lexical_score = lexical_ratio(reference, &entity.display_name);
                Some(EntityCandidate {
                    score: combined_score(vector_score, lexical_score),
                    entity,
                    vector_score,
                    lexical_score,
                    ann_rank,
                })
            })
            .collect();

        // Stable: equal scores keep their index order
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        Ok(candidates)
    }

    fn select(&self, candidates: Vec<EntityCandidate>, threshold: f64) -> MatchResult {
        let Some(top_score) = candidates.first().map(|c| c.score) else {
            return MatchResult::empty();
        };

        if top_score < threshold {
            return MatchResult {
                matched: None,
                confidence: top_score,
                alternatives: candidates
                    .into_iter()
                    .take(self.settings.max_alternatives)
                    .collect(),
            };
        }

        let mut ranked = candidates.into_iter();
        let matched = ranked.next();
        let band = self.settings.near_tie_band + BAND_TOLERANCE;
        let alternatives = ranked
            .take(self.settings.max_alternatives)
            .filter(|c| c.score >= threshold && top_score - c.score <= band)
            .collect();

        MatchResult {
            matched,
            confidence: top_score,
            alternatives,
        }
    }
}
