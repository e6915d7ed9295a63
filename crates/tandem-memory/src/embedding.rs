//! Embeddings for entity resolution and semantic recall
//!
//! The memory subsystem only needs text -> vector. Providers distinguish
//! query-time from document-time embedding because asymmetric models encode
//! the two differently; symmetric providers ignore the mode.

use crate::error::{MemoryError, MemoryResult};
use crate::storage::scoring::{cosine_similarity, tokenize};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A vector embedding (dense float vector)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    /// The vector dimensions
    pub vector: Vec<f32>,

    /// Dimensionality of the embedding
    pub dimensions: usize,

    /// Model used to generate the embedding
    pub model: String,
}

impl Embedding {
    /// Create a new embedding
    pub fn new(vector: Vec<f32>, model: impl Into<String>) -> Self {
        let dimensions = vector.len();
        Self {
            vector,
            dimensions,
            model: model.into(),
        }
    }

    /// Calculate cosine similarity with another embedding
    pub fn cosine_similarity(&self, other: &Embedding) -> MemoryResult<f64> {
        cosine_similarity(&self.vector, &other.vector).ok_or_else(|| {
            MemoryError::validation(
                "embedding_dimensions",
                format!("dimensions must match: {} vs {}", self.dimensions, other.dimensions),
            )
        })
    }
}

/// What the text being embedded is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMode {
    /// A search query or user reference
    Query,
    /// Stored content (task titles, action descriptions)
    Document,
}

/// Trait for embedding generation backends
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for the given text
    async fn embed(&self, text: &str, mode: EmbeddingMode) -> MemoryResult<Embedding>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimensions
    fn dimensions(&self) -> usize;
}

/// Feature-hashing embedder over words and character trigrams
///
/// Texts sharing words or spelling fragments land close together, which is
/// enough for demos and tests. Not a semantic model.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl HashEmbeddingProvider {
    /// Weight of a whole-word feature
    const WORD_WEIGHT: f32 = 1.0;

    /// Weight of a character-trigram feature
    const TRIGRAM_WEIGHT: f32 = 0.5;

    /// Create a new hash-based embedding provider
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        let hash = hasher.finish();

        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }

    fn hash_embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimensions];

        for word in tokenize(text) {
            self.add_feature(&mut vector, &word, Self::WORD_WEIGHT);

            let padded: Vec<char> = format!("#{word}#").chars().collect();
            for trigram in padded.windows(3) {
                let trigram: String = trigram.iter().collect();
                self.add_feature(&mut vector, &trigram, Self::TRIGRAM_WEIGHT);
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str, _mode: EmbeddingMode) -> MemoryResult<Embedding> {
        Ok(Embedding::new(self.hash_embed(text), self.model_name()))
    }

    fn model_name(&self) -> &str {
        "hash-embedding"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Provider returning fixed vectors for known texts
///
/// Texts are matched after trimming and lowercasing; unknown texts fall back
/// to feature hashing. Counts calls so tests can assert none were made.
#[derive(Debug)]
pub struct StaticEmbeddingProvider {
    vectors: RwLock<HashMap<String, Vec<f32>>>,
    fallback: HashEmbeddingProvider,
    calls: AtomicUsize,
}

impl StaticEmbeddingProvider {
    /// Create a provider of the given dimensionality
    pub fn new(dimensions: usize) -> Self {
        Self {
            vectors: RwLock::new(HashMap::new()),
            fallback: HashEmbeddingProvider::new(dimensions),
            calls: AtomicUsize::new(0),
        }
    }

    /// Register the vector returned for `text`
    pub fn with_vector(self, text: &str, vector: Vec<f32>) -> Self {
        self.insert(text, vector);
        self
    }

    /// Register the vector returned for `text`
    pub fn insert(&self, text: &str, vector: Vec<f32>) {
        self.vectors.write().insert(Self::key(text), vector);
    }

    /// Number of `embed` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn key(text: &str) -> String {
        text.trim().to_lowercase()
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for StaticEmbeddingProvider {
    async fn embed(&self, text: &str, mode: EmbeddingMode) -> MemoryResult<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let known = self.vectors.read().get(&Self::key(text)).cloned();
        match known {
            Some(vector) => Ok(Embedding::new(vector, self.model_name())),
            None => self.fallback.embed(text, mode).await,
        }
    }

    fn model_name(&self) -> &str {
        "static-embedding"
    }

    fn dimensions(&self) -> usize {
        self.fallback.dimensions()
    }
}

/// Provider that always fails, for exercising degraded paths
#[derive(Debug, Clone, Default)]
pub struct UnavailableEmbeddingProvider;

#[async_trait::async_trait]
impl EmbeddingProvider for UnavailableEmbeddingProvider {
    async fn embed(&self, _text: &str, _mode: EmbeddingMode) -> MemoryResult<Embedding> {
        Err(MemoryError::embedding("embed", "provider unavailable"))
    }

    fn model_name(&self) -> &str {
        "unavailable"
    }

    fn dimensions(&self) -> usize {
        0
    }
}
