//! Memory configuration
//!
//! Settings are plain serde structs with defaults in code. [`MemorySettings::load`]
//! layers an optional settings file and `TANDEM__*` environment variables on
//! top of those defaults, e.g. `TANDEM__WORKING__TTL_SECS=600`.

use crate::error::{MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};

/// Environment variable prefix for settings overrides
pub const ENV_PREFIX: &str = "TANDEM";

/// Working memory (session context, agent scratch, pending disambiguation)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingSettings {
    /// Seconds after the last write before an entry expires
    pub ttl_secs: u64,
}

impl Default for WorkingSettings {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

/// Agent-to-agent handoffs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffSettings {
    /// Seconds before an unconsumed handoff is reclaimed
    pub ttl_secs: u64,

    /// Pending handoffs fetched per consume attempt
    pub consume_batch: usize,
}

impl Default for HandoffSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            consume_batch: 16,
        }
    }
}

/// Fuzzy entity resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Candidates pulled from the vector index per resolution
    pub candidate_limit: usize,

    /// Default match threshold for tasks
    pub task_threshold: f64,

    /// Default match threshold for projects (also used for scope hints)
    pub project_threshold: f64,

    /// Maximum number of alternatives reported with a result
    pub max_alternatives: usize,

    /// Largest score gap to the top match that still counts as a near tie
    pub near_tie_band: f64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            candidate_limit: 50,
            task_threshold: 0.7,
            project_threshold: 0.6,
            max_alternatives: 3,
            near_tie_band: 0.1,
        }
    }
}

/// Hybrid (vector + text) retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSettings {
    /// Weight of the vector ranking in fusion
    pub vector_weight: f64,

    /// Weight of the text ranking in fusion
    pub text_weight: f64,

    /// Rank offset for reciprocal rank fusion
    pub rrf_k: f64,

    /// Each ranked source requests `limit * candidate_multiplier` results
    pub candidate_multiplier: usize,

    /// ANN candidate pool is `requested * num_candidates_multiplier`
    pub num_candidates_multiplier: usize,

    /// Maximum edits per term for fuzzy text matching
    pub fuzzy_max_edits: u8,
}

impl Default for HybridSettings {
    fn default() -> Self {
        Self {
            vector_weight: 0.6,
            text_weight: 0.4,
            rrf_k: 60.0,
            candidate_multiplier: 2,
            num_candidates_multiplier: 10,
            fuzzy_max_edits: 1,
        }
    }
}

/// Top-level settings for the memory subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Dimensionality of the built-in hashing embedder
    pub embedding_dimensions: usize,

    /// Working memory lifetimes
    pub working: WorkingSettings,

    /// Handoff lifetimes
    pub handoffs: HandoffSettings,

    /// Entity resolver defaults
    pub resolver: ResolverSettings,

    /// Hybrid search weights
    pub hybrid: HybridSettings,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            embedding_dimensions: 256,
            working: WorkingSettings::default(),
            handoffs: HandoffSettings::default(),
            resolver: ResolverSettings::default(),
            hybrid: HybridSettings::default(),
        }
    }
}

impl MemorySettings {
    /// Load settings from an optional file plus `TANDEM__*` environment variables
    ///
    /// A `.env` file in the working directory is read first when present.
    pub fn load(path: Option<&str>) -> MemoryResult<Self> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let settings: MemorySettings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        tracing::debug!(
            working_ttl_secs = settings.working.ttl_secs,
            handoff_ttl_secs = settings.handoffs.ttl_secs,
            "Loaded memory settings"
        );
        Ok(settings)
    }

    /// Set the working memory TTL
    pub fn with_working_ttl_secs(mut self, secs: u64) -> Self {
        self.working.ttl_secs = secs;
        self
    }

    /// Set the handoff TTL
    pub fn with_handoff_ttl_secs(mut self, secs: u64) -> Self {
        self.handoffs.ttl_secs = secs;
        self
    }

    /// Set the hybrid fusion weights
    pub fn with_fusion_weights(mut self, vector_weight: f64, text_weight: f64) -> Self {
        self.hybrid.vector_weight = vector_weight;
        self.hybrid.text_weight = text_weight;
        self
    }

    /// Reject settings that would make the subsystem misbehave
    pub fn validate(&self) -> MemoryResult<()> {
        if self.working.ttl_secs == 0 {
            return Err(MemoryError::validation("working.ttl_secs", "must be positive"));
        }
        if self.handoffs.ttl_secs == 0 {
            return Err(MemoryError::validation("handoffs.ttl_secs", "must be positive"));
        }
        if self.handoffs.consume_batch == 0 {
            return Err(MemoryError::validation(
                "handoffs.consume_batch",
                "must be positive",
            ));
        }
        if self.embedding_dimensions == 0 {
            return Err(MemoryError::validation(
                "embedding_dimensions",
                "must be positive",
            ));
        }
        if self.resolver.candidate_limit == 0 {
            return Err(MemoryError::validation(
                "resolver.candidate_limit",
                "must be positive",
            ));
        }

        let unit_fields = [
            ("resolver.task_threshold", self.resolver.task_threshold),
            ("resolver.project_threshold", self.resolver.project_threshold),
            ("resolver.near_tie_band", self.resolver.near_tie_band),
            ("hybrid.vector_weight", self.hybrid.vector_weight),
            ("hybrid.text_weight", self.hybrid.text_weight),
        ];
        for (field, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(MemoryError::validation(field, format!("{value} not in [0, 1]")));
            }
        }

        if self.hybrid.vector_weight + self.hybrid.text_weight <= 0.0 {
            return Err(MemoryError::validation(
                "hybrid",
                "at least one fusion weight must be positive",
            ));
        }
        if self.hybrid.candidate_multiplier == 0 || self.hybrid.num_candidates_multiplier == 0 {
            return Err(MemoryError::validation(
                "hybrid",
                "candidate multipliers must be positive",
            ));
        }

        Ok(())
    }

    pub(crate) fn working_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.working.ttl_secs as i64)
    }

    pub(crate) fn handoff_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.handoffs.ttl_secs as i64)
    }
}
