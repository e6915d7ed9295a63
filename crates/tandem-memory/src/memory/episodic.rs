//! Episodic memory - the immutable log of what agents did
//!
//! Every recorded action becomes one append-only record. Records are
//! user-scoped: they outlive the session they were recorded in and are only
//! ever read back, filtered by time, or recalled by semantic similarity.

use crate::embedding::{EmbeddingMode, EmbeddingProvider};
use crate::error::{MemoryError, MemoryResult};
use crate::storage::{
    collections, current_time, from_document, timestamp_value, to_document, Filter, FindOptions,
    StorageAdapter, VectorQuery,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

/// Field holding an action's embedding
const EMBEDDING_FIELD: &str = "embedding";

/// What an action was about
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity id, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Title or name at the time of the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Project the entity belonged to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl EntityRef {
    /// Reference an entity by id and display name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            project: None,
        }
    }

    /// Reference an entity by name only
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Set the owning project
    pub fn in_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }
}

/// One recorded action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Unique identifier
    #[serde(rename = "_id")]
    pub id: String,

    /// Owner of the memory
    pub user_id: String,

    /// Session the action happened in
    pub session_id: String,

    /// What was done ("create", "update", "complete", ...)
    pub action_type: String,

    /// Class of the entity acted on
    pub entity_type: String,

    /// The entity acted on
    #[serde(default)]
    pub entity_ref: EntityRef,

    /// Canonical one-line description of the action
    pub summary: String,

    /// Caller-supplied detail
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Agent that performed the action
    pub source_agent: String,

    /// Document-mode embedding of `summary`, when one could be generated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// When this action occurred
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Input for [`EpisodicMemory::record_action`]
#[derive(Debug, Clone)]
pub struct NewAction {
    pub user_id: String,
    pub session_id: String,
    pub action_type: String,
    pub entity_type: String,
    pub entity_ref: EntityRef,
    pub metadata: Map<String, Value>,
    pub source_agent: String,
    pub generate_embedding: bool,
}

impl NewAction {
    /// Create a new action
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        action_type: impl Into<String>,
        source_agent: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            action_type: action_type.into(),
            entity_type: "task".to_string(),
            entity_ref: EntityRef::default(),
            metadata: Map::new(),
            source_agent: source_agent.into(),
            generate_embedding: true,
        }
    }

    /// Set the entity acted on
    pub fn on_entity(mut self, entity_type: impl Into<String>, entity_ref: EntityRef) -> Self {
        self.entity_type = entity_type.into();
        self.entity_ref = entity_ref;
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Skip embedding generation
    pub fn without_embedding(mut self) -> Self {
        self.generate_embedding = false;
        self
    }

    /// Canonical summary used for display and embedding
    fn summary(&self) -> String {
        let mut summary = format!("{} {}", self.action_type, self.entity_type);
        if let Some(name) = &self.entity_ref.name {
            summary.push_str(&format!(" '{}'", name));
        }
        if let Some(project) = &self.entity_ref.project {
            summary.push_str(&format!(" in project {}", project));
        }
        if let Some(Value::String(note)) = self.metadata.get("note") {
            summary.push_str(&format!(": {}", note));
        }
        summary
    }
}

/// Window of time for history queries, evaluated in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRange {
    Today,
    Yesterday,
    /// Since Monday 00:00
    ThisWeek,
    /// The last N days including today
    LastDays(u32),
    /// Inclusive calendar-day range
    Between(NaiveDate, NaiveDate),
    All,
}

impl TimeRange {
    /// Start (inclusive) and end (exclusive) bounds relative to `now`
    ///
    /// A bound that falls outside the representable calendar is left open.
    pub fn bounds(&self, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let today = now.date_naive();
        match *self {
            TimeRange::Today => (start_of(today), None),
            TimeRange::Yesterday => (days_before(today, 1).and_then(start_of), start_of(today)),
            TimeRange::ThisWeek => {
                let offset = today.weekday().num_days_from_monday() as i64;
                (days_before(today, offset).and_then(start_of), None)
            }
            TimeRange::LastDays(days) => {
                let offset = days.saturating_sub(1) as i64;
                (days_before(today, offset).and_then(start_of), None)
            }
            TimeRange::Between(start, end) => {
                let after_end = end.checked_add_signed(Duration::days(1));
                (start_of(start), after_end.and_then(start_of))
            }
            TimeRange::All => (None, None),
        }
    }

    fn filter(&self, mut filter: Filter) -> Filter {
        let (start, end) = self.bounds(Utc::now());
        if let Some(start) = start {
            filter = filter.gte("timestamp", timestamp_value(start));
        }
        if let Some(end) = end {
            filter = filter.lt("timestamp", timestamp_value(end));
        }
        filter
    }
}

fn days_before(day: NaiveDate, days: i64) -> Option<NaiveDate> {
    day.checked_sub_signed(Duration::days(days))
}

fn start_of(day: NaiveDate) -> Option<DateTime<Utc>> {
    day.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
}

static LAST_DAYS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^last_(\d{1,4})_days?$").expect("Invalid last_N_days regex"));

fn parse_day(text: &str) -> MemoryResult<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|_| MemoryError::validation("time_range", format!("invalid date '{text}'")))
}

impl FromStr for TimeRange {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "today" => return Ok(TimeRange::Today),
            "yesterday" => return Ok(TimeRange::Yesterday),
            "this_week" | "week" => return Ok(TimeRange::ThisWeek),
            "all" | "all_time" | "" => return Ok(TimeRange::All),
            _ => {}
        }

        if let Some(captures) = LAST_DAYS.captures(&normalized) {
            let days: u32 = captures[1].parse().map_err(|_| {
                MemoryError::validation("time_range", format!("invalid range '{s}'"))
            })?;
            if days == 0 {
                return Err(MemoryError::out_of_range("time_range", days, "1.."));
            }
            return Ok(TimeRange::LastDays(days));
        }

        if let Some((start, end)) = s.split_once("..") {
            let (start, end) = (parse_day(start)?, parse_day(end)?);
            if end < start {
                return Err(MemoryError::validation(
                    "time_range",
                    format!("range ends before it starts: '{s}'"),
                ));
            }
            return Ok(TimeRange::Between(start, end));
        }

        let day = parse_day(s)?;
        Ok(TimeRange::Between(day, day))
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeRange::Today => write!(f, "today"),
            TimeRange::Yesterday => write!(f, "yesterday"),
            TimeRange::ThisWeek => write!(f, "this_week"),
            TimeRange::LastDays(days) => write!(f, "last_{}_days", days),
            TimeRange::Between(start, end) if start == end => write!(f, "{}", start),
            TimeRange::Between(start, end) => write!(f, "{}..{}", start, end),
            TimeRange::All => write!(f, "all"),
        }
    }
}

/// Grouped counts over a set of actions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_agent: BTreeMap<String, usize>,
    pub by_project: BTreeMap<String, usize>,
}

impl ActivitySummary {
    fn from_records(records: &[ActionRecord]) -> Self {
        let mut summary = Self {
            total: records.len(),
            ..Default::default()
        };
        for record in records {
            *summary.by_type.entry(record.action_type.clone()).or_default() += 1;
            *summary.by_agent.entry(record.source_agent.clone()).or_default() += 1;
            if let Some(project) = &record.entity_ref.project {
                *summary.by_project.entry(project.clone()).or_default() += 1;
            }
        }
        summary
    }
}

/// An action recalled by similarity
#[derive(Debug, Clone)]
pub struct RecalledAction {
    pub record: ActionRecord,
    pub score: f64,
}

/// Episodic memory store
pub struct EpisodicMemory {
    /// Storage backend
    storage: Arc<dyn StorageAdapter>,

    /// Embeds action summaries and recall queries
    embedder: Arc<dyn EmbeddingProvider>,
}

impl EpisodicMemory {
    /// Create a new episodic memory
    pub fn new(storage: Arc<dyn StorageAdapter>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { storage, embedder }
    }

    /// Append an action record
    ///
    /// Embedding is best effort: if the provider fails, the record is stored
    /// without one and the failure is logged.
    pub async fn record_action(&self, action: NewAction) -> MemoryResult<ActionRecord> {
        if action.user_id.trim().is_empty() {
            return Err(MemoryError::validation("user_id", "must not be empty"));
        }
        if action.action_type.trim().is_empty() {
            return Err(MemoryError::validation("action_type", "must not be empty"));
        }

        let summary = action.summary();
        let embedding = if action.generate_embedding {
            match self.embedder.embed(&summary, EmbeddingMode::Document).await {
                Ok(embedding) => Some(embedding.vector),
                Err(e) => {
                    tracing::warn!(
                        user_id = %action.user_id,
                        action_type = %action.action_type,
                        error = %e,
                        "Embedding failed, recording action without embedding"
                    );
                    None
                }
            }
        } else {
            None
        };

        let record = ActionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: action.user_id,
            session_id: action.session_id,
            action_type: action.action_type,
            entity_type: action.entity_type,
            entity_ref: action.entity_ref,
            summary,
            metadata: action.metadata,
            source_agent: action.source_agent,
            embedding,
            timestamp: current_time(),
        };

        self.storage
            .insert(collections::EPISODIC, to_document(&record, "action record")?)
            .await?;
        tracing::debug!(
            user_id = %record.user_id,
            action_type = %record.action_type,
            embedded = record.embedding.is_some(),
            "Recorded action"
        );
        Ok(record)
    }

    /// Actions in the time range, newest first
    pub async fn get_action_history(
        &self,
        user_id: &str,
        range: &TimeRange,
    ) -> MemoryResult<Vec<ActionRecord>> {
        let filter = range.filter(Filter::new().eq("user_id", user_id));
        self.storage
            .find_many(
                collections::EPISODIC,
                &filter,
                &FindOptions::new().sort_desc("timestamp"),
            )
            .await?
            .into_iter()
            .map(|doc| from_document(doc, "action record"))
            .collect()
    }

    /// Counts by type, agent and project over the same set as the history
    pub async fn get_activity_summary(
        &self,
        user_id: &str,
        range: &TimeRange,
    ) -> MemoryResult<ActivitySummary> {
        let records = self.get_action_history(user_id, range).await?;
        Ok(ActivitySummary::from_records(&records))
    }

    /// Past actions most similar to `query`
    ///
    /// Embedding the query is required here, so provider failures propagate.
    pub async fn recall_similar_actions(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> MemoryResult<Vec<RecalledAction>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query, EmbeddingMode::Query).await?;
        let vector_query = VectorQuery::new(EMBEDDING_FIELD, embedding.vector, limit)
            .with_filter(Filter::new().eq("user_id", user_id));

        self.storage
            .vector_search(collections::EPISODIC, &vector_query)
            .await?
            .into_iter()
            .map(|hit| {
                Ok(RecalledAction {
                    record: from_document(hit.document, "action record")?,
                    score: hit.score,
                })
            })
            .collect()
    }

    /// Number of recorded actions for the user
    pub async fn count_for_user(&self, user_id: &str) -> MemoryResult<usize> {
        self.storage
            .count(collections::EPISODIC, &Filter::new().eq("user_id", user_id))
            .await
    }
}
