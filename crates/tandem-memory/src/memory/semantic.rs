//! Semantic memory - durable preferences and learned facts
//!
//! One record per `(user_id, key)`, stored at `user::{user_id}::preference::{key}`.
//! Writing an existing key replaces its value, confidence and source with the
//! latest call's and bumps `times_used`; confidence is not blended across
//! writes.

use crate::error::{MemoryError, MemoryResult};
use crate::storage::{
    collections, compose_key, current_time, from_document, timestamp_value, Filter,
    FindOptions, StorageAdapter, Update,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Where a preference came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceSource {
    /// The user stated it
    Explicit,
    /// An agent inferred it from behavior
    Inferred,
}

impl PreferenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreferenceSource::Explicit => "explicit",
            PreferenceSource::Inferred => "inferred",
        }
    }
}

impl fmt::Display for PreferenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PreferenceSource {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "explicit" => Ok(PreferenceSource::Explicit),
            "inferred" => Ok(PreferenceSource::Inferred),
            other => Err(MemoryError::validation(
                "source",
                format!("expected explicit or inferred, got '{other}'"),
            )),
        }
    }
}

/// A stored preference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preference {
    /// Unique identifier
    #[serde(rename = "_id")]
    pub id: String,

    /// Owner
    pub user_id: String,

    /// Preference name ("default_priority", "working_hours", ...)
    pub key: String,

    /// The preferred value
    pub value: Value,

    /// Confidence (0.0 to 1.0) from the latest write
    pub confidence: f64,

    /// Source of the latest write
    pub source: PreferenceSource,

    /// Number of writes to this key
    #[serde(default)]
    pub times_used: i64,

    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_microseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Reject confidences outside `[0, 1]`
pub(crate) fn check_confidence(confidence: f64) -> MemoryResult<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(MemoryError::out_of_range("confidence", confidence, "[0, 1]"));
    }
    Ok(())
}

/// Semantic memory store
pub struct SemanticMemory {
    /// Storage backend
    storage: Arc<dyn StorageAdapter>,
}

impl SemanticMemory {
    /// Create a new semantic memory
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage }
    }

    /// Create or overwrite a preference; returns its id
    pub async fn record_preference(
        &self,
        user_id: &str,
        key: &str,
        value: impl Into<Value>,
        source: PreferenceSource,
        confidence: f64,
    ) -> MemoryResult<String> {
        let key = key.trim();
        if key.is_empty() {
            return Err(MemoryError::validation("key", "must not be empty"));
        }
        if user_id.trim().is_empty() {
            return Err(MemoryError::validation("user_id", "must not be empty"));
        }
        check_confidence(confidence)?;

        let now = timestamp_value(current_time());
        let filter = Self::preference_filter(user_id, key);
        let update = Update::new()
            .set("value", value.into())
            .set("confidence", confidence)
            .set("source", source.as_str())
            .set("updated_at", now.clone())
            .set_on_insert("created_at", now)
            .inc("times_used", 1);

        let outcome = self
            .storage
            .upsert(collections::SEMANTIC, &filter, &update)
            .await?;
        tracing::debug!(
            user_id = %user_id,
            key = %key,
            inserted = outcome.inserted,
            "Recorded preference"
        );
        Ok(outcome.id)
    }

    /// Get a preference by key
    pub async fn get_preference(
        &self,
        user_id: &str,
        key: &str,
    ) -> MemoryResult<Option<Preference>> {
        self.storage
            .find_one(collections::SEMANTIC, &Self::preference_filter(user_id, key.trim()))
            .await?
            .map(|doc| from_document(doc, "preference"))
            .transpose()
    }

    /// All preferences of a user, most confident first
    pub async fn get_preferences(
        &self,
        user_id: &str,
        min_confidence: Option<f64>,
    ) -> MemoryResult<Vec<Preference>> {
        let mut filter = Filter::new().eq("user_id", user_id);
        if let Some(min) = min_confidence {
            filter = filter.gte("confidence", min);
        }

        self.storage
            .find_many(
                collections::SEMANTIC,
                &filter,
                &FindOptions::new().sort_desc("confidence").sort_asc("key"),
            )
            .await?
            .into_iter()
            .map(|doc| from_document(doc, "preference"))
            .collect()
    }

    /// Delete a preference; returns whether it existed
    pub async fn delete_preference(&self, user_id: &str, key: &str) -> MemoryResult<bool> {
        let deleted = self
            .storage
            .delete_many(collections::SEMANTIC, &Self::preference_filter(user_id, key.trim()))
            .await?;
        Ok(deleted > 0)
    }

    /// Number of preferences stored for the user
    pub async fn count_for_user(&self, user_id: &str) -> MemoryResult<usize> {
        self.storage
            .count(collections::SEMANTIC, &Filter::new().eq("user_id", user_id))
            .await
    }

    /// Match one preference by its escaped key and owning fields
    fn preference_filter(user_id: &str, key: &str) -> Filter {
        Filter::by_id(compose_key(&["user", user_id, "preference", key]))
            .eq("user_id", user_id)
            .eq("key", key)
    }
}
