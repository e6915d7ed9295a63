//! Procedural memory - trigger -> action rules
//!
//! Rules are keyed by `(user_id, trigger)` with the trigger case-folded, so
//! "DONE" and "done" address the same rule. Looking a rule up by trigger
//! counts as using it: [`ProceduralMemory::get_rule_for_trigger`] increments
//! `times_used` and stamps `last_used_at` as a side effect.

use super::semantic::{check_confidence, PreferenceSource};
use crate::error::{MemoryError, MemoryResult};
use crate::storage::{
    collections, compose_key, current_time, from_document, timestamp_value, Filter,
    FindOptions, StorageAdapter, Update,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Attempts before a contended outcome update gives up
const MAX_OUTCOME_ATTEMPTS: usize = 8;

/// A stored rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier
    #[serde(rename = "_id")]
    pub id: String,

    /// Owner
    pub user_id: String,

    /// Normalized trigger pattern
    pub trigger: String,

    /// Action to perform when the trigger fires
    pub action_type: String,

    /// Action parameters or workflow steps
    #[serde(default)]
    pub parameters: Map<String, Value>,

    /// Source of the latest write
    pub source: PreferenceSource,

    /// Confidence (0.0 to 1.0) from the latest write
    pub confidence: f64,

    /// Writes plus trigger lookups
    #[serde(default)]
    pub times_used: i64,

    /// Fraction of recorded outcomes that succeeded (1.0 before any)
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,

    /// Outcomes recorded so far
    #[serde(default)]
    pub outcome_count: i64,

    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_microseconds")]
    pub updated_at: DateTime<Utc>,

    #[serde(default, with = "chrono::serde::ts_microseconds_option")]
    pub last_used_at: Option<DateTime<Utc>>,
}

fn default_success_rate() -> f64 {
    1.0
}

/// Case-folded, trimmed trigger
pub fn normalize_trigger(trigger: &str) -> String {
    trigger.trim().to_lowercase()
}

/// Procedural memory store
pub struct ProceduralMemory {
    /// Storage backend
    storage: Arc<dyn StorageAdapter>,
}

impl ProceduralMemory {
    /// Create a new procedural memory
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage }
    }

    /// Create or overwrite a rule; returns its id
    pub async fn record_rule(
        &self,
        user_id: &str,
        trigger: &str,
        action_type: &str,
        parameters: Option<Map<String, Value>>,
        source: PreferenceSource,
        confidence: f64,
    ) -> MemoryResult<String> {
        let trigger = normalize_trigger(trigger);
        if trigger.is_empty() {
            return Err(MemoryError::validation("trigger", "must not be empty"));
        }
        if action_type.trim().is_empty() {
            return Err(MemoryError::validation("action_type", "must not be empty"));
        }
        check_confidence(confidence)?;

        let now = timestamp_value(current_time());
        let filter = Self::rule_filter(user_id, &trigger);
        let update = Update::new()
            .set("action_type", action_type.trim())
            .set("parameters", Value::Object(parameters.unwrap_or_default()))
            .set("source", source.as_str())
            .set("confidence", confidence)
            .set("updated_at", now.clone())
            .set_on_insert("created_at", now)
            .set_on_insert("success_rate", 1.0)
            .set_on_insert("outcome_count", 0)
            .inc("times_used", 1);

        let outcome = self
            .storage
            .upsert(collections::PROCEDURAL, &filter, &update)
            .await?;
        tracing::debug!(
            user_id = %user_id,
            trigger = %trigger,
            inserted = outcome.inserted,
            "Recorded rule"
        );
        Ok(outcome.id)
    }

    /// Rule for a trigger, counting the lookup as a use
    pub async fn get_rule_for_trigger(
        &self,
        user_id: &str,
        trigger: &str,
    ) -> MemoryResult<Option<Rule>> {
        let filter = Self::rule_filter(user_id, &normalize_trigger(trigger));
        let used_at = current_time();
        let update = Update::new()
            .inc("times_used", 1)
            .set("last_used_at", timestamp_value(used_at));

        let used = self
            .storage
            .atomic_conditional_update(collections::PROCEDURAL, &filter, &update)
            .await?;
        if !used {
            return Ok(None);
        }

        self.storage
            .find_one(collections::PROCEDURAL, &filter)
            .await?
            .map(|doc| from_document(doc, "rule"))
            .transpose()
    }

    /// Record whether applying a rule worked, updating its running success rate
    pub async fn record_rule_outcome(
        &self,
        user_id: &str,
        trigger: &str,
        success: bool,
    ) -> MemoryResult<Rule> {
        let trigger = normalize_trigger(trigger);
        let rule_filter = Self::rule_filter(user_id, &trigger);

        for _ in 0..MAX_OUTCOME_ATTEMPTS {
            let rule: Rule = self
                .storage
                .find_one(collections::PROCEDURAL, &rule_filter)
                .await?
                .map(|doc| from_document(doc, "rule"))
                .transpose()?
                .ok_or_else(|| MemoryError::not_found("rule", trigger.as_str()))?;

            let n = rule.outcome_count as f64;
            let observed = if success { 1.0 } else { 0.0 };
            let success_rate = if rule.outcome_count == 0 {
                observed
            } else {
                (rule.success_rate * n + observed) / (n + 1.0)
            };

            // Guarded on the count read above so concurrent outcomes are not lost
            let filter = rule_filter.clone().eq("outcome_count", rule.outcome_count);
            let update = Update::new()
                .set("success_rate", success_rate)
                .inc("outcome_count", 1)
                .set("updated_at", timestamp_value(current_time()));
            if self
                .storage
                .atomic_conditional_update(collections::PROCEDURAL, &filter, &update)
                .await?
            {
                return Ok(Rule {
                    success_rate,
                    outcome_count: rule.outcome_count + 1,
                    ..rule
                });
            }
        }

        Err(MemoryError::storage(
            "record_rule_outcome",
            format!("gave up after {MAX_OUTCOME_ATTEMPTS} contended attempts"),
        ))
    }

    /// All rules of a user, most used first
    pub async fn list_rules(&self, user_id: &str) -> MemoryResult<Vec<Rule>> {
        self.storage
            .find_many(
                collections::PROCEDURAL,
                &Filter::new().eq("user_id", user_id),
                &FindOptions::new().sort_desc("times_used").sort_asc("trigger"),
            )
            .await?
            .into_iter()
            .map(|doc| from_document(doc, "rule"))
            .collect()
    }

    /// Delete a rule; returns whether it existed
    pub async fn delete_rule(&self, user_id: &str, trigger: &str) -> MemoryResult<bool> {
        let deleted = self
            .storage
            .delete_many(
                collections::PROCEDURAL,
                &Self::rule_filter(user_id, &normalize_trigger(trigger)),
            )
            .await?;
        Ok(deleted > 0)
    }

    /// Number of rules stored for the user
    pub async fn count_for_user(&self, user_id: &str) -> MemoryResult<usize> {
        self.storage
            .count(collections::PROCEDURAL, &Filter::new().eq("user_id", user_id))
            .await
    }

    /// Match one rule by its escaped key and owning fields
    fn rule_filter(user_id: &str, normalized_trigger: &str) -> Filter {
        Filter::by_id(compose_key(&["user", user_id, "rule", normalized_trigger]))
            .eq("user_id", user_id)
            .eq("trigger", normalized_trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use serde_json::json;

    fn procedural() -> ProceduralMemory {
        ProceduralMemory::new(Arc::new(InMemoryStorage::new()))
    }

    #[tokio::test]
    async fn test_trigger_normalization() {
        let procedural = procedural();
        let id = procedural
            .record_rule("u", "done", "complete_task", None, PreferenceSource::Explicit, 0.8)
            .await
            .unwrap();

        let upper = procedural.get_rule_for_trigger("u", "DONE").await.unwrap().unwrap();
        let lower = procedural.get_rule_for_trigger("u", "done").await.unwrap().unwrap();
        assert_eq!(upper.id, id);
        assert_eq!(lower.id, id);
        assert_eq!(lower.action_type, "complete_task");

        assert!(procedural.get_rule_for_trigger("other", "done").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookup_counts_as_use() {
        let procedural = procedural();
        procedural
            .record_rule(
                "u",
                "Standup",
                "summarize_yesterday",
                None,
                PreferenceSource::Inferred,
                0.6,
            )
            .await
            .unwrap();

        let first = procedural.get_rule_for_trigger("u", "standup").await.unwrap().unwrap();
        assert_eq!(first.times_used, 2);
        assert!(first.last_used_at.is_some());

        let second = procedural.get_rule_for_trigger("u", "standup").await.unwrap().unwrap();
        assert_eq!(second.times_used, 3);
    }

    #[tokio::test]
    async fn test_rewrite_keeps_single_rule() {
        let procedural = procedural();
        let mut params = Map::new();
        params.insert("priority".to_string(), json!("high"));

        procedural
            .record_rule("u", "urgent", "set_priority", None, PreferenceSource::Inferred, 0.5)
            .await
            .unwrap();
        procedural
            .record_rule(
                "u",
                "URGENT",
                "set_priority",
                Some(params),
                PreferenceSource::Explicit,
                0.9,
            )
            .await
            .unwrap();

        let rules = procedural.list_rules("u").await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].times_used, 2);
        assert_eq!(rules[0].confidence, 0.9);
        assert_eq!(rules[0].parameters.get("priority"), Some(&json!("high")));

        assert!(procedural.delete_rule("u", "Urgent").await.unwrap());
        assert_eq!(procedural.count_for_user("u").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_success_rate_is_running_mean() {
        let procedural = procedural();
        procedural
            .record_rule("u", "done", "complete_task", None, PreferenceSource::Explicit, 0.8)
            .await
            .unwrap();

        let rule = procedural.record_rule_outcome("u", "done", true).await.unwrap();
        assert_eq!(rule.success_rate, 1.0);
        let rule = procedural.record_rule_outcome("u", "done", false).await.unwrap();
        assert!((rule.success_rate - 0.5).abs() < 1e-9);
        let rule = procedural.record_rule_outcome("u", "done", true).await.unwrap();
        assert!((rule.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(rule.outcome_count, 3);

        let err = procedural.record_rule_outcome("u", "missing", true).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_separator_in_user_or_trigger() {
        let procedural = procedural();
        let first = procedural
            .record_rule("a", "rule::b", "archive", None, PreferenceSource::Explicit, 0.8)
            .await
            .unwrap();
        let second = procedural
            .record_rule("a::rule", "b", "snooze", None, PreferenceSource::Explicit, 0.8)
            .await
            .unwrap();
        assert_ne!(first, second);

        let rule = procedural.get_rule_for_trigger("a", "rule::b").await.unwrap().unwrap();
        assert_eq!(rule.action_type, "archive");
        let rule = procedural.get_rule_for_trigger("a::rule", "b").await.unwrap().unwrap();
        assert_eq!(rule.action_type, "snooze");
        assert!(procedural.delete_rule("a", "rule::b").await.unwrap());
        assert_eq!(procedural.count_for_user("a::rule").await.unwrap(), 1);
    }
}
