//! SQLite storage backend
//!
//! Documents are stored as JSON bodies in a single table keyed by
//! `(collection, id)`. Filtering and ranking run in process over the loaded
//! collection; writes are serialized per document with an optimistic
//! `version` check, and inserts rely on the unique key so two racing upserts
//! of the same deterministic id produce one row.

use super::document::{
    apply_find_options, document_id, expiry_of, Document, Filter, FindOptions, Update, ID_FIELD,
};
use super::scoring::{rank_by_text, rank_by_vector};
use super::{ScoredDocument, StorageAdapter, TextQuery, UpsertOutcome, VectorQuery};
use crate::error::{MemoryError, MemoryResult};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

/// Attempts before a contended write gives up
const MAX_WRITE_ATTEMPTS: usize = 16;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    body TEXT NOT NULL,
    expires_at INTEGER NULL,
    version INTEGER NOT NULL DEFAULT 0,
    UNIQUE (collection, id)
)
"#;

struct StoredRow {
    id: String,
    document: Document,
    version: i64,
}

/// Durable storage in a single SQLite file
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) a database file
    pub async fn open(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::storage("connect", e))?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database, useful for tests
    pub async fn in_memory() -> MemoryResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        // One connection: every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::storage("connect", e))?;

        Self::with_pool(pool).await
    }

    /// Use an existing pool, creating the schema if missing
    pub async fn with_pool(pool: SqlitePool) -> MemoryResult<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| MemoryError::storage("migrate", e))?;

        tracing::debug!("SQLite document store ready");
        Ok(Self { pool })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp_micros()
    }

    fn encode(document: &Document) -> MemoryResult<String> {
        serde_json::to_string(document).map_err(|e| MemoryError::serialization("sqlite body", e))
    }

    async fn purge_expired(&self, collection: &str) -> MemoryResult<()> {
        let result = sqlx::query(
            "DELETE FROM documents \
             WHERE collection = ? AND expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(collection)
        .bind(Self::now())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::storage("purge_expired", e))?;

        if result.rows_affected() > 0 {
            tracing::debug!(
                collection = %collection,
                purged = result.rows_affected(),
                "Reclaimed expired documents"
            );
        }
        Ok(())
    }

    /// Live rows of a collection matching the filter, in insertion order
    async fn load(&self, collection: &str, filter: &Filter) -> MemoryResult<Vec<StoredRow>> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT id, body, version FROM documents \
             WHERE collection = ? AND (expires_at IS NULL OR expires_at > ?) \
             ORDER BY seq",
        )
        .bind(collection)
        .bind(Self::now())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::storage("load", e))?;

        let mut matching = Vec::new();
        for (id, body, version) in rows {
            let document: Document = serde_json::from_str(&body)
                .map_err(|e| MemoryError::serialization("sqlite body", e))?;
            if filter.matches(&document) {
                matching.push(StoredRow {
                    id,
                    document,
                    version,
                });
            }
        }
        Ok(matching)
    }

    async fn load_documents(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> MemoryResult<Vec<Document>> {
        Ok(self
            .load(collection, filter)
            .await?
            .into_iter()
            .map(|row| row.document)
            .collect())
    }

    /// Insert unless a live row holds the id; returns whether a row was written
    ///
    /// An expired row that has not been purged yet is overwritten in place.
    async fn try_insert(
        &self,
        collection: &str,
        id: &str,
        document: &Document,
    ) -> MemoryResult<bool> {
        let result = sqlx::query(
            "INSERT INTO documents (collection, id, body, expires_at, version) \
             VALUES (?, ?, ?, ?, 0) \
             ON CONFLICT (collection, id) DO UPDATE SET \
                 body = excluded.body, \
                 expires_at = excluded.expires_at, \
                 version = documents.version + 1 \
             WHERE documents.expires_at IS NOT NULL AND documents.expires_at <= ?",
        )
        .bind(collection)
        .bind(id)
        .bind(Self::encode(document)?)
        .bind(expiry_of(document))
        .bind(Self::now())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::storage("insert", e))?;

        Ok(result.rows_affected() == 1)
    }

    /// Replace a live row if its version is unchanged; returns whether it was written
    async fn try_replace(
        &self,
        collection: &str,
        row: &StoredRow,
        document: &Document,
    ) -> MemoryResult<bool> {
        let result = sqlx::query(
            "UPDATE documents SET body = ?, expires_at = ?, version = version + 1 \
             WHERE collection = ? AND id = ? AND version = ? \
             AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(Self::encode(document)?)
        .bind(expiry_of(document))
        .bind(collection)
        .bind(&row.id)
        .bind(row.version)
        .bind(Self::now())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::storage("update", e))?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn find_one(&self, collection: &str, filter: &Filter) -> MemoryResult<Option<Document>> {
        Ok(self
            .load(collection, filter)
            .await?
            .into_iter()
            .next()
            .map(|row| row.document))
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> MemoryResult<Vec<Document>> {
        let mut documents = self.load_documents(collection, filter).await?;
        apply_find_options(&mut documents, options);
        Ok(documents)
    }

    async fn insert(&self, collection: &str, mut document: Document) -> MemoryResult<String> {
        let id = match document_id(&document) {
            Some(id) => id.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                document.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
        };

        self.purge_expired(collection).await?;
        if !self.try_insert(collection, &id, &document).await? {
            return Err(MemoryError::validation(
                ID_FIELD,
                format!("duplicate id {id} in {collection}"),
            ));
        }
        Ok(id)
    }

    async fn upsert(
        &self,
        collection: &str,
        key_filter: &Filter,
        update: &Update,
    ) -> MemoryResult<UpsertOutcome> {
        self.purge_expired(collection).await?;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            if let Some(row) = self.load(collection, key_filter).await?.into_iter().next() {
                let mut document = row.document.clone();
                update.apply(&mut document, false);
                if self.try_replace(collection, &row, &document).await? {
                    return Ok(UpsertOutcome {
                        id: row.id,
                        inserted: false,
                    });
                }
                continue;
            }

            let document = update.materialize(key_filter);
            let id = document_id(&document).unwrap_or_default().to_string();
            if self.try_insert(collection, &id, &document).await? {
                return Ok(UpsertOutcome { id, inserted: true });
            }

            // Lost an insert race, or the pinned id belongs to a document the
            // key filter does not match
            let same_id = self.load(collection, &Filter::by_id(id.as_str())).await?;
            if same_id.iter().any(|row| !key_filter.matches(&row.document)) {
                return Err(MemoryError::validation(
                    ID_FIELD,
                    format!("upsert key does not match existing document {id} in {collection}"),
                ));
            }
        }

        Err(MemoryError::storage(
            "upsert",
            format!("gave up after {MAX_WRITE_ATTEMPTS} contended attempts"),
        ))
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> MemoryResult<usize> {
        self.purge_expired(collection).await?;

        let mut deleted = 0;
        for row in self.load(collection, filter).await? {
            let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(&row.id)
                .execute(&self.pool)
                .await
                .map_err(|e| MemoryError::storage("delete_many", e))?;
            deleted += result.rows_affected() as usize;
        }
        Ok(deleted)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> MemoryResult<usize> {
        Ok(self.load(collection, filter).await?.len())
    }

    async fn vector_search(
        &self,
        collection: &str,
        query: &VectorQuery,
    ) -> MemoryResult<Vec<ScoredDocument>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let candidates = self.load_documents(collection, &query.filter).await?;
        Ok(rank_by_vector(candidates, query))
    }

    async fn text_search(
        &self,
        collection: &str,
        query: &TextQuery,
    ) -> MemoryResult<Vec<ScoredDocument>> {
        if query.limit == 0 || query.query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let candidates = self.load_documents(collection, &query.filter).await?;
        Ok(rank_by_text(candidates, query))
    }

    async fn atomic_conditional_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> MemoryResult<bool> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(row) = self.load(collection, filter).await?.into_iter().next() else {
                return Ok(false);
            };

            let mut document = row.document.clone();
            update.apply(&mut document, false);
            if self.try_replace(collection, &row, &document).await? {
                return Ok(true);
            }
            // Someone else wrote the row first; re-check the condition
        }

        Err(MemoryError::storage(
            "atomic_conditional_update",
            format!("gave up after {MAX_WRITE_ATTEMPTS} contended attempts"),
        ))
    }

    fn backend_name(&self) -> &str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::get_path;
    use serde_json::json;
    use std::sync::Arc;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_upsert_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        let key = Filter::new().eq("user_id", "u1").eq("key", "theme");

        {
            let storage = SqliteStorage::open(&path).await.unwrap();
            let update = Update::new().set("value", "dark").inc("times_used", 1);
            let first = storage.upsert("semantic_memory", &key, &update).await.unwrap();
            assert!(first.inserted);
            let second = storage.upsert("semantic_memory", &key, &update).await.unwrap();
            assert!(!second.inserted);
            assert_eq!(first.id, second.id);
        }

        let storage = SqliteStorage::open(&path).await.unwrap();
        let stored = storage.find_one("semantic_memory", &key).await.unwrap().unwrap();
        assert_eq!(stored.get("times_used"), Some(&json!(2)));
        assert_eq!(storage.count("semantic_memory", &Filter::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_merge_and_expiry() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let key = Filter::by_id("session::s1::context");
        storage
            .upsert("working_memory", &key, &Update::new().set("payload.a", 1))
            .await
            .unwrap();
        storage
            .upsert("working_memory", &key, &Update::new().set("payload.b", 2))
            .await
            .unwrap();

        let stored = storage.find_one("working_memory", &key).await.unwrap().unwrap();
        assert_eq!(get_path(&stored, "payload.a"), Some(&json!(1)));
        assert_eq!(get_path(&stored, "payload.b"), Some(&json!(2)));

        let past = chrono::Utc::now() - chrono::Duration::seconds(1);
        storage
            .upsert("working_memory", &key, &Update::new().expire_at(past))
            .await
            .unwrap();
        assert!(storage.find_one("working_memory", &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_reuses_expired_unpurged_row() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let expired = chrono::Utc::now() - chrono::Duration::seconds(5);
        sqlx::query("INSERT INTO documents (collection, id, body, expires_at) VALUES (?, ?, ?, ?)")
        .bind("working_memory")
        .bind("k")
        .bind(r#"{"_id":"k","payload":{"stale":true}}"#)
        .bind(expired.timestamp_micros())
        .execute(&storage.pool)
        .await
        .unwrap();

        // The row is not purged first, as if it expired after the purge ran
        let fresh = doc(json!({"_id": "k", "payload": {"fresh": true}}));
        assert!(storage.try_insert("working_memory", "k", &fresh).await.unwrap());

        let stored = storage
            .find_one("working_memory", &Filter::by_id("k"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(get_path(&stored, "payload.fresh"), Some(&json!(true)));
        assert!(get_path(&stored, "payload.stale").is_none());

        // A live row still blocks the insert
        assert!(!storage.try_insert("working_memory", "k", &fresh).await.unwrap());

        let outcome = storage
            .upsert(
                "working_memory",
                &Filter::by_id("k"),
                &Update::new().set("payload.n", 1),
            )
            .await
            .unwrap();
        assert!(!outcome.inserted);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage.insert("c", doc(json!({"_id": "x"}))).await.unwrap();
        let err = storage.insert("c", doc(json!({"_id": "x"}))).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_conditional_update_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(SqliteStorage::open(dir.path().join("race.db")).await.unwrap());
        storage
            .insert("h", doc(json!({"_id": "only", "status": "pending"})))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                storage
                    .atomic_conditional_update(
                        "h",
                        &Filter::by_id("only").eq("status", "pending"),
                        &Update::new().set("status", "consumed"),
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_text_and_vector_search() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage
            .insert(
                "t",
                doc(json!({"_id": "a", "title": "Checkpointer design", "embedding": [1.0, 0.0]})),
            )
            .await
            .unwrap();
        storage
            .insert("t", doc(json!({"_id": "b", "title": "Offsite plan", "embedding": [0.0, 1.0]})))
            .await
            .unwrap();

        let text = storage
            .text_search("t", &TextQuery::new(["title"], "checkpointer", 5))
            .await
            .unwrap();
        assert_eq!(text.len(), 1);
        assert_eq!(document_id(&text[0].document), Some("a"));

        let vector = storage
            .vector_search("t", &VectorQuery::new("embedding", vec![0.0, 1.0], 1))
            .await
            .unwrap();
        assert_eq!(document_id(&vector[0].document), Some("b"));
    }
}
