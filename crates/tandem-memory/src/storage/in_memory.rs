//! Process-local storage backend
//!
//! Each collection is a vector of documents in insertion order behind its own
//! lock. Every operation takes the lock synchronously and releases it before
//! returning, so no guard is ever held across an await point.

use super::document::{
    apply_find_options, document_id, is_expired, Document, Filter, FindOptions, Update, ID_FIELD,
};
use super::scoring::{rank_by_text, rank_by_vector};
use super::{ScoredDocument, StorageAdapter, TextQuery, UpsertOutcome, VectorQuery};
use crate::error::{MemoryError, MemoryResult};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<Document>,
}

impl Collection {
    /// Drop documents whose TTL marker has passed
    fn purge_expired(&mut self, now: i64) -> usize {
        let before = self.documents.len();
        self.documents.retain(|doc| !is_expired(doc, now));
        before - self.documents.len()
    }

    fn live<'a>(&'a self, filter: &'a Filter, now: i64) -> impl Iterator<Item = &'a Document> + 'a {
        self.documents
            .iter()
            .filter(move |doc| !is_expired(doc, now) && filter.matches(doc))
    }

    fn contains_id(&self, id: &str) -> bool {
        self.documents.iter().any(|doc| document_id(doc) == Some(id))
    }
}

/// In-memory storage backed by `DashMap`
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    collections: DashMap<String, Arc<RwLock<Collection>>>,
}

impl InMemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of collections that have been written to
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn collection(&self, name: &str) -> Arc<RwLock<Collection>> {
        self.collections
            .entry(name.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn existing(&self, name: &str) -> Option<Arc<RwLock<Collection>>> {
        self.collections.get(name).map(|entry| entry.value().clone())
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp_micros()
    }

    fn read_matching(&self, collection: &str, filter: &Filter) -> Vec<Document> {
        let Some(collection) = self.existing(collection) else {
            return Vec::new();
        };
        let now = Self::now();
        let guard = collection.read();
        guard.live(filter, now).cloned().collect()
    }

    fn insert_sync(&self, collection: &str, mut document: Document) -> MemoryResult<String> {
        let id = match document_id(&document) {
            Some(id) => id.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                document.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
        };

        let collection_lock = self.collection(collection);
        let mut guard = collection_lock.write();
        guard.purge_expired(Self::now());
        if guard.contains_id(&id) {
            return Err(MemoryError::validation(
                ID_FIELD,
                format!("duplicate id {id} in {collection}"),
            ));
        }
        guard.documents.push(document);
        Ok(id)
    }

    fn upsert_sync(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> MemoryResult<UpsertOutcome> {
        let collection_lock = self.collection(collection);
        let mut guard = collection_lock.write();
        guard.purge_expired(Self::now());

        if let Some(existing) = guard.documents.iter_mut().find(|doc| filter.matches(doc)) {
            update.apply(existing, false);
            let id = document_id(existing).unwrap_or_default().to_string();
            return Ok(UpsertOutcome { id, inserted: false });
        }

        let document = update.materialize(filter);
        let id = document_id(&document).unwrap_or_default().to_string();
        if guard.contains_id(&id) {
            return Err(MemoryError::validation(
                ID_FIELD,
                format!("upsert key does not match existing document {id} in {collection}"),
            ));
        }
        guard.documents.push(document);
        Ok(UpsertOutcome { id, inserted: true })
    }

    fn delete_sync(&self, collection: &str, filter: &Filter) -> usize {
        let Some(collection_lock) = self.existing(collection) else {
            return 0;
        };
        let now = Self::now();
        let mut guard = collection_lock.write();
        guard.purge_expired(now);
        let before = guard.documents.len();
        guard.documents.retain(|doc| !filter.matches(doc));
        before - guard.documents.len()
    }

    fn conditional_update_sync(&self, collection: &str, filter: &Filter, update: &Update) -> bool {
        let Some(collection_lock) = self.existing(collection) else {
            return false;
        };
        let now = Self::now();
        let mut guard = collection_lock.write();
        guard.purge_expired(now);
        match guard.documents.iter_mut().find(|doc| filter.matches(doc)) {
            Some(document) => {
                update.apply(document, false);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorage {
    async fn find_one(&self, collection: &str, filter: &Filter) -> MemoryResult<Option<Document>> {
        let Some(collection) = self.existing(collection) else {
            return Ok(None);
        };
        let now = Self::now();
        let guard = collection.read();
        let found = guard.live(filter, now).next().cloned();
        Ok(found)
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> MemoryResult<Vec<Document>> {
        let mut documents = self.read_matching(collection, filter);
        apply_find_options(&mut documents, options);
        Ok(documents)
    }

    async fn insert(&self, collection: &str, document: Document) -> MemoryResult<String> {
        self.insert_sync(collection, document)
    }

    async fn upsert(
        &self,
        collection: &str,
        key_filter: &Filter,
        update: &Update,
    ) -> MemoryResult<UpsertOutcome> {
        self.upsert_sync(collection, key_filter, update)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> MemoryResult<usize> {
        Ok(self.delete_sync(collection, filter))
    }

    async fn count(&self, collection: &str, filter: &Filter) -> MemoryResult<usize> {
        let Some(collection) = self.existing(collection) else {
            return Ok(0);
        };
        let now = Self::now();
        let guard = collection.read();
        Ok(guard.live(filter, now).count())
    }

    async fn vector_search(
        &self,
        collection: &str,
        query: &VectorQuery,
    ) -> MemoryResult<Vec<ScoredDocument>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let candidates = self.read_matching(collection, &query.filter);
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
        let candidates = self.read_matching(collection, &query.filter);
        Ok(rank_by_text(candidates, query))
    }

    async fn atomic_conditional_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> MemoryResult<bool> {
        Ok(self.conditional_update_sync(collection, filter, update))
    }

    fn backend_name(&self) -> &str {
        "in_memory"
    }
}
