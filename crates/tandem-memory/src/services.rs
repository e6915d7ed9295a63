//! Service container handed to the orchestration loop
//!
//! One [`MemoryServices`] is built at startup and shared by reference or
//! `Arc`; every component inside it talks to the same storage backend and
//! embedding provider.

use crate::config::MemorySettings;
use crate::embedding::{EmbeddingProvider, HashEmbeddingProvider};
use crate::entity::EntityStore;
use crate::error::MemoryResult;
use crate::memory::MemoryManager;
use crate::search::{EntityResolver, HybridSearch};
use crate::storage::{InMemoryStorage, StorageAdapter};
use std::sync::Arc;

/// Memory, resolution and retrieval over one storage backend
pub struct MemoryServices {
    manager: MemoryManager,
    resolver: EntityResolver,
    search: HybridSearch,
    entities: EntityStore,
    settings: MemorySettings,
}

impl MemoryServices {
    /// Build every component over a shared backend and embedder
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: MemorySettings,
    ) -> MemoryResult<Self> {
        settings.validate()?;

        tracing::info!(
            backend = storage.backend_name(),
            embedding_model = embedder.model_name(),
            dimensions = embedder.dimensions(),
            "Initializing memory services"
        );

        Ok(Self {
            manager: MemoryManager::new(Arc::clone(&storage), Arc::clone(&embedder), &settings),
            resolver: EntityResolver::new(
                Arc::clone(&storage),
                Arc::clone(&embedder),
                settings.resolver.clone(),
            ),
            search: HybridSearch::new(
                Arc::clone(&storage),
                Arc::clone(&embedder),
                settings.hybrid.clone(),
            ),
            entities: EntityStore::new(storage, embedder),
            settings,
        })
    }

    /// Process-local services with the hashing embedder
    pub fn in_memory(settings: MemorySettings) -> MemoryResult<Self> {
        let embedder = HashEmbeddingProvider::new(settings.embedding_dimensions);
        Self::new(Arc::new(InMemoryStorage::new()), Arc::new(embedder), settings)
    }

    /// Durable services backed by a SQLite file
    #[cfg(feature = "sqlite")]
    pub async fn sqlite(
        path: impl AsRef<std::path::Path>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: MemorySettings,
    ) -> MemoryResult<Self> {
        let storage = crate::storage::SqliteStorage::open(path).await?;
        Self::new(Arc::new(storage), embedder, settings)
    }

    pub fn manager(&self) -> &MemoryManager {
        &self.manager
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    pub fn search(&self) -> &HybridSearch {
        &self.search
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }
}
