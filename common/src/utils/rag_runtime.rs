use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::{
    error::AppError,
    storage::vector_index::VectorIndex,
    utils::{
        config::AppConfig,
        embedding::{EmbeddingProvider, FastEmbedLoader},
        lazy::{LazyResource, ResourceState},
    },
};

/// Builds the heavy RAG resources on first use.
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    async fn embedding(&self) -> Result<EmbeddingProvider, AppError>;
    async fn vector_index(&self, dimension: usize) -> Result<VectorIndex, AppError>;
}

pub struct ConfiguredFactory {
    config: AppConfig,
}

impl ConfiguredFactory {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ResourceFactory for ConfiguredFactory {
    async fn embedding(&self) -> Result<EmbeddingProvider, AppError> {
        EmbeddingProvider::from_config(&self.config, &FastEmbedLoader).await
    }

    async fn vector_index(&self, dimension: usize) -> Result<VectorIndex, AppError> {
        VectorIndex::open(&self.config.vector_store_path(), dimension).await
    }
}

/// Handles to the ready resources.
#[derive(Clone)]
pub struct RagComponents {
    pub embedder: Arc<EmbeddingProvider>,
    pub index: Arc<VectorIndex>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RagStatus {
    pub embedding: &'static str,
    pub index: &'static str,
    pub degraded_reason: Option<String>,
}

/// Process-wide owner of the embedding provider and vector index. Both are
/// created lazily, once; a failure leaves RAG disabled until restart.
pub struct RagRuntime {
    factory: Arc<dyn ResourceFactory>,
    embedding: LazyResource<EmbeddingProvider>,
    index: LazyResource<VectorIndex>,
}

impl RagRuntime {
    pub fn new(factory: Arc<dyn ResourceFactory>) -> Self {
        Self {
            factory,
            embedding: LazyResource::new("embedding provider"),
            index: LazyResource::new("vector index"),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(Arc::new(ConfiguredFactory::new(config.clone())))
    }

    /// Ready handles, initialising on first call.
    pub async fn components(&self) -> Result<RagComponents, AppError> {
        let embedder = self
            .embedding
            .get_or_init(|| self.factory.embedding())
            .await?;
        let dimension = embedder.dimension();
        let index = self
            .index
            .get_or_init(|| self.factory.vector_index(dimension))
            .await?;
        Ok(RagComponents { embedder, index })
    }

    /// `Ok(None)` in degraded mode; only index corruption is an error.
    pub async fn components_if_available(&self) -> Result<Option<RagComponents>, AppError> {
        match self.components().await {
            Ok(components) => Ok(Some(components)),
            Err(err @ AppError::IndexCorrupted(_)) => Err(err),
            Err(err) => {
                warn!(error = %err, "RAG unavailable; continuing without retrieval");
                Ok(None)
            }
        }
    }

    /// Initialises eagerly at startup. Degraded mode is tolerated; a store
    /// that survived neither open nor reset is returned as an error.
    pub async fn warm_up(&self) -> Result<(), AppError> {
        self.components_if_available().await.map(|_| ())
    }

    pub fn is_ready(&self) -> bool {
        self.embedding.state() == ResourceState::Ready && self.index.state() == ResourceState::Ready
    }

    pub fn status(&self) -> RagStatus {
        RagStatus {
            embedding: state_label(self.embedding.state()),
            index: state_label(self.index.state()),
            degraded_reason: self
                .embedding
                .disabled_reason()
                .or_else(|| self.index.disabled_reason())
                .map(str::to_string),
        }
    }
}

fn state_label(state: ResourceState) -> &'static str {
    match state {
        ResourceState::Uninitialized => "uninitialized",
        ResourceState::Ready => "ready",
        ResourceState::Disabled => "disabled",
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    //! In-memory factories for tests across the workspace.
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Hashed embeddings over an in-memory index.
    pub struct InMemoryFactory {
        pub dimension: usize,
    }

    #[async_trait]
    impl ResourceFactory for InMemoryFactory {
        async fn embedding(&self) -> Result<EmbeddingProvider, AppError> {
            Ok(EmbeddingProvider::new_hashed(self.dimension)?)
        }

        async fn vector_index(&self, dimension: usize) -> Result<VectorIndex, AppError> {
            VectorIndex::in_memory(dimension).await
        }
    }

    /// Embedding initialisation always fails; counts attempts.
    #[derive(Default)]
    pub struct FailingFactory {
        pub embedding_attempts: AtomicUsize,
    }

    impl FailingFactory {
        pub fn attempts(&self) -> usize {
            self.embedding_attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceFactory for FailingFactory {
        async fn embedding(&self) -> Result<EmbeddingProvider, AppError> {
            self.embedding_attempts.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Unavailable("no embedding model could be loaded".into()))
        }

        async fn vector_index(&self, dimension: usize) -> Result<VectorIndex, AppError> {
            VectorIndex::in_memory(dimension).await
        }
    }

    pub fn in_memory_runtime(dimension: usize) -> RagRuntime {
        RagRuntime::new(Arc::new(InMemoryFactory { dimension }))
    }
}
