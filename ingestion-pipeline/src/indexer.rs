use std::sync::Arc;

use common::{
    error::AppError,
    storage::types::chunk::{Chunk, ChunkMetadata},
    utils::{
        rag_runtime::RagRuntime,
        tasks::{TaskOutcome, TaskSupervisor},
    },
};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of one indexing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexReport {
    pub indexed: usize,
    pub batches: usize,
    /// `false` when RAG was unavailable and nothing was attempted.
    pub rag_available: bool,
}

/// Embeds chunks and writes them to the vector index in batches.
#[derive(Clone)]
pub struct Indexer {
    runtime: Arc<RagRuntime>,
    batch_size: usize,
}

impl Indexer {
    pub fn new(runtime: Arc<RagRuntime>, batch_size: usize) -> Self {
        Self {
            runtime,
            batch_size: batch_size.max(1),
        }
    }

    /// Indexes `chunks` under `source_id`. The first failing batch aborts the
    /// job; batches committed before it stay in the index.
    #[tracing::instrument(skip_all, fields(source_id = %source_id, chunks = chunks.len()))]
    pub async fn index(&self, chunks: Vec<Chunk>, source_id: &str) -> Result<IndexReport, AppError> {
        let chunks: Vec<Chunk> = chunks
            .into_iter()
            .filter(|chunk| !chunk.text.trim().is_empty())
            .collect();
        if chunks.is_empty() {
            return Ok(IndexReport {
                indexed: 0,
                batches: 0,
                rag_available: true,
            });
        }

        let Some(components) = self.runtime.components_if_available().await? else {
            warn!(%source_id, "RAG disabled; skipping indexing");
            return Ok(IndexReport {
                indexed: 0,
                batches: 0,
                rag_available: false,
            });
        };

        let mut committed = 0;
        let mut batches = 0;
        for (number, batch) in chunks.chunks(self.batch_size).enumerate() {
            let batch_number = number + 1;
            let documents: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();

            let outcome = async {
                let vectors = components.embedder.embed_batch(documents.clone()).await?;
                let ids = batch
                    .iter()
                    .map(|_| format!("{source_id}_{}", Uuid::new_v4().simple()))
                    .collect();
                let metadatas = batch
                    .iter()
                    .map(|chunk| ChunkMetadata::for_chunk(source_id, chunk))
                    .collect();
                components.index.add(ids, vectors, documents, metadatas).await
            }
            .await;

            if let Err(err) = outcome {
                return Err(AppError::Processing(format!(
                    "indexing source {source_id} failed at batch {batch_number} \
                     after {committed} committed chunks: {err}"
                )));
            }

            committed += batch.len();
            batches = batch_number;
        }

        info!(%source_id, indexed = committed, batches, "source indexed");
        Ok(IndexReport {
            indexed: committed,
            batches,
            rag_available: true,
        })
    }

    /// Fire-and-forget variant; the outcome is reported through the supervisor.
    pub fn spawn_index(
        &self,
        supervisor: &TaskSupervisor,
        chunks: Vec<Chunk>,
        source_id: String,
    ) -> JoinHandle<TaskOutcome> {
        let indexer = self.clone();
        let label = format!("index:{source_id}");
        supervisor.submit(label, async move {
            indexer.index(chunks, &source_id).await.map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use common::{
        storage::vector_index::{SourceFilter, VectorIndex},
        utils::{
            embedding::EmbeddingProvider,
            rag_runtime::{
                testing::{in_memory_runtime, FailingFactory},
                ResourceFactory,
            },
        },
    };

    use super::*;

    /// Embeddings go wrong after the first `healthy_batches` batches.
    struct DegradingFactory {
        healthy_batches: usize,
    }

    #[async_trait]
    impl ResourceFactory for DegradingFactory {
        async fn embedding(&self) -> Result<EmbeddingProvider, AppError> {
            Ok(EmbeddingProvider::new_hashed_degrading(16, self.healthy_batches))
        }

        async fn vector_index(&self, dimension: usize) -> Result<VectorIndex, AppError> {
            VectorIndex::in_memory(dimension).await
        }
    }

    fn chunk(text: &str, page: u32) -> Chunk {
        Chunk {
            text: text.to_string(),
            page,
            bbox: None,
        }
    }

    #[tokio::test]
    async fn test_index_in_batches_with_source_metadata() {
        let runtime = Arc::new(in_memory_runtime(32));
        let indexer = Indexer::new(Arc::clone(&runtime), 2);

        let chunks = vec![
            chunk("transformers use attention", 1),
            chunk("   ", 1),
            chunk("residual connections ease training", 2),
            chunk("batch normalisation", 3),
        ];
        let report = indexer.index(chunks, "42").await.expect("index");
        assert_eq!(report.indexed, 3);
        assert_eq!(report.batches, 2);

        let components = runtime.components().await.expect("components");
        assert_eq!(components.index.count().await.expect("count"), 3);

        let samples = components.index.peek(10).await.expect("peek");
        for sample in &samples {
            assert_eq!(sample.metadata.source, "42");
            assert!(sample.id.starts_with("42_"));
            assert_eq!(sample.id.len(), "42_".len() + 32);
        }

        let query = components
            .embedder
            .embed("attention")
            .await
            .expect("embed");
        let hits = components
            .index
            .query(&query, 5, &SourceFilter::Equals("7".into()))
            .await
            .expect("query");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_failing_batch_keeps_earlier_batches_and_stops() {
        let runtime = Arc::new(RagRuntime::new(Arc::new(DegradingFactory {
            healthy_batches: 1,
        })));
        let indexer = Indexer::new(Arc::clone(&runtime), 2);

        let chunks = (1..=6)
            .map(|n| chunk(&format!("passage number {n}"), 1))
            .collect();
        let err = indexer
            .index(chunks, "9")
            .await
            .expect_err("second batch is rejected");
        let message = err.to_string();
        assert!(message.contains("batch 2"), "{message}");
        assert!(message.contains("after 2 committed chunks"), "{message}");

        let components = runtime.components().await.expect("components");
        assert_eq!(components.index.count().await.expect("count"), 2);
        assert_eq!(components.embedder.batches_served(), 2);
    }

    #[tokio::test]
    async fn test_whitespace_only_input_is_a_no_op() {
        let runtime = Arc::new(in_memory_runtime(8));
        let indexer = Indexer::new(Arc::clone(&runtime), 10);
        let report = indexer
            .index(vec![chunk(" \n\t", 1)], "1")
            .await
            .expect("index");
        assert_eq!(report.indexed, 0);
        assert!(!runtime.is_ready());
    }

    #[tokio::test]
    async fn test_degraded_runtime_skips_indexing() {
        let runtime = Arc::new(RagRuntime::new(Arc::new(FailingFactory::default())));
        let indexer = Indexer::new(runtime, 10);
        let report = indexer
            .index(vec![chunk("some text", 1)], "3")
            .await
            .expect("degraded is not an error");
        assert!(!report.rag_available);
        assert_eq!(report.indexed, 0);
    }

    #[tokio::test]
    async fn test_spawned_job_reports_outcome() {
        let runtime = Arc::new(in_memory_runtime(8));
        let indexer = Indexer::new(runtime, 10);
        let (supervisor, mut reports) = TaskSupervisor::new();

        let outcome = indexer
            .spawn_index(&supervisor, vec![chunk("chunk text", 1)], "5".into())
            .await
            .expect("join");
        assert_eq!(outcome, TaskOutcome::Succeeded);

        let report = reports.recv().await.expect("report");
        assert_eq!(report.label, "index:5");
    }
}
