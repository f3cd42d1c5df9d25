use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use surrealdb::{
    engine::any::{connect, Any},
    Surreal,
};
use tracing::{debug, error, info, warn};

use crate::{error::AppError, storage::types::chunk::ChunkMetadata};

/// Table holding every indexed chunk vector.
pub const COLLECTION: &str = "paper_chunk";

const NAMESPACE: &str = "rag";
const DATABASE: &str = "vectors";

/// Error fragments that identify a damaged on-disk store.
const CORRUPTION_SIGNATURES: &[&str] = &[
    "corrupt",
    "malformed",
    "checksum mismatch",
    "no such column",
    "invalid manifest",
    "unexpected end of file",
];

/// Opens the underlying store. Swappable so recovery can be tested without a
/// damaged disk image.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, path: &Path) -> Result<Surreal<Any>, AppError>;
}

/// Embedded SurrealKV store under a local directory.
pub struct SurrealKvConnector;

#[async_trait]
impl StoreConnector for SurrealKvConnector {
    async fn connect(&self, path: &Path) -> Result<Surreal<Any>, AppError> {
        let address = format!("surrealkv://{}", path.display());
        let db = connect(address)
            .await
            .map_err(|err| AppError::VectorStore(err.to_string()))?;
        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|err| AppError::VectorStore(err.to_string()))?;
        Ok(db)
    }
}

/// Restricts a query to chunks from particular sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFilter {
    Unscoped,
    Equals(String),
    OneOf(Vec<String>),
    /// Matches no document at all.
    MatchNothing,
}

impl SourceFilter {
    /// One source becomes an equality filter, several a membership filter and
    /// none the match-nothing sentinel.
    pub fn from_sources(sources: &[String]) -> Self {
        match sources {
            [] => Self::MatchNothing,
            [single] => Self::Equals(single.clone()),
            many => Self::OneOf(many.to_vec()),
        }
    }

    fn clause(&self) -> &'static str {
        match self {
            Self::Unscoped | Self::MatchNothing => "",
            Self::Equals(_) => "WHERE source = $source",
            Self::OneOf(_) => "WHERE source IN $sources",
        }
    }
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub document: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

/// A stored entry as returned by `peek`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSample {
    pub id: String,
    pub document: String,
    pub metadata: ChunkMetadata,
}

#[derive(Serialize)]
struct VectorRow {
    id: String,
    embedding: Vec<f32>,
    document: String,
    source: String,
    page: u32,
    bbox: String,
    inserted_at: i64,
    ordinal: u32,
}

#[derive(Deserialize)]
struct StoredRow {
    chunk_id: String,
    document: String,
    source: String,
    page: u32,
    #[serde(default)]
    bbox: String,
    #[serde(default)]
    score: Option<f32>,
}

impl StoredRow {
    fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            source: self.source.clone(),
            page: self.page,
            bbox: self.bbox.clone(),
        }
    }
}

/// Persistent store of `(vector, document, metadata)` triples.
pub struct VectorIndex {
    db: Surreal<Any>,
    dimension: usize,
    path: Option<PathBuf>,
    next_ordinal: AtomicU32,
}

impl VectorIndex {
    pub async fn open(path: &Path, dimension: usize) -> Result<Self, AppError> {
        Self::open_with(&SurrealKvConnector, path, dimension).await
    }

    /// Opens the store, wiping and retrying exactly once when the first
    /// attempt fails with a corruption signature.
    pub async fn open_with(
        connector: &dyn StoreConnector,
        path: &Path,
        dimension: usize,
    ) -> Result<Self, AppError> {
        match Self::try_open(connector, path, dimension).await {
            Ok(index) => Ok(index),
            Err(err) if is_corruption(&err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "vector store looks corrupted; resetting it"
                );
                reset_store_dir(path).await?;
                Self::try_open(connector, path, dimension)
                    .await
                    .map_err(|retry_err| {
                        error!(
                            path = %path.display(),
                            error = %retry_err,
                            "vector store still unusable after reset"
                        );
                        AppError::IndexCorrupted(retry_err.to_string())
                    })
            }
            Err(err) => Err(err),
        }
    }

    async fn try_open(
        connector: &dyn StoreConnector,
        path: &Path,
        dimension: usize,
    ) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db = connector.connect(path).await?;
        let index = Self {
            db,
            dimension,
            path: Some(path.to_path_buf()),
            next_ordinal: AtomicU32::new(0),
        };
        index.define_schema().await?;
        info!(path = %path.display(), dimension, "vector store opened");
        Ok(index)
    }

    async fn define_schema(&self) -> Result<(), AppError> {
        self.db
            .query(format!(
                "DEFINE TABLE IF NOT EXISTS {COLLECTION} SCHEMALESS;
                 DEFINE INDEX IF NOT EXISTS idx_{COLLECTION}_source ON TABLE {COLLECTION} FIELDS source;"
            ))
            .await?
            .check()?;

        let stored: Vec<usize> = self
            .db
            .query("SELECT VALUE dimension FROM type::thing('vector_meta', 'layout')")
            .await?
            .take(0)?;

        match stored.first().copied() {
            Some(existing) if existing != self.dimension => Err(AppError::VectorStore(format!(
                "stored vectors have dimension {existing} but the embedding model produces {}; \
                 reset the vector store to re-index",
                self.dimension
            ))),
            Some(_) => Ok(()),
            None => {
                self.db
                    .query("UPSERT type::thing('vector_meta', 'layout') SET dimension = $dimension")
                    .bind(("dimension", self.dimension))
                    .await?
                    .check()?;
                Ok(())
            }
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Writes one batch. All four inputs are parallel lists.
    pub async fn add(
        &self,
        ids: Vec<String>,
        vectors: Vec<Vec<f32>>,
        documents: Vec<String>,
        metadatas: Vec<ChunkMetadata>,
    ) -> Result<(), AppError> {
        let len = ids.len();
        if vectors.len() != len || documents.len() != len || metadatas.len() != len {
            return Err(AppError::Validation(format!(
                "mismatched batch: {len} ids, {} vectors, {} documents, {} metadatas",
                vectors.len(),
                documents.len(),
                metadatas.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(AppError::Validation(format!(
                "vector has dimension {} but the index expects {}",
                bad.len(),
                self.dimension
            )));
        }
        if len == 0 {
            return Ok(());
        }

        let inserted_at = Utc::now().timestamp_micros();
        let rows: Vec<VectorRow> = ids
            .into_iter()
            .zip(vectors)
            .zip(documents)
            .zip(metadatas)
            .map(|(((id, embedding), document), metadata)| VectorRow {
                id,
                embedding,
                document,
                source: metadata.source,
                page: metadata.page,
                bbox: metadata.bbox,
                inserted_at,
                ordinal: self.next_ordinal.fetch_add(1, Ordering::Relaxed),
            })
            .collect();

        self.db
            .query(format!("INSERT INTO {COLLECTION} $rows RETURN NONE"))
            .bind(("rows", rows))
            .await?
            .check()?;

        debug!(count = len, "vector batch committed");
        Ok(())
    }

    /// Nearest neighbours of `vector` by cosine similarity, best first. Ties
    /// keep insertion order.
    pub async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &SourceFilter,
    ) -> Result<Vec<VectorMatch>, AppError> {
        if k == 0 || matches!(filter, SourceFilter::MatchNothing) {
            return Ok(Vec::new());
        }
        if vector.len() != self.dimension {
            return Err(AppError::Validation(format!(
                "query vector has dimension {} but the index expects {}",
                vector.len(),
                self.dimension
            )));
        }

        let sql = format!(
            "SELECT record::id(id) AS chunk_id, document, source, page, bbox, inserted_at, ordinal,
                    vector::similarity::cosine(embedding, $embedding) AS score
             FROM {COLLECTION} {}
             ORDER BY score DESC, inserted_at ASC, ordinal ASC, chunk_id ASC
             LIMIT {k}",
            filter.clause()
        );
        let mut request = self.db.query(sql).bind(("embedding", vector.to_vec()));
        request = match filter {
            SourceFilter::Equals(source) => request.bind(("source", source.clone())),
            SourceFilter::OneOf(sources) => request.bind(("sources", sources.clone())),
            SourceFilter::Unscoped | SourceFilter::MatchNothing => request,
        };

        let rows: Vec<StoredRow> = request.await?.take(0)?;
        Ok(rows
            .into_iter()
            .map(|row| VectorMatch {
                metadata: row.metadata(),
                score: row.score.unwrap_or(0.0),
                id: row.chunk_id,
                document: row.document,
            })
            .collect())
    }

    pub async fn count(&self) -> Result<usize, AppError> {
        let count: Option<usize> = self
            .db
            .query(format!("SELECT count() FROM {COLLECTION} GROUP ALL"))
            .await?
            .take((0, "count"))?;
        Ok(count.unwrap_or(0))
    }

    /// The oldest `limit` entries, for inspection.
    pub async fn peek(&self, limit: usize) -> Result<Vec<VectorSample>, AppError> {
        let rows: Vec<StoredRow> = self
            .db
            .query(format!(
                "SELECT record::id(id) AS chunk_id, document, source, page, bbox, inserted_at, ordinal
                 FROM {COLLECTION}
                 ORDER BY inserted_at ASC, ordinal ASC
                 LIMIT {limit}"
            ))
            .await?
            .take(0)?;
        Ok(rows
            .into_iter()
            .map(|row| VectorSample {
                metadata: row.metadata(),
                id: row.chunk_id,
                document: row.document,
            })
            .collect())
    }

    /// Drops every stored vector. The only way entries are ever deleted.
    pub async fn reset(&self) -> Result<(), AppError> {
        self.db
            .query(format!(
                "REMOVE TABLE IF EXISTS {COLLECTION}; REMOVE TABLE IF EXISTS vector_meta;"
            ))
            .await?
            .check()?;
        self.define_schema().await
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl VectorIndex {
    /// In-memory index for tests.
    pub async fn in_memory(dimension: usize) -> Result<Self, AppError> {
        let db = connect("mem://").await?;
        db.use_ns(NAMESPACE).use_db(DATABASE).await?;
        let index = Self {
            db,
            dimension,
            path: None,
            next_ordinal: AtomicU32::new(0),
        };
        index.define_schema().await?;
        Ok(index)
    }
}

pub fn is_corruption(err: &AppError) -> bool {
    let message = err.to_string().to_lowercase();
    CORRUPTION_SIGNATURES
        .iter()
        .any(|signature| message.contains(signature))
}

async fn reset_store_dir(path: &Path) -> Result<(), AppError> {
    if tokio::fs::try_exists(path).await? {
        let metadata = tokio::fs::metadata(path).await?;
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
    }
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FlakyConnector {
        failures: usize,
        message: &'static str,
        calls: AtomicUsize,
    }

    impl FlakyConnector {
        fn new(failures: usize, message: &'static str) -> Self {
            Self {
                failures,
                message,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StoreConnector for FlakyConnector {
        async fn connect(&self, _path: &Path) -> Result<Surreal<Any>, AppError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(AppError::VectorStore(self.message.to_string()));
            }
            let db = connect("mem://").await?;
            db.use_ns(NAMESPACE).use_db(DATABASE).await?;
            Ok(db)
        }
    }

    fn meta(source: &str, page: u32) -> ChunkMetadata {
        ChunkMetadata {
            source: source.to_string(),
            page,
            bbox: String::new(),
        }
    }

    async fn seeded_index() -> VectorIndex {
        let index = VectorIndex::in_memory(3).await.expect("index");
        index
            .add(
                vec!["1_a".into(), "1_b".into(), "2_a".into(), "3_a".into()],
                vec![
                    vec![1.0, 0.0, 0.0],
                    vec![0.0, 1.0, 0.0],
                    vec![0.9, 0.1, 0.0],
                    vec![0.0, 0.0, 1.0],
                ],
                vec!["alpha".into(), "beta".into(), "alpha-ish".into(), "gamma".into()],
                vec![meta("1", 1), meta("1", 2), meta("2", 1), meta("3", 4)],
            )
            .await
            .expect("add");
        index
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let index = seeded_index().await;
        let hits = index
            .query(&[1.0, 0.0, 0.0], 2, &SourceFilter::Unscoped)
            .await
            .expect("query");
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["1_a", "2_a"]);
        assert_eq!(hits[0].metadata, meta("1", 1));
        assert_eq!(index.count().await.expect("count"), 4);
    }

    #[tokio::test]
    async fn test_source_filters() {
        let index = seeded_index().await;

        let only_two = index
            .query(&[1.0, 0.0, 0.0], 5, &SourceFilter::Equals("2".into()))
            .await
            .expect("query");
        assert_eq!(only_two.len(), 1);
        assert_eq!(only_two[0].metadata.source, "2");

        let some = index
            .query(
                &[0.0, 0.0, 1.0],
                5,
                &SourceFilter::from_sources(&["1".into(), "3".into()]),
            )
            .await
            .expect("query");
        assert_eq!(some.len(), 3);
        assert_eq!(some[0].id, "3_a");
        assert!(some.iter().all(|h| h.metadata.source != "2"));

        let nothing = index
            .query(&[1.0, 0.0, 0.0], 5, &SourceFilter::from_sources(&[]))
            .await
            .expect("query");
        assert!(nothing.is_empty());
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let index = VectorIndex::in_memory(2).await.expect("index");
        for id in ["first", "second", "third"] {
            index
                .add(
                    vec![id.into()],
                    vec![vec![1.0, 0.0]],
                    vec![id.into()],
                    vec![meta("9", 1)],
                )
                .await
                .expect("add");
        }
        let hits = index
            .query(&[1.0, 0.0], 3, &SourceFilter::Unscoped)
            .await
            .expect("query");
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimension_and_mismatched_batches() {
        let index = VectorIndex::in_memory(3).await.expect("index");
        let wrong_dim = index
            .add(vec!["x".into()], vec![vec![1.0]], vec!["doc".into()], vec![meta("1", 1)])
            .await;
        assert!(matches!(wrong_dim, Err(AppError::Validation(_))));

        let mismatched = index
            .add(vec!["x".into(), "y".into()], vec![vec![1.0, 0.0, 0.0]], vec![], vec![])
            .await;
        assert!(matches!(mismatched, Err(AppError::Validation(_))));
        assert_eq!(index.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_peek_and_reset() {
        let index = seeded_index().await;
        let sample = index.peek(2).await.expect("peek");
        assert_eq!(sample.len(), 2);
        assert_eq!(sample[0].id, "1_a");

        index.reset().await.expect("reset");
        assert_eq!(index.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_corruption_triggers_single_reset_and_retry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = dir.path().join("vector_store_v2");
        std::fs::create_dir_all(&store).expect("store dir");
        std::fs::write(store.join("segment.bin"), b"garbage").expect("write");

        let connector = FlakyConnector::new(1, "database disk image is malformed");
        let index = VectorIndex::open_with(&connector, &store, 3)
            .await
            .expect("recovered");

        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
        assert!(!store.join("segment.bin").exists());
        assert_eq!(index.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_second_corruption_failure_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = dir.path().join("vector_store_v2");
        let connector = FlakyConnector::new(5, "segment checksum mismatch");

        let result = VectorIndex::open_with(&connector, &store, 3).await;
        assert!(matches!(result, Err(AppError::IndexCorrupted(_))));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_failures_do_not_reset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = dir.path().join("vector_store_v2");
        std::fs::create_dir_all(&store).expect("store dir");
        std::fs::write(store.join("keep.bin"), b"data").expect("write");

        let connector = FlakyConnector::new(1, "permission denied");
        let result = VectorIndex::open_with(&connector, &store, 3).await;
        assert!(matches!(result, Err(AppError::VectorStore(_))));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
        assert!(store.join("keep.bin").exists());
    }
}
