use std::{path::PathBuf, sync::Arc, time::Instant};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{chunk::Chunk, paper::Paper},
    },
    utils::{monitor::SystemMonitor, tasks::TaskSupervisor, worker_pool::WorkerPool},
};
use tracing::{debug, info};

use super::PaperUpload;
use crate::{
    analysis::PaperAnalyzer,
    chunker::{Chunker, ExtractedDocument},
    indexer::Indexer,
    utils::url_ingestion::{fetch_paper, PaperLink},
};

/// Side effects of paper processing, behind a seam so the pipeline can be
/// driven against mocks.
#[async_trait]
pub trait PaperServices: Send + Sync {
    async fn download(&self, link: &PaperLink) -> Result<Vec<u8>, AppError>;

    async fn extract(&self, upload: &PaperUpload) -> Result<ExtractedDocument, AppError>;

    async fn persist(
        &self,
        upload: &PaperUpload,
        extracted: &ExtractedDocument,
    ) -> Result<Paper, AppError>;

    async fn schedule_indexing(&self, paper: &Paper, chunks: Vec<Chunk>) -> Result<(), AppError>;

    async fn schedule_analysis(&self, paper: &Paper, full_text: String) -> Result<(), AppError>;
}

pub struct DefaultPaperServices {
    db: Arc<SurrealDbClient>,
    pool: WorkerPool,
    chunker: Chunker,
    indexer: Indexer,
    analyzer: PaperAnalyzer,
    supervisor: TaskSupervisor,
    monitor: Arc<SystemMonitor>,
    uploads_dir: PathBuf,
}

impl DefaultPaperServices {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<SurrealDbClient>,
        pool: WorkerPool,
        chunker: Chunker,
        indexer: Indexer,
        analyzer: PaperAnalyzer,
        supervisor: TaskSupervisor,
        monitor: Arc<SystemMonitor>,
        uploads_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            pool,
            chunker,
            indexer,
            analyzer,
            supervisor,
            monitor,
            uploads_dir,
        }
    }
}

#[async_trait]
impl PaperServices for DefaultPaperServices {
    async fn download(&self, link: &PaperLink) -> Result<Vec<u8>, AppError> {
        fetch_paper(link).await
    }

    async fn extract(&self, upload: &PaperUpload) -> Result<ExtractedDocument, AppError> {
        let started = Instant::now();
        let chunker = self.chunker.clone();
        let bytes = upload.bytes.clone();
        let filename = upload.filename.clone();

        let extracted = self
            .pool
            .run(move || chunker.extract(&bytes, &filename))
            .await?;

        self.monitor.record_extraction(started.elapsed());
        Ok(extracted)
    }

    async fn persist(
        &self,
        upload: &PaperUpload,
        extracted: &ExtractedDocument,
    ) -> Result<Paper, AppError> {
        let id = Paper::allocate_id(&self.db).await?;

        tokio::fs::create_dir_all(&self.uploads_dir).await?;
        let stored_path = self
            .uploads_dir
            .join(format!("{id}_{}", sanitize_filename(&upload.filename)));
        tokio::fs::write(&stored_path, &upload.bytes).await?;

        let title = upload
            .title
            .clone()
            .unwrap_or_else(|| title_from_filename(&upload.filename));
        let mut paper = Paper::new(id, title);
        paper.year = upload.year;
        paper.url = upload.url.clone();
        paper.folder_id = upload.folder_id.clone();
        paper.file_path = Some(stored_path.display().to_string());
        paper.summary = Paper::abstract_from_text(&extracted.full_text);

        self.db.store_item(paper.clone()).await?;
        info!(paper_id = %paper.id, file = %stored_path.display(), "paper stored");
        Ok(paper)
    }

    async fn schedule_indexing(&self, paper: &Paper, chunks: Vec<Chunk>) -> Result<(), AppError> {
        if chunks.is_empty() {
            debug!(paper_id = %paper.id, "no chunks to index");
            return Ok(());
        }
        self.indexer
            .spawn_index(&self.supervisor, chunks, paper.id.clone());
        Ok(())
    }

    async fn schedule_analysis(&self, paper: &Paper, full_text: String) -> Result<(), AppError> {
        if full_text.trim().is_empty() {
            debug!(paper_id = %paper.id, "no text to analyse");
            return Ok(());
        }
        let analyzer = self.analyzer.clone();
        let db = Arc::clone(&self.db);
        let paper_id = paper.id.clone();
        let title = paper.title.clone();

        self.supervisor
            .submit(format!("analysis:{paper_id}"), async move {
                let analysis = analyzer.analyze(&title, &full_text).await?;
                Paper::store_analysis(&paper_id, &analysis, &db).await
            });
        Ok(())
    }
}

/// Title guess from an upload name: the file stem with separators spaced out.
pub fn title_from_filename(filename: &str) -> String {
    let stem = std::path::Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(filename);
    let title = stem.replace(['_', '-'], " ");
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        "Untitled paper".to_string()
    } else {
        title
    }
}

fn sanitize_filename(filename: &str) -> String {
    let name = std::path::Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload");
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_come_from_the_file_stem() {
        assert_eq!(title_from_filename("graph_neural-networks.pdf"), "graph neural networks");
        assert_eq!(title_from_filename("1706.03762v7.pdf"), "1706.03762v7");
        assert_eq!(title_from_filename("___.pdf"), "Untitled paper");
    }

    #[test]
    fn stored_names_are_sanitized() {
        assert_eq!(sanitize_filename("../../etc/pass wd.pdf"), "pass_wd.pdf");
    }
}
