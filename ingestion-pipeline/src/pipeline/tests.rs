use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            chunk::Chunk,
            paper::Paper,
        },
    },
    utils::{
        monitor::SystemMonitor,
        rag_runtime::testing::in_memory_runtime,
        tasks::{TaskOutcome, TaskSupervisor},
        worker_pool::WorkerPool,
    },
};
use retrieval_pipeline::{citations::reconcile_result, Retriever, ScopeFilter};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{services::PaperServices, DefaultPaperServices, PaperPipeline, PaperUpload};
use crate::{
    analysis::PaperAnalyzer,
    chunker::{Chunker, ExtractedDocument},
    indexer::Indexer,
    utils::{pdf_layout::test_pdf, url_ingestion::PaperLink},
};

struct MockServices {
    extracted: ExtractedDocument,
    fail_persist: bool,
    calls: Mutex<Vec<&'static str>>,
    indexed: Mutex<Vec<(String, usize)>>,
    downloads: Mutex<Vec<String>>,
}

impl MockServices {
    fn new(extracted: ExtractedDocument) -> Self {
        Self {
            extracted,
            fail_persist: false,
            calls: Mutex::new(Vec::new()),
            indexed: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
        }
    }

    fn with_text() -> Self {
        let chunks = vec![
            Chunk::new("Diffusion models denoise iteratively.", 1, None).expect("chunk"),
            Chunk::new("Sampling takes many steps.", 2, None).expect("chunk"),
        ];
        Self::new(ExtractedDocument {
            full_text: "--- Page 1 ---\nDiffusion models denoise iteratively.\n\n--- Page 2 ---\nSampling takes many steps.".into(),
            chunks,
            page_has_text: vec![true, true, false],
            diagnostic: None,
        })
    }

    async fn record(&self, stage: &'static str) {
        self.calls.lock().await.push(stage);
    }
}

#[async_trait]
impl PaperServices for MockServices {
    async fn download(&self, link: &PaperLink) -> Result<Vec<u8>, AppError> {
        self.record("download").await;
        self.downloads.lock().await.push(link.download_url.clone());
        Ok(b"%PDF-1.5 fake".to_vec())
    }

    async fn extract(&self, _upload: &PaperUpload) -> Result<ExtractedDocument, AppError> {
        self.record("extract").await;
        Ok(self.extracted.clone())
    }

    async fn persist(
        &self,
        upload: &PaperUpload,
        extracted: &ExtractedDocument,
    ) -> Result<Paper, AppError> {
        self.record("persist").await;
        if self.fail_persist {
            return Err(AppError::Processing("disk full".into()));
        }
        let mut paper = Paper::new(
            "11".into(),
            upload.title.clone().unwrap_or_else(|| "Mock".into()),
        );
        paper.year = upload.year;
        paper.url = upload.url.clone();
        paper.folder_id = upload.folder_id.clone();
        paper.summary = Paper::abstract_from_text(&extracted.full_text);
        Ok(paper)
    }

    async fn schedule_indexing(&self, paper: &Paper, chunks: Vec<Chunk>) -> Result<(), AppError> {
        self.record("index").await;
        self.indexed.lock().await.push((paper.id.clone(), chunks.len()));
        Ok(())
    }

    async fn schedule_analysis(&self, _paper: &Paper, _full_text: String) -> Result<(), AppError> {
        self.record("analysis").await;
        Ok(())
    }
}

#[tokio::test]
async fn paper_pipeline_runs_stages_in_order() {
    let services = Arc::new(MockServices::with_text());
    let pipeline = PaperPipeline::new(services.clone());

    let processed = pipeline
        .process(PaperUpload::new(b"ignored".to_vec(), "diffusion.pdf").in_folder(Some("f1".into())))
        .await
        .expect("pipeline succeeds");

    assert_eq!(processed.paper.id, "11");
    assert_eq!(processed.paper.folder_id.as_deref(), Some("f1"));
    assert_eq!(processed.chunk_count, 2);
    assert_eq!(processed.page_count, 3);
    assert_eq!(processed.pages_without_text, vec![3]);
    assert_eq!(processed.warning.as_deref(), Some("No text was found on page(s) 3."));

    let calls = services.calls.lock().await.clone();
    assert_eq!(calls, ["extract", "persist", "index", "analysis"]);
    assert_eq!(*services.indexed.lock().await, vec![("11".to_string(), 2)]);
}

#[tokio::test]
async fn paper_without_text_is_still_stored_with_warning() {
    let services = Arc::new(MockServices::new(ExtractedDocument {
        page_has_text: vec![false],
        ..ExtractedDocument::default()
    }));
    let pipeline = PaperPipeline::new(services.clone());

    let processed = pipeline
        .process(PaperUpload::new(b"scan".to_vec(), "scan.pdf"))
        .await
        .expect("pipeline succeeds");

    assert_eq!(processed.chunk_count, 0);
    assert!(processed.paper.summary.is_empty());
    assert!(processed
        .warning
        .as_deref()
        .is_some_and(|w| w.contains("not searchable")));
}

#[tokio::test]
async fn persist_failure_stops_before_scheduling() {
    let mut services = MockServices::with_text();
    services.fail_persist = true;
    let services = Arc::new(services);
    let pipeline = PaperPipeline::new(services.clone());

    let result = pipeline
        .process(PaperUpload::new(b"bytes".to_vec(), "x.pdf"))
        .await;
    assert!(matches!(result, Err(AppError::Processing(_))));

    let calls = services.calls.lock().await.clone();
    assert_eq!(calls, ["extract", "persist"]);
}

#[tokio::test]
async fn arxiv_link_is_downloaded_and_annotated() {
    let services = Arc::new(MockServices::with_text());
    let pipeline = PaperPipeline::new(services.clone());

    let processed = pipeline
        .process_url("https://arxiv.org/abs/1706.03762", None)
        .await
        .expect("pipeline succeeds");

    assert_eq!(processed.paper.year, Some(2017));
    assert_eq!(processed.paper.title, "arXiv:1706.03762");
    assert_eq!(
        processed.paper.url.as_deref(),
        Some("https://arxiv.org/abs/1706.03762")
    );
    assert_eq!(
        *services.downloads.lock().await,
        vec!["https://arxiv.org/pdf/1706.03762".to_string()]
    );
    assert_eq!(services.calls.lock().await[0], "download");
}

#[tokio::test]
async fn two_page_pdf_is_stored_and_indexed_end_to_end() {
    let db = Arc::new(
        SurrealDbClient::memory("pipeline_test", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db"),
    );
    let runtime = Arc::new(in_memory_runtime(64));
    let (supervisor, mut reports) = TaskSupervisor::new();
    let uploads = tempfile::tempdir().expect("tempdir");
    let monitor = Arc::new(SystemMonitor::new(std::time::Duration::from_secs(60)));

    let services = DefaultPaperServices::new(
        Arc::clone(&db),
        WorkerPool::new(2).expect("pool"),
        Chunker::default(),
        Indexer::new(Arc::clone(&runtime), 10),
        PaperAnalyzer::default(),
        supervisor,
        Arc::clone(&monitor),
        uploads.path().to_path_buf(),
    );
    let pipeline = PaperPipeline::new(Arc::new(services));

    let pdf = test_pdf::build(&[
        vec![
            (72, 700, "Contrastive learning aligns"),
            (72, 686, "image and text embeddings."),
            (72, 560, "Zero-shot transfer follows."),
        ],
        vec![],
    ]);
    let processed = pipeline
        .process(PaperUpload::new(pdf, "clip_paper.pdf"))
        .await
        .expect("pipeline succeeds");

    assert_eq!(processed.paper.title, "clip paper");
    assert_eq!(processed.pages_without_text, vec![2]);
    assert!(processed.chunk_count >= 2);
    assert!(processed.paper.summary.ends_with("..."));
    assert!(monitor.snapshot().extraction_ms.is_some());

    let stored_file = processed.paper.file_path.clone().expect("file path");
    assert!(std::path::Path::new(&stored_file).exists());

    for _ in 0..2 {
        let report = reports.recv().await.expect("report");
        assert_eq!(report.outcome, TaskOutcome::Succeeded, "{}", report.label);
    }

    let components = runtime.components().await.expect("components");
    let samples = components.index.peek(50).await.expect("peek");
    assert_eq!(samples.len(), processed.chunk_count);
    for sample in samples {
        assert_eq!(sample.metadata.source, processed.paper.id);
        assert_eq!(sample.metadata.page, 1);
        assert!(sample.metadata.decoded_bbox().is_some());
    }

    let stored: Paper = db
        .get_item(&processed.paper.id)
        .await
        .expect("get")
        .expect("paper stored");
    assert_eq!(stored.tags, vec!["unanalyzed".to_string()]);

    let retriever = Retriever::new(Arc::clone(&runtime), 5);
    let result = retriever
        .retrieve(
            "contrastive learning aligns image and text embeddings",
            5,
            &ScopeFilter::Global,
        )
        .await
        .expect("retrieve");
    let result = reconcile_result(result, db.as_ref()).await;

    let top = result.citations.first().expect("a citation");
    assert_eq!(top.page, 1);
    assert_eq!(top.source, processed.paper.title);
    assert!(top.text.contains("Contrastive learning aligns"));
    assert!(result.context_text.contains("(Source: clip paper, Page: 1)"));
}
