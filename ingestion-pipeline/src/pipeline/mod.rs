mod context;
mod services;
mod stages;
mod state;

pub use context::ExtractionSummary;
#[allow(clippy::module_name_repetitions)]
pub use services::{title_from_filename, DefaultPaperServices, PaperServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use common::{error::AppError, storage::types::paper::Paper};
use serde::Serialize;
use tracing::info;

use self::{
    context::PaperContext,
    stages::{extract, persist, schedule},
    state::ready,
};
use crate::utils::url_ingestion::parse_paper_url;

/// A document submitted for the library.
#[derive(Debug, Clone)]
pub struct PaperUpload {
    pub bytes: Bytes,
    pub filename: String,
    pub folder_id: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub year: Option<i32>,
}

impl PaperUpload {
    pub fn new(bytes: impl Into<Bytes>, filename: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            filename: filename.into(),
            folder_id: None,
            title: None,
            url: None,
            year: None,
        }
    }

    #[must_use]
    pub fn in_folder(mut self, folder_id: Option<String>) -> Self {
        self.folder_id = folder_id.filter(|id| !id.trim().is_empty());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedPaper {
    pub paper: Paper,
    pub chunk_count: usize,
    pub page_count: usize,
    pub pages_without_text: Vec<u32>,
    /// Human-readable note when some or all of the text could not be read.
    pub warning: Option<String>,
}

/// Takes an uploaded paper from raw bytes to a stored record, then schedules
/// indexing and analysis in the background.
#[allow(clippy::module_name_repetitions)]
pub struct PaperPipeline {
    services: Arc<dyn PaperServices>,
}

impl PaperPipeline {
    pub fn new(services: Arc<dyn PaperServices>) -> Self {
        Self { services }
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    /// Stores the paper even when no text could be extracted; the returned
    /// warning says so.
    #[tracing::instrument(
        skip_all,
        fields(filename = %upload.filename, folder_id = ?upload.folder_id)
    )]
    pub async fn process(&self, upload: PaperUpload) -> Result<ProcessedPaper, AppError> {
        let mut ctx = PaperContext::new(&upload.filename, self.services.as_ref());
        let machine = ready();
        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = extract(machine, &mut ctx, &upload)
            .await
            .map_err(|err| ctx.abort(err))?;
        let extract_ms = Self::duration_millis(stage_start.elapsed());

        let stage_start = Instant::now();
        let machine = persist(machine, &mut ctx, &upload)
            .await
            .map_err(|err| ctx.abort(err))?;
        let persist_ms = Self::duration_millis(stage_start.elapsed());

        let _machine = schedule(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;

        let paper = ctx.take_paper()?;
        let summary = ctx.summary;
        info!(
            paper_id = %paper.id,
            chunks = summary.chunk_count,
            total_ms = Self::duration_millis(pipeline_started.elapsed()),
            extract_ms,
            persist_ms,
            "paper processed"
        );

        Ok(ProcessedPaper {
            warning: extraction_warning(&summary),
            chunk_count: summary.chunk_count,
            page_count: summary.page_count,
            pages_without_text: summary.pages_without_text,
            paper,
        })
    }

    /// Downloads a paper by link and processes it like an upload.
    #[tracing::instrument(skip_all, fields(url = %url))]
    pub async fn process_url(
        &self,
        url: &str,
        folder_id: Option<String>,
    ) -> Result<ProcessedPaper, AppError> {
        let link = parse_paper_url(url)?;
        let bytes = self.services.download(&link).await?;

        let mut upload = PaperUpload::new(bytes, link.filename.clone()).in_folder(folder_id);
        upload.url = Some(link.original_url.clone());
        upload.year = link.year;
        upload.title = link.arxiv_id.as_ref().map(|id| format!("arXiv:{id}"));

        self.process(upload).await
    }
}

fn extraction_warning(summary: &ExtractionSummary) -> Option<String> {
    if let Some(diagnostic) = &summary.diagnostic {
        return Some(format!(
            "Text extraction failed ({diagnostic}); the paper was saved but is not searchable."
        ));
    }
    if summary.chunk_count == 0 {
        return Some(
            "No extractable text was found; the paper was saved but is not searchable.".to_string(),
        );
    }
    if summary.pages_without_text.is_empty() {
        return None;
    }
    let pages = summary
        .pages_without_text
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!("No text was found on page(s) {pages}."))
}

#[cfg(test)]
mod tests;
