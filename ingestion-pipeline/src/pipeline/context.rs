use common::{error::AppError, storage::types::paper::Paper};
use tracing::error;

use super::services::PaperServices;
use crate::chunker::ExtractedDocument;

/// What extraction found, kept after the chunks are handed to indexing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub chunk_count: usize,
    pub page_count: usize,
    pub pages_without_text: Vec<u32>,
    pub diagnostic: Option<String>,
}

impl ExtractionSummary {
    pub fn of(document: &ExtractedDocument) -> Self {
        Self {
            chunk_count: document.chunks.len(),
            page_count: document.page_count(),
            pages_without_text: document.pages_without_text(),
            diagnostic: document.diagnostic.clone(),
        }
    }
}

pub struct PaperContext<'a> {
    pub filename: String,
    pub services: &'a dyn PaperServices,
    pub extracted: Option<ExtractedDocument>,
    pub summary: ExtractionSummary,
    pub paper: Option<Paper>,
}

impl<'a> PaperContext<'a> {
    pub fn new(filename: &str, services: &'a dyn PaperServices) -> Self {
        Self {
            filename: filename.to_string(),
            services,
            extracted: None,
            summary: ExtractionSummary::default(),
            paper: None,
        }
    }

    pub fn extracted(&self) -> Result<&ExtractedDocument, AppError> {
        self.extracted
            .as_ref()
            .ok_or_else(|| AppError::InternalError("extracted document expected to be available".into()))
    }

    pub fn take_extracted(&mut self) -> Result<ExtractedDocument, AppError> {
        self.extracted.take().ok_or_else(|| {
            AppError::InternalError("extracted document expected to be available for scheduling".into())
        })
    }

    pub fn paper(&self) -> Result<&Paper, AppError> {
        self.paper
            .as_ref()
            .ok_or_else(|| AppError::InternalError("stored paper expected to be available".into()))
    }

    pub fn take_paper(&mut self) -> Result<Paper, AppError> {
        self.paper
            .take()
            .ok_or_else(|| AppError::InternalError("stored paper expected to be available".into()))
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(filename = %self.filename, error = %err, "paper processing aborted");
        err
    }
}
