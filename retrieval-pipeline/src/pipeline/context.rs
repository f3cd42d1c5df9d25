use tokio::sync::mpsc;
use tracing::error;

use super::{ContextAssembler, ContextRequest};
use crate::{retriever::RetrievalResult, scope::ScopeFilter};

/// Working state threaded through the assembly stages.
pub struct AssemblyContext<'a> {
    pub assembler: &'a ContextAssembler,
    pub request: &'a ContextRequest,
    pub progress: Option<&'a mpsc::Sender<String>>,
    pub query: String,
    pub effective_query: String,
    pub translated: bool,
    pub scope: ScopeFilter,
    pub retrieval: RetrievalResult,
    pub abstracts: String,
    pub web: String,
    pub sources: Vec<String>,
}

impl<'a> AssemblyContext<'a> {
    pub fn new(
        assembler: &'a ContextAssembler,
        request: &'a ContextRequest,
        progress: Option<&'a mpsc::Sender<String>>,
    ) -> Self {
        Self {
            assembler,
            request,
            progress,
            query: String::new(),
            effective_query: String::new(),
            translated: false,
            scope: ScopeFilter::Global,
            retrieval: RetrievalResult::default(),
            abstracts: String::new(),
            web: String::new(),
            sources: Vec::new(),
        }
    }

    pub fn add_source(&mut self, source: &str) {
        if !self.sources.iter().any(|existing| existing == source) {
            self.sources.push(source.to_string());
        }
    }

    /// No passages and no abstracts were found in the library.
    pub fn internal_context_is_empty(&self) -> bool {
        self.retrieval.context_text.trim().is_empty() && self.abstracts.trim().is_empty()
    }

    pub fn abort(&mut self, err: common::error::AppError) -> common::error::AppError {
        error!(query = %self.query, error = %err, "context assembly aborted");
        err
    }
}
