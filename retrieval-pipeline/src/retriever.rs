use std::{fmt::Write as _, sync::Arc};

use common::{
    error::AppError,
    storage::types::chunk::BoundingBox,
    utils::rag_runtime::RagRuntime,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::scope::ScopeFilter;

/// A retrieved passage, numbered as it appears in the context text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub index: usize,
    pub text: String,
    pub source: String,
    pub page: u32,
    pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub context_text: String,
    pub citations: Vec<Citation>,
}

impl RetrievalResult {
    pub fn from_citations(citations: Vec<Citation>) -> Self {
        Self {
            context_text: format_context(&citations),
            citations,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }
}

/// One `[i] passage (Source: S, Page: P)` entry per citation, in order.
pub fn format_context(citations: &[Citation]) -> String {
    let mut context = String::new();
    for citation in citations {
        let _ = write!(
            context,
            "[{}] {} (Source: {}, Page: {})\n\n",
            citation.index, citation.text, citation.source, citation.page
        );
    }
    context
}

/// Semantic search over the vector index.
#[derive(Clone)]
pub struct Retriever {
    runtime: Arc<RagRuntime>,
    default_k: usize,
}

impl Retriever {
    pub fn new(runtime: Arc<RagRuntime>, default_k: usize) -> Self {
        Self {
            runtime,
            default_k: default_k.max(1),
        }
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Top `k` passages for `query` within `scope`. Degraded RAG and search
    /// failures both yield an empty result; only index corruption is an error.
    #[instrument(skip_all, fields(k = k, scope = %scope.label()))]
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        scope: &ScopeFilter,
    ) -> Result<RetrievalResult, AppError> {
        if query.trim().is_empty() || k == 0 || matches!(scope, ScopeFilter::Nothing) {
            return Ok(RetrievalResult::default());
        }

        let Some(components) = self.runtime.components_if_available().await? else {
            return Ok(RetrievalResult::default());
        };

        let embedding = match components.embedder.embed(query).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(error = %err, "query embedding failed; continuing without retrieval");
                return Ok(RetrievalResult::default());
            }
        };

        let matches = match components
            .index
            .query(&embedding, k, &scope.source_filter())
            .await
        {
            Ok(matches) => matches,
            Err(err) => {
                warn!(error = %err, "vector query failed; continuing without retrieval");
                return Ok(RetrievalResult::default());
            }
        };

        let citations: Vec<Citation> = matches
            .into_iter()
            .enumerate()
            .map(|(position, hit)| Citation {
                index: position + 1,
                bbox: hit.metadata.decoded_bbox(),
                page: hit.metadata.page,
                source: hit.metadata.source,
                text: hit.document,
            })
            .collect();

        debug!(hits = citations.len(), "retrieval finished");
        Ok(RetrievalResult::from_citations(citations))
    }

    /// Retrieval with the default `k`, optionally limited to the given
    /// sources. An empty filter list matches nothing.
    pub async fn retrieve_context(
        &self,
        query: &str,
        file_filter: Option<&[String]>,
    ) -> Result<RetrievalResult, AppError> {
        let scope = match file_filter {
            Some(ids) => ScopeFilter::sources(ids.iter().cloned()),
            None => ScopeFilter::Global,
        };
        self.retrieve(query, self.default_k, &scope).await
    }
}
