mod config;
mod context;
mod stages;
mod state;

pub use config::AssemblyTuning;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{error::AppError, utils::monitor::SystemMonitor};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use self::{
    context::AssemblyContext,
    stages::{
        abstract_fallback, assemble_prompt, global_scan as scan_query, resolve_scope, retrieve,
        web_fallback,
    },
    state::global_scan,
};
use crate::{
    catalog::PaperCatalog,
    retriever::{Citation, Retriever},
    scope::ScopeRequest,
    translation::QueryTranslator,
    web_search::WebSearch,
};

pub const NO_INTERNAL_CONTEXT: &str = "No relevant internal documents found.";
pub const WEB_PROGRESS_MESSAGE: &str = "[Searching Web]...\n";
pub const ABSTRACT_SOURCE: &str = "Paper Abstract";
pub const WEB_SOURCE: &str = "Global Network";

/// A question plus the part of the library it may draw from.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextRequest {
    pub query: String,
    #[serde(flatten)]
    pub scope: ScopeRequest,
    #[serde(default)]
    pub deep_search: bool,
}

impl ContextRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// Everything the answering model needs besides the conversation.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    pub context: String,
    pub citations: Vec<Citation>,
    /// Distinct sources in order of first use, including the abstract and
    /// web markers.
    pub sources: Vec<String>,
    pub effective_query: String,
    pub translated: bool,
    pub abstract_used: bool,
    pub web_used: bool,
}

/// Builds the context block for a question: query normalisation and
/// translation, scope resolution, retrieval, then abstract and web fallbacks.
pub struct ContextAssembler {
    pub(crate) retriever: Retriever,
    pub(crate) catalog: Arc<dyn PaperCatalog>,
    pub(crate) translator: Option<Arc<dyn QueryTranslator>>,
    pub(crate) web: Option<Arc<dyn WebSearch>>,
    pub(crate) monitor: Arc<SystemMonitor>,
    pub(crate) tuning: AssemblyTuning,
}

impl ContextAssembler {
    pub fn new(
        retriever: Retriever,
        catalog: Arc<dyn PaperCatalog>,
        monitor: Arc<SystemMonitor>,
        tuning: AssemblyTuning,
    ) -> Self {
        Self {
            retriever,
            catalog,
            translator: None,
            web: None,
            monitor,
            tuning,
        }
    }

    #[must_use]
    pub fn with_translator(mut self, translator: Arc<dyn QueryTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    #[must_use]
    pub fn with_web_search(mut self, web: Arc<dyn WebSearch>) -> Self {
        self.web = Some(web);
        self
    }

    pub fn tuning(&self) -> &AssemblyTuning {
        &self.tuning
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    /// `progress`, when given, receives a notice before any web search so a
    /// streaming client can show it.
    #[tracing::instrument(skip_all, fields(deep_search = request.deep_search))]
    pub async fn assemble(
        &self,
        request: &ContextRequest,
        progress: Option<&mpsc::Sender<String>>,
    ) -> Result<AssembledContext, AppError> {
        let mut ctx = AssemblyContext::new(self, request, progress);
        let machine = global_scan();
        let started = Instant::now();

        let machine = scan_query(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = resolve_scope(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;

        let stage_start = Instant::now();
        let machine = retrieve(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let retrieve_ms = Self::duration_millis(stage_start.elapsed());

        let machine = abstract_fallback(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = web_fallback(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let (_machine, assembled) =
            assemble_prompt(machine, &mut ctx).map_err(|err| ctx.abort(err))?;

        info!(
            citations = assembled.citations.len(),
            translated = assembled.translated,
            abstract_used = assembled.abstract_used,
            web_used = assembled.web_used,
            retrieve_ms,
            total_ms = Self::duration_millis(started.elapsed()),
            "context assembled"
        );
        Ok(assembled)
    }
}
