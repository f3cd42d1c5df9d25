use std::fmt::Write as _;

use common::{error::AppError, utils::monitor::AiState};
use state_machines::core::GuardError;
use tracing::{debug, info, instrument, warn};

use super::{
    context::AssemblyContext,
    state::{
        AbstractFallback, AssemblyMachine, Done, GlobalScan, PromptAssembly, Retrieval,
        ScopeResolution, WebFallback,
    },
    AssembledContext, ABSTRACT_SOURCE, NO_INTERNAL_CONTEXT, WEB_PROGRESS_MESSAGE, WEB_SOURCE,
};
use crate::{
    citations::reconcile_result,
    scope::{resolve_scope as resolve_request_scope, ScopeFilter},
    translation::contains_cjk,
    web_search::format_web_results,
};

/// Normalises the query and translates CJK input for retrieval. A failed
/// translation keeps the original wording.
#[instrument(level = "trace", skip_all)]
pub async fn global_scan(
    machine: AssemblyMachine<(), GlobalScan>,
    ctx: &mut AssemblyContext<'_>,
) -> Result<AssemblyMachine<(), ScopeResolution>, AppError> {
    let query = ctx
        .request
        .query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if query.is_empty() {
        return Err(AppError::Validation("Query must not be empty".to_string()));
    }
    ctx.query.clone_from(&query);
    ctx.effective_query = query;

    let assembler = ctx.assembler;
    if let (true, Some(translator)) = (
        assembler.tuning.translation_enabled,
        &assembler.translator,
    ) {
        if contains_cjk(&ctx.query) {
            match translator.translate(&ctx.query).await {
                Ok(translated) => {
                    debug!(original = %ctx.query, %translated, "query translated for retrieval");
                    ctx.effective_query = translated;
                    ctx.translated = true;
                }
                Err(err) => {
                    warn!(error = %err, "query translation failed; using original query");
                }
            }
        }
    }

    machine
        .scan()
        .map_err(|(_, guard)| map_guard_error("scan", &guard))
}

/// A failed folder lookup narrows to nothing rather than widening to the
/// whole library.
#[instrument(level = "trace", skip_all)]
pub async fn resolve_scope(
    machine: AssemblyMachine<(), ScopeResolution>,
    ctx: &mut AssemblyContext<'_>,
) -> Result<AssemblyMachine<(), Retrieval>, AppError> {
    let catalog = ctx.assembler.catalog.as_ref();
    ctx.scope = match resolve_request_scope(&ctx.request.scope, catalog).await {
        Ok(scope) => scope,
        Err(err) => {
            warn!(error = %err, "scope lookup failed; matching nothing");
            ScopeFilter::Nothing
        }
    };
    debug!(scope = %ctx.scope.label(), "scope resolved");

    machine
        .resolve_scope()
        .map_err(|(_, guard)| map_guard_error("resolve_scope", &guard))
}

#[instrument(level = "trace", skip_all)]
pub async fn retrieve(
    machine: AssemblyMachine<(), Retrieval>,
    ctx: &mut AssemblyContext<'_>,
) -> Result<AssemblyMachine<(), AbstractFallback>, AppError> {
    let result = ctx
        .assembler
        .retriever
        .retrieve(
            &ctx.effective_query,
            ctx.assembler.tuning.retrieval_k,
            &ctx.scope,
        )
        .await?;
    let result = reconcile_result(result, ctx.assembler.catalog.as_ref()).await;

    let sources: Vec<String> = result
        .citations
        .iter()
        .map(|citation| citation.source.clone())
        .collect();
    for source in &sources {
        ctx.add_source(source);
    }
    ctx.retrieval = result;

    machine
        .retrieve()
        .map_err(|(_, guard)| map_guard_error("retrieve", &guard))
}

/// With no passages and a small explicit scope, the stored abstracts of the
/// scoped papers stand in for retrieved text.
#[instrument(level = "trace", skip_all)]
pub async fn abstract_fallback(
    machine: AssemblyMachine<(), AbstractFallback>,
    ctx: &mut AssemblyContext<'_>,
) -> Result<AssemblyMachine<(), WebFallback>, AppError> {
    let limit = ctx.assembler.tuning.abstract_fallback_limit;
    let scoped_ids = match &ctx.scope {
        ScopeFilter::Sources(ids) if (1..=limit).contains(&ids.len()) => Some(ids.clone()),
        _ => None,
    };

    if let (true, Some(ids)) = (ctx.retrieval.citations.is_empty(), scoped_ids) {
        match ctx.assembler.catalog.papers(&ids).await {
            Ok(mut papers) => {
                papers.sort_by_key(|paper| ids.iter().position(|id| *id == paper.id));
                let mut abstracts = String::new();
                for paper in papers.iter().filter(|p| !p.summary.trim().is_empty()) {
                    let _ = write!(
                        abstracts,
                        "[Abstract: {}]\n{}\n\n",
                        paper.title,
                        paper.summary.trim()
                    );
                }
                if !abstracts.is_empty() {
                    debug!(papers = papers.len(), "abstracts injected as context");
                    ctx.abstracts = abstracts;
                    ctx.add_source(ABSTRACT_SOURCE);
                }
            }
            Err(err) => warn!(error = %err, "abstract lookup failed"),
        }
    }

    machine
        .inject_abstracts()
        .map_err(|(_, guard)| map_guard_error("inject_abstracts", &guard))
}

/// Searches the web when the library had nothing or a deep search was
/// requested. Clients are told before the search starts.
#[instrument(level = "trace", skip_all)]
pub async fn web_fallback(
    machine: AssemblyMachine<(), WebFallback>,
    ctx: &mut AssemblyContext<'_>,
) -> Result<AssemblyMachine<(), PromptAssembly>, AppError> {
    let assembler = ctx.assembler;
    let wanted = ctx.internal_context_is_empty() || ctx.request.deep_search;
    let search = assembler
        .web
        .as_ref()
        .filter(|_| assembler.tuning.web_search_enabled);

    if let (true, Some(search)) = (wanted, search) {
        if let Some(progress) = ctx.progress {
            if progress.send(WEB_PROGRESS_MESSAGE.to_string()).await.is_err() {
                debug!("progress receiver dropped");
            }
        }

        let monitor = &assembler.monitor;
        let previous = monitor.ai_state();
        monitor.set_ai_state(AiState::Searching);
        let outcome = search
            .search(&ctx.effective_query, assembler.tuning.web_max_results)
            .await;
        monitor.set_ai_state(previous);

        match outcome {
            Ok(results) if !results.is_empty() => {
                info!(results = results.len(), "web results added to context");
                ctx.web = format_web_results(&results);
                ctx.add_source(WEB_SOURCE);
            }
            Ok(_) => debug!("web search returned nothing"),
            Err(err) => warn!(error = %err, "web search failed"),
        }
    }

    machine
        .search_web()
        .map_err(|(_, guard)| map_guard_error("search_web", &guard))
}

#[instrument(level = "trace", skip_all)]
pub fn assemble_prompt(
    machine: AssemblyMachine<(), PromptAssembly>,
    ctx: &mut AssemblyContext<'_>,
) -> Result<(AssemblyMachine<(), Done>, AssembledContext), AppError> {
    let mut context = String::from("[System Metadata]\n");
    let _ = writeln!(context, "Query: {}", ctx.query);
    if ctx.translated {
        let _ = writeln!(context, "Search query: {}", ctx.effective_query);
    }
    let _ = writeln!(context, "Scope: {}", ctx.scope.label());
    let _ = writeln!(context, "Retrieved passages: {}", ctx.retrieval.citations.len());

    context.push_str("\n[Retrieved Content]\n");
    if ctx.internal_context_is_empty() {
        context.push_str(NO_INTERNAL_CONTEXT);
        context.push('\n');
    } else {
        context.push_str(&ctx.retrieval.context_text);
        context.push_str(&ctx.abstracts);
    }

    if !ctx.web.is_empty() {
        context.push_str("\n[Web Intel]\n");
        context.push_str(&ctx.web);
    }

    let assembled = AssembledContext {
        context: context.trim_end().to_string(),
        citations: std::mem::take(&mut ctx.retrieval.citations),
        sources: std::mem::take(&mut ctx.sources),
        effective_query: ctx.effective_query.clone(),
        translated: ctx.translated,
        abstract_used: !ctx.abstracts.is_empty(),
        web_used: !ctx.web.is_empty(),
    };

    let machine = machine
        .assemble()
        .map_err(|(_, guard)| map_guard_error("assemble", &guard))?;
    Ok((machine, assembled))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid context assembly transition during {event}: {guard:?}"
    ))
}
