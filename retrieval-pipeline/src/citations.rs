use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::{
    catalog::PaperCatalog,
    retriever::{Citation, RetrievalResult},
};

fn is_numeric_source(source: &str) -> bool {
    !source.is_empty() && source.bytes().all(|b| b.is_ascii_digit())
}

/// Replaces numeric source ids with paper titles using one batched lookup.
/// Non-numeric sources pass through; a failed lookup leaves every citation
/// as it was.
pub async fn reconcile(citations: Vec<Citation>, catalog: &dyn PaperCatalog) -> Vec<Citation> {
    let ids: Vec<String> = citations
        .iter()
        .filter(|citation| is_numeric_source(&citation.source))
        .map(|citation| citation.source.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if ids.is_empty() {
        return citations;
    }

    let titles = match catalog.titles(&ids).await {
        Ok(titles) => titles,
        Err(err) => {
            warn!(error = %err, lookups = ids.len(), "citation title lookup failed");
            return citations;
        }
    };
    debug!(requested = ids.len(), resolved = titles.len(), "citation titles resolved");

    citations
        .into_iter()
        .map(|mut citation| {
            if let Some(title) = titles.get(&citation.source) {
                citation.source.clone_from(title);
            }
            citation
        })
        .collect()
}

/// Reconciles a retrieval result and re-renders its context text so the
/// prompt names papers by title.
pub async fn reconcile_result(result: RetrievalResult, catalog: &dyn PaperCatalog) -> RetrievalResult {
    if result.citations.is_empty() {
        return result;
    }
    RetrievalResult::from_citations(reconcile(result.citations, catalog).await)
}
