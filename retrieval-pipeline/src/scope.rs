use common::{error::AppError, storage::vector_index::SourceFilter};
use serde::Deserialize;
use tracing::debug;

use crate::catalog::PaperCatalog;

/// Which documents a retrieval may draw from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFilter {
    Global,
    /// Non-empty, de-duplicated source ids in request order.
    Sources(Vec<String>),
    /// An explicit scope that turned out empty; matches nothing.
    Nothing,
}

impl ScopeFilter {
    pub fn sources<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for id in ids {
            let id = id.into().trim().to_string();
            if !id.is_empty() && !unique.contains(&id) {
                unique.push(id);
            }
        }
        if unique.is_empty() {
            Self::Nothing
        } else {
            Self::Sources(unique)
        }
    }

    pub fn source_filter(&self) -> SourceFilter {
        match self {
            Self::Global => SourceFilter::Unscoped,
            Self::Sources(ids) => SourceFilter::from_sources(ids),
            Self::Nothing => SourceFilter::MatchNothing,
        }
    }

    /// Explicitly scoped ids; `None` for a global scope.
    pub fn scoped_ids(&self) -> Option<&[String]> {
        match self {
            Self::Global => None,
            Self::Sources(ids) => Some(ids.as_slice()),
            Self::Nothing => Some(&[][..]),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Global => "entire library".to_string(),
            Self::Sources(ids) => format!("{} selected paper(s)", ids.len()),
            Self::Nothing => "empty selection".to_string(),
        }
    }
}

/// Scope as sent by a client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopeRequest {
    #[serde(default)]
    pub paper_ids: Vec<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
}

/// Explicit paper ids win over a folder; neither means the whole library.
/// A folder without papers resolves to `Nothing`, never to global.
pub async fn resolve_scope(
    request: &ScopeRequest,
    catalog: &dyn PaperCatalog,
) -> Result<ScopeFilter, AppError> {
    if request.paper_ids.iter().any(|id| !id.trim().is_empty()) {
        return Ok(ScopeFilter::sources(request.paper_ids.iter().cloned()));
    }

    if let Some(folder_id) = request
        .folder_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        let ids = catalog.folder_paper_ids(folder_id).await?;
        debug!(%folder_id, papers = ids.len(), "folder scope resolved");
        return Ok(ScopeFilter::sources(ids));
    }

    Ok(ScopeFilter::Global)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use common::storage::types::paper::Paper;
    use tokio::sync::Mutex;

    use super::*;

    struct FolderCatalog {
        folder_ids: Vec<String>,
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl PaperCatalog for FolderCatalog {
        async fn papers(&self, _ids: &[String]) -> Result<Vec<Paper>, AppError> {
            Ok(Vec::new())
        }

        async fn folder_paper_ids(&self, _folder_id: &str) -> Result<Vec<String>, AppError> {
            self.calls.lock().await.push("folder");
            Ok(self.folder_ids.clone())
        }
    }

    fn catalog(ids: &[&str]) -> FolderCatalog {
        FolderCatalog {
            folder_ids: ids.iter().map(|id| (*id).to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn paper_ids_take_priority_over_folder() {
        let catalog = catalog(&["9"]);
        let request = ScopeRequest {
            paper_ids: vec!["1".into(), "2".into(), "1".into()],
            folder_id: Some("f".into()),
        };
        let scope = resolve_scope(&request, &catalog).await.expect("scope");
        assert_eq!(scope, ScopeFilter::Sources(vec!["1".into(), "2".into()]));
        assert!(catalog.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn folder_scope_and_empty_folder() {
        let full = catalog(&["3", "4"]);
        let request = ScopeRequest {
            paper_ids: Vec::new(),
            folder_id: Some("reading".into()),
        };
        assert_eq!(
            resolve_scope(&request, &full).await.expect("scope"),
            ScopeFilter::Sources(vec!["3".into(), "4".into()])
        );

        let empty = catalog(&[]);
        let scope = resolve_scope(&request, &empty).await.expect("scope");
        assert_eq!(scope, ScopeFilter::Nothing);
        assert_eq!(scope.source_filter(), SourceFilter::MatchNothing);
    }

    #[tokio::test]
    async fn no_scope_is_global() {
        let scope = resolve_scope(&ScopeRequest::default(), &catalog(&["1"]))
            .await
            .expect("scope");
        assert_eq!(scope, ScopeFilter::Global);
        assert_eq!(scope.source_filter(), SourceFilter::Unscoped);
    }

    #[test]
    fn source_filter_shapes() {
        assert_eq!(
            ScopeFilter::sources(["7"]).source_filter(),
            SourceFilter::Equals("7".into())
        );
        assert_eq!(
            ScopeFilter::sources(["7", "8"]).source_filter(),
            SourceFilter::OneOf(vec!["7".into(), "8".into()])
        );
        assert_eq!(ScopeFilter::sources(Vec::<String>::new()), ScopeFilter::Nothing);
    }
}
