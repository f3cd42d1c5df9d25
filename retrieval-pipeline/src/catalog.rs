use std::collections::HashMap;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::paper::Paper},
};

/// Read access to paper metadata needed while answering questions.
#[async_trait]
pub trait PaperCatalog: Send + Sync {
    async fn papers(&self, ids: &[String]) -> Result<Vec<Paper>, AppError>;

    async fn folder_paper_ids(&self, folder_id: &str) -> Result<Vec<String>, AppError>;

    /// Titles keyed by paper id; unknown ids are absent.
    async fn titles(&self, ids: &[String]) -> Result<HashMap<String, String>, AppError> {
        Ok(self
            .papers(ids)
            .await?
            .into_iter()
            .map(|paper| (paper.id, paper.title))
            .collect())
    }
}

#[async_trait]
impl PaperCatalog for SurrealDbClient {
    async fn papers(&self, ids: &[String]) -> Result<Vec<Paper>, AppError> {
        Paper::get_many(ids, self).await
    }

    async fn folder_paper_ids(&self, folder_id: &str) -> Result<Vec<String>, AppError> {
        Paper::ids_in_folder(folder_id, self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_titles_from_database() {
        let db = SurrealDbClient::memory("catalog_test", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.store_item(Paper::new("4".into(), "BERT".into()))
            .await
            .expect("store");

        let titles = db
            .titles(&["4".to_string(), "5".to_string()])
            .await
            .expect("titles");
        assert_eq!(titles.len(), 1);
        assert_eq!(titles.get("4").map(String::as_str), Some("BERT"));
    }
}
