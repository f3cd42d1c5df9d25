use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Paper, "paper", {
    title: String,
    author: Option<String>,
    year: Option<i32>,
    #[serde(rename = "abstract", default)]
    summary: String,
    url: Option<String>,
    file_path: Option<String>,
    folder_id: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    problem: Option<String>,
    method: Option<String>,
    limitation: Option<String>,
    user_notes: Option<String>
});

/// Number of characters of extracted text kept as the stored abstract.
pub const ABSTRACT_CHARS: usize = 500;

/// Structured reading notes produced for a paper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperAnalysis {
    pub tags: Vec<String>,
    pub problem: String,
    pub method: String,
    pub limitation: String,
}

impl Paper {
    pub fn new(id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            title,
            author: None,
            year: None,
            summary: String::new(),
            url: None,
            file_path: None,
            folder_id: None,
            tags: Vec::new(),
            problem: None,
            method: None,
            limitation: None,
            user_notes: None,
        }
    }

    /// Builds the stored abstract from the leading part of the extracted text.
    pub fn abstract_from_text(full_text: &str) -> String {
        let trimmed = full_text.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        let head: String = trimmed.chars().take(ABSTRACT_CHARS).collect();
        format!("{head}...")
    }

    /// Allocates the next numeric paper id. Paper ids double as the vector
    /// store `source` key, so they stay purely numeric.
    pub async fn allocate_id(db: &SurrealDbClient) -> Result<String, AppError> {
        let mut response = db
            .client
            .query("UPSERT type::thing('sequence', 'paper') SET value += 1 RETURN value")
            .await?;
        let value: Option<i64> = response.take((0, "value"))?;
        value
            .map(|v| v.to_string())
            .ok_or_else(|| AppError::InternalError("paper id sequence returned nothing".into()))
    }

    pub async fn get_many(ids: &[String], db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let papers: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE record::id(id) IN $ids")
            .bind(("table", Self::table_name()))
            .bind(("ids", ids.to_vec()))
            .await?
            .take(0)?;
        Ok(papers)
    }

    /// Ids of the papers filed under `folder_id`, oldest first.
    pub async fn ids_in_folder(
        folder_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<String>, AppError> {
        let mut papers: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE folder_id = $folder_id")
            .bind(("table", Self::table_name()))
            .bind(("folder_id", folder_id.to_string()))
            .await?
            .take(0)?;
        papers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(papers.into_iter().map(|p| p.id).collect())
    }

    pub async fn store_analysis(
        id: &str,
        analysis: &PaperAnalysis,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id) SET tags = $tags, problem = $problem, \
                 method = $method, limitation = $limitation, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("tags", analysis.tags.clone()))
            .bind(("problem", analysis.problem.clone()))
            .bind(("method", analysis.method.clone()))
            .bind(("limitation", analysis.limitation.clone()))
            .await?
            .check()?;
        Ok(())
    }
}
