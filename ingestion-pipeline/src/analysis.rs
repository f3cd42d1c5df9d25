use std::sync::Arc;

use common::{
    error::AppError,
    storage::types::paper::PaperAnalysis,
    utils::llm::{ChatCompletion, ChatMessage},
};
use serde::Deserialize;
use tracing::{debug, warn};

/// Leading characters of the paper shown to the model.
const ANALYSIS_INPUT_CHARS: usize = 6_000;
const ANALYSIS_MAX_TOKENS: u32 = 800;

pub static PAPER_ANALYSIS_SYSTEM_MESSAGE: &str = r#"You are a research assistant reading an academic paper.
Respond with a single JSON object and nothing else, using exactly these keys:
{"tags": [3 to 6 short topic tags], "problem": "the problem the paper addresses",
"method": "the approach it proposes", "limitation": "its main limitations"}
Answer in the language of the paper."#;

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    problem: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    limitation: String,
}

/// Produces structured reading notes for a paper.
#[derive(Clone, Default)]
pub struct PaperAnalyzer {
    llm: Option<Arc<dyn ChatCompletion>>,
}

impl PaperAnalyzer {
    /// `None` means no credential; analyses are then placeholders.
    pub fn new(llm: Option<Arc<dyn ChatCompletion>>) -> Self {
        Self { llm }
    }

    pub async fn analyze(&self, title: &str, full_text: &str) -> Result<PaperAnalysis, AppError> {
        let Some(llm) = &self.llm else {
            debug!(%title, "no language model configured; using placeholder analysis");
            return Ok(placeholder_analysis());
        };

        let excerpt: String = full_text.chars().take(ANALYSIS_INPUT_CHARS).collect();
        let messages = vec![
            ChatMessage::system(PAPER_ANALYSIS_SYSTEM_MESSAGE),
            ChatMessage::user(format!("Title: {title}\n\nContent:\n{excerpt}")),
        ];
        let response = llm.complete(messages, ANALYSIS_MAX_TOKENS).await?;
        parse_analysis(&response)
    }
}

fn placeholder_analysis() -> PaperAnalysis {
    PaperAnalysis {
        tags: vec!["unanalyzed".to_string()],
        problem: "Analysis unavailable: no language model configured.".to_string(),
        method: String::new(),
        limitation: String::new(),
    }
}

/// Parses the model reply, tolerating a fenced code block around the JSON.
pub fn parse_analysis(response: &str) -> Result<PaperAnalysis, AppError> {
    let body = strip_code_fence(response);
    let raw: RawAnalysis = serde_json::from_str(body).map_err(|err| {
        warn!(error = %err, "paper analysis was not valid JSON");
        AppError::LLMParsing(format!("Failed to parse paper analysis: {err}"))
    })?;

    Ok(PaperAnalysis {
        tags: raw
            .tags
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect(),
        problem: raw.problem.trim().to_string(),
        method: raw.method.trim().to_string(),
        limitation: raw.limitation.trim().to_string(),
    })
}

fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
