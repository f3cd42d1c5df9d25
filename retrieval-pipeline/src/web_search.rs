use std::{fmt::Write as _, time::Duration};

use async_trait::async_trait;
use common::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

const DUCKDUCKGO_ENDPOINT: &str = "https://api.duckduckgo.com/";
const SEARCH_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Turns a query into attributed snippets from the public web.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>, AppError>;
}

/// Renders results as numbered blocks, each ending in its source URL.
pub fn format_web_results(results: &[WebResult]) -> String {
    let mut text = String::new();
    for (position, result) in results.iter().enumerate() {
        let _ = write!(
            text,
            "[Web Result {}: {}]\n{}\nSource: {}\n\n",
            position + 1,
            result.title,
            result.snippet,
            result.url
        );
    }
    text
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    results: Vec<Topic>,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Topic {
    #[serde(default)]
    text: String,
    #[serde(default, rename = "FirstURL")]
    first_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelatedTopic {
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<Topic>,
    },
    Single(Topic),
}

impl InstantAnswer {
    fn into_results(self, max_results: usize) -> Vec<WebResult> {
        let mut results = Vec::new();
        if !self.abstract_text.trim().is_empty() {
            results.push(WebResult {
                title: if self.heading.is_empty() {
                    "Summary".to_string()
                } else {
                    self.heading
                },
                url: self.abstract_url,
                snippet: self.abstract_text,
            });
        }

        let topics = self.results.into_iter().chain(
            self.related_topics
                .into_iter()
                .flat_map(|related| match related {
                    RelatedTopic::Group { topics } => topics,
                    RelatedTopic::Single(topic) => vec![topic],
                }),
        );
        for topic in topics {
            if topic.text.trim().is_empty() || topic.first_url.is_empty() {
                continue;
            }
            let (title, snippet) = match topic.text.split_once(" - ") {
                Some((title, rest)) => (title.to_string(), rest.to_string()),
                None => (topic.text.clone(), topic.text.clone()),
            };
            results.push(WebResult {
                title,
                url: topic.first_url,
                snippet,
            });
        }

        results.truncate(max_results);
        results
    }
}

/// DuckDuckGo Instant Answer API.
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGoSearch {
    pub fn new() -> Result<Self, AppError> {
        Self::with_endpoint(DUCKDUCKGO_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>, AppError> {
        let url = Url::parse_with_params(
            &self.endpoint,
            &[
                ("q", query),
                ("format", "json"),
                ("no_redirect", "1"),
                ("no_html", "1"),
            ],
        )
        .map_err(|err| AppError::Validation(format!("Invalid search endpoint: {err}")))?;

        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.text().await?;
        let answer: InstantAnswer = serde_json::from_str(&body).map_err(|err| {
            warn!(error = %err, "web search returned an unexpected payload");
            AppError::Processing(format!("Unexpected web search response: {err}"))
        })?;

        let results = answer.into_results(max_results);
        debug!(%query, results = results.len(), "web search finished");
        Ok(results)
    }
}
