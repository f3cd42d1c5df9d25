use common::utils::config::AppConfig;
use serde::{Deserialize, Serialize};

/// Tunable parameters of context assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyTuning {
    /// Passages retrieved per question.
    pub retrieval_k: usize,
    /// Largest explicit scope for which abstracts stand in for passages.
    pub abstract_fallback_limit: usize,
    pub web_max_results: usize,
    pub translation_enabled: bool,
    pub web_search_enabled: bool,
}

impl Default for AssemblyTuning {
    fn default() -> Self {
        Self {
            retrieval_k: 5,
            abstract_fallback_limit: 5,
            web_max_results: 3,
            translation_enabled: true,
            web_search_enabled: true,
        }
    }
}

impl AssemblyTuning {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            retrieval_k: config.retrieval_k,
            abstract_fallback_limit: config.abstract_fallback_limit,
            web_max_results: config.web_search_max_results,
            translation_enabled: config.translation_enabled,
            web_search_enabled: config.web_search_enabled,
        }
    }
}
