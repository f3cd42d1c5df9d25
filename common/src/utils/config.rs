use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Credential placeholder that keeps the chat flow in mock mode.
pub const MOCK_API_KEY: &str = "mock-key";

/// On-disk layout version of the vector store. Bump when the stored schema changes.
pub const VECTOR_STORE_DIR: &str = "vector_store_v2";

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    FastEmbed,
    Hashed,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default)]
    pub translation_model: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_chat_max_tokens")]
    pub chat_max_tokens: u32,
    #[serde(default = "default_surrealdb_address")]
    pub surrealdb_address: String,
    #[serde(default)]
    pub surrealdb_username: Option<String>,
    #[serde(default)]
    pub surrealdb_password: Option<String>,
    #[serde(default = "default_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_database")]
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub embedding_fallback_model: Option<String>,
    #[serde(default)]
    pub embedding_local_model_dir: Option<String>,
    #[serde(default)]
    pub fastembed_cache_dir: Option<String>,
    #[serde(default = "default_hashed_dimension")]
    pub hashed_embedding_dimension: usize,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_index_batch_size")]
    pub index_batch_size: usize,
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
    #[serde(default = "default_chat_history_turns")]
    pub chat_history_turns: usize,
    #[serde(default = "default_abstract_fallback_limit")]
    pub abstract_fallback_limit: usize,
    #[serde(default = "default_true")]
    pub web_search_enabled: bool,
    #[serde(default = "default_web_search_max_results")]
    pub web_search_max_results: usize,
    #[serde(default = "default_true")]
    pub translation_enabled: bool,
    /// Target language of the passage translation tool.
    #[serde(default = "default_passage_language")]
    pub passage_language: String,
    #[serde(default = "default_thinking_timeout_secs")]
    pub thinking_timeout_secs: u64,
    #[serde(default = "default_ingest_max_body_bytes")]
    pub ingest_max_body_bytes: usize,
}

impl AppConfig {
    /// Whether a real language model credential is configured.
    pub fn has_llm_credential(&self) -> bool {
        let key = self.openai_api_key.trim();
        !key.is_empty() && key != MOCK_API_KEY
    }

    pub fn vector_store_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(VECTOR_STORE_DIR)
    }

    pub fn uploads_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("uploads")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: default_base_url(),
            chat_model: default_chat_model(),
            translation_model: None,
            llm_timeout_secs: default_llm_timeout_secs(),
            chat_max_tokens: default_chat_max_tokens(),
            surrealdb_address: default_surrealdb_address(),
            surrealdb_username: None,
            surrealdb_password: None,
            surrealdb_namespace: default_namespace(),
            surrealdb_database: default_database(),
            data_dir: default_data_dir(),
            http_port: default_http_port(),
            embedding_backend: EmbeddingBackend::default(),
            embedding_model: None,
            embedding_fallback_model: None,
            embedding_local_model_dir: None,
            fastembed_cache_dir: None,
            hashed_embedding_dimension: default_hashed_dimension(),
            worker_pool_size: default_worker_pool_size(),
            index_batch_size: default_index_batch_size(),
            retrieval_k: default_retrieval_k(),
            chat_history_turns: default_chat_history_turns(),
            abstract_fallback_limit: default_abstract_fallback_limit(),
            web_search_enabled: true,
            web_search_max_results: default_web_search_max_results(),
            translation_enabled: true,
            passage_language: default_passage_language(),
            thinking_timeout_secs: default_thinking_timeout_secs(),
            ingest_max_body_bytes: default_ingest_max_body_bytes(),
        }
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_chat_model() -> String {
    "deepseek-chat".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_chat_max_tokens() -> u32 {
    1000
}

fn default_surrealdb_address() -> String {
    "surrealkv://./data/library".to_string()
}

fn default_namespace() -> String {
    "library".to_string()
}

fn default_database() -> String {
    "papers".to_string()
}

fn default_http_port() -> u16 {
    8000
}

fn default_hashed_dimension() -> usize {
    384
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_index_batch_size() -> usize {
    10
}

fn default_retrieval_k() -> usize {
    5
}

fn default_chat_history_turns() -> usize {
    6
}

fn default_abstract_fallback_limit() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_web_search_max_results() -> usize {
    3
}

fn default_passage_language() -> String {
    "Simplified Chinese".to_string()
}

fn default_thinking_timeout_secs() -> u64 {
    60
}

fn default_ingest_max_body_bytes() -> usize {
    50 * 1024 * 1024
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_credentials_are_not_usable() {
        let mut config = AppConfig::default();
        assert!(!config.has_llm_credential());

        config.openai_api_key = MOCK_API_KEY.to_string();
        assert!(!config.has_llm_credential());

        config.openai_api_key = "sk-live".to_string();
        assert!(config.has_llm_credential());
    }

    #[test]
    fn test_vector_store_path_is_versioned() {
        let config = AppConfig {
            data_dir: "/var/lib/library".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(
            config.vector_store_path(),
            PathBuf::from("/var/lib/library/vector_store_v2")
        );
    }
}
