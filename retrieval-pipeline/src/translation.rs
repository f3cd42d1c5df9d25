use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use common::{
    error::AppError,
    utils::llm::{ChatCompletion, ChatMessage},
};
use regex::Regex;

const TRANSLATION_MAX_TOKENS: u32 = 200;

pub static QUERY_TRANSLATION_SYSTEM_MESSAGE: &str = "Translate the user's search query into \
English for searching academic papers. Keep technical terms and acronyms. Reply with the \
translated query only.";

/// Rewrites a query into the language the library is indexed in.
#[async_trait]
pub trait QueryTranslator: Send + Sync {
    async fn translate(&self, query: &str) -> Result<String, AppError>;
}

fn cjk_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[一-鿿぀-ヿ가-힯]")
            .unwrap_or_else(|err| unreachable!("static CJK pattern is valid: {err}"))
    })
}

/// Whether `text` contains Chinese, Japanese kana or Hangul characters.
pub fn contains_cjk(text: &str) -> bool {
    cjk_pattern().is_match(text)
}

pub struct LlmTranslator {
    llm: Arc<dyn ChatCompletion>,
}

impl LlmTranslator {
    pub fn new(llm: Arc<dyn ChatCompletion>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl QueryTranslator for LlmTranslator {
    async fn translate(&self, query: &str) -> Result<String, AppError> {
        let messages = vec![
            ChatMessage::system(QUERY_TRANSLATION_SYSTEM_MESSAGE),
            ChatMessage::user(query),
        ];
        let translated = self.llm.complete(messages, TRANSLATION_MAX_TOKENS).await?;
        let translated = translated.trim().trim_matches('"').trim();
        if translated.is_empty() {
            return Err(AppError::LLMParsing("translation was empty".into()));
        }
        Ok(translated.to_string())
    }
}
