use std::{sync::Arc, time::Instant};

use common::{
    error::AppError,
    utils::{
        config::AppConfig,
        llm::{ChatCompletion, ChatMessage},
        monitor::{AiState, SystemMonitor},
    },
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

const PASSAGE_MAX_TOKENS: u32 = 1000;
const MAX_PASSAGE_CHARS: usize = 8000;

pub static PASSAGE_ANALYSIS_SYSTEM_MESSAGE: &str = "You help a researcher read a paper. \
Explain the selected passage: what it claims, the method or argument behind it, and any \
assumption or limitation it relies on. Be concise and do not invent details that are not \
in the passage.";

/// What to do with a passage selected in the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassageMode {
    Translate,
    #[serde(alias = "decipher")]
    Analyze,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PassageRequest {
    pub text: String,
    pub mode: PassageMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassageResult {
    pub mode: PassageMode,
    pub result: String,
}

/// One-shot translation or explanation of a reader selection.
pub struct PassageAssistant {
    llm: Option<Arc<dyn ChatCompletion>>,
    monitor: Arc<SystemMonitor>,
    language: String,
}

impl PassageAssistant {
    pub fn new(
        llm: Option<Arc<dyn ChatCompletion>>,
        monitor: Arc<SystemMonitor>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            monitor,
            language: language.into(),
        }
    }

    pub fn from_app_config(
        llm: Option<Arc<dyn ChatCompletion>>,
        monitor: Arc<SystemMonitor>,
        config: &AppConfig,
    ) -> Self {
        Self::new(llm, monitor, config.passage_language.clone())
    }

    fn system_message(&self, mode: PassageMode) -> String {
        match mode {
            PassageMode::Translate => format!(
                "Translate the passage from a research paper into {}. Keep technical terms, \
                 formulas and citations intact. Reply with the translation only.",
                self.language
            ),
            PassageMode::Analyze => PASSAGE_ANALYSIS_SYSTEM_MESSAGE.to_string(),
        }
    }

    /// Runs the passage through the language model. The AI state reads
    /// `Thinking` while it runs and `Error` if the model call fails.
    #[instrument(skip_all, fields(mode = ?request.mode, chars = request.text.len()))]
    pub async fn process(&self, request: &PassageRequest) -> Result<PassageResult, AppError> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("Passage must not be empty".into()));
        }
        if text.chars().count() > MAX_PASSAGE_CHARS {
            return Err(AppError::Validation(format!(
                "Passage exceeds {MAX_PASSAGE_CHARS} characters"
            )));
        }
        let Some(llm) = &self.llm else {
            return Err(AppError::Unavailable(
                "No language model is configured".into(),
            ));
        };

        let started = Instant::now();
        self.monitor.set_ai_state(AiState::Thinking);
        let messages = vec![
            ChatMessage::system(self.system_message(request.mode)),
            ChatMessage::user(text),
        ];

        let outcome = llm
            .complete(messages, PASSAGE_MAX_TOKENS)
            .await
            .and_then(|reply| {
                let reply = reply.trim();
                if reply.is_empty() {
                    Err(AppError::LLMParsing("language model returned no text".into()))
                } else {
                    Ok(reply.to_string())
                }
            });

        match outcome {
            Ok(result) => {
                self.monitor.record_ai_latency(started.elapsed());
                self.monitor.set_ai_state(AiState::Idle);
                info!(chars = result.len(), "passage processed");
                Ok(PassageResult {
                    mode: request.mode,
                    result,
                })
            }
            Err(err) => {
                error!(error = %err, "passage processing failed");
                self.monitor.set_ai_state(AiState::Error);
                Err(err)
            }
        }
    }
}
