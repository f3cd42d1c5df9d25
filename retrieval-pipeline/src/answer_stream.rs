use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_stream::stream;
use common::{
    error::AppError,
    utils::{
        config::AppConfig,
        llm::{ChatCompletion, ChatMessage},
        monitor::{AiState, SystemMonitor},
    },
};
use futures::{stream::BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, time::timeout};
use tracing::{debug, error, info, instrument};

use crate::{
    pipeline::{AssembledContext, ContextAssembler, ContextRequest},
    retriever::Citation,
    scope::ScopeRequest,
};

pub static CHAT_SYSTEM_PROMPT: &str = "You are the research assistant of a personal paper \
library. Answer the query using the provided context. Cite library passages by their bracketed \
number, for example [1] or [2][3], and name web sources when you rely on them. If the context \
does not cover the query, say so before answering from general knowledge. Be precise and \
concise.";

pub static MOCK_MODE_MESSAGE: &str = "[Mock Mode] No language model is configured. The \
retrieved context was assembled but no answer was generated.";

const EVENT_BUFFER: usize = 32;

/// One frame of the answer stream. Serializes to a single JSON object:
/// `{"content"}`, `{"error"}` or `{"done": true, "sources", "citations"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChatEvent {
    Content {
        content: String,
    },
    Error {
        error: String,
    },
    Done {
        done: bool,
        sources: Vec<String>,
        citations: Vec<Citation>,
    },
}

impl ChatEvent {
    pub fn content(content: impl Into<String>) -> Self {
        Self::Content {
            content: content.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    pub fn done(sources: Vec<String>, citations: Vec<Citation>) -> Self {
        Self::Done {
            done: true,
            sources,
            citations,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Content { .. })
    }
}

pub type ChatEventStream = BoxStream<'static, ChatEvent>;

/// A prior message of the conversation as the client sends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    #[serde(flatten)]
    pub scope: ScopeRequest,
    #[serde(default)]
    pub deep_search: bool,
}

impl ChatRequest {
    pub fn context_request(&self) -> ContextRequest {
        ContextRequest {
            query: self.query.clone(),
            scope: self.scope.clone(),
            deep_search: self.deep_search,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerSettings {
    pub max_tokens: u32,
    pub history_turns: usize,
    /// Longest wait for the stream to open or for the next fragment.
    pub fragment_timeout: Duration,
}

impl Default for AnswerSettings {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            history_turns: 6,
            fragment_timeout: Duration::from_secs(60),
        }
    }
}

impl AnswerSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_tokens: config.chat_max_tokens,
            history_turns: config.chat_history_turns,
            fragment_timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }
}

fn is_assistant_role(role: &str) -> bool {
    matches!(
        role.trim().to_ascii_lowercase().as_str(),
        "assistant" | "oracle" | "ai"
    )
}

/// System prompt, the most recent `history_turns` turns, then the context
/// and the query as the final user message.
pub fn build_messages(
    query: &str,
    history: &[ChatTurn],
    context: &str,
    history_turns: usize,
) -> Vec<ChatMessage> {
    let recent = &history[history.len().saturating_sub(history_turns)..];
    let mut messages = Vec::with_capacity(recent.len() + 2);
    messages.push(ChatMessage::system(CHAT_SYSTEM_PROMPT));
    for turn in recent {
        if is_assistant_role(&turn.role) {
            messages.push(ChatMessage::assistant(turn.content.clone()));
        } else {
            messages.push(ChatMessage::user(turn.content.clone()));
        }
    }
    messages.push(ChatMessage::user(format!(
        "Context:\n{context}\n\nQuery: {query}"
    )));
    messages
}

/// Drives one chat answer: context assembly, then a streamed completion.
pub struct ChatOrchestrator {
    assembler: Arc<ContextAssembler>,
    llm: Option<Arc<dyn ChatCompletion>>,
    monitor: Arc<SystemMonitor>,
    settings: AnswerSettings,
}

impl ChatOrchestrator {
    /// `llm` is `None` when no usable credential is configured; answers are
    /// then mock answers.
    pub fn new(
        assembler: Arc<ContextAssembler>,
        llm: Option<Arc<dyn ChatCompletion>>,
        monitor: Arc<SystemMonitor>,
        settings: AnswerSettings,
    ) -> Self {
        Self {
            assembler,
            llm,
            monitor,
            settings,
        }
    }

    pub fn is_mock(&self) -> bool {
        self.llm.is_none()
    }

    /// Events for one question. The stream always ends with exactly one
    /// terminal event, also when the producing task dies.
    pub fn answer(self: &Arc<Self>, request: ChatRequest) -> ChatEventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.run(request, tx).await;
        });
        into_event_stream(rx)
    }

    #[instrument(
        skip_all,
        fields(deep_search = request.deep_search, history = request.history.len())
    )]
    async fn run(&self, request: ChatRequest, tx: mpsc::Sender<ChatEvent>) {
        let started = Instant::now();
        self.monitor.set_ai_state(AiState::Thinking);

        let terminal = match self.produce(&request, &tx).await {
            Ok(event) => {
                self.monitor.record_ai_latency(started.elapsed());
                self.monitor.set_ai_state(AiState::Idle);
                info!(
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "answer finished"
                );
                event
            }
            Err(err) => {
                error!(error = %err, "answer failed");
                self.monitor.set_ai_state(AiState::Error);
                ChatEvent::error(err.to_string())
            }
        };

        if tx.send(terminal).await.is_err() {
            debug!("client went away before the final event");
        }
    }

    async fn produce(
        &self,
        request: &ChatRequest,
        tx: &mpsc::Sender<ChatEvent>,
    ) -> Result<ChatEvent, AppError> {
        let context_request = request.context_request();
        let (progress_tx, mut progress_rx) = mpsc::channel::<String>(4);

        let assembler = &self.assembler;
        let assemble = async move {
            let progress = progress_tx;
            assembler.assemble(&context_request, Some(&progress)).await
        };
        let forward = async {
            while let Some(notice) = progress_rx.recv().await {
                let _ = tx.send(ChatEvent::content(notice)).await;
            }
        };
        let (assembled, ()) = tokio::join!(assemble, forward);

        self.stream_answer(&request.query, &request.history, &assembled?, tx)
            .await
    }

    /// Streams the completion for an already assembled context into `tx`
    /// and returns the terminal event to send on success.
    pub async fn stream_answer(
        &self,
        query: &str,
        history: &[ChatTurn],
        context: &AssembledContext,
        tx: &mpsc::Sender<ChatEvent>,
    ) -> Result<ChatEvent, AppError> {
        let done = || ChatEvent::done(context.sources.clone(), context.citations.clone());

        let Some(llm) = self.llm.as_ref() else {
            let _ = tx.send(ChatEvent::content(MOCK_MODE_MESSAGE)).await;
            return Ok(done());
        };

        let messages = build_messages(
            query,
            history,
            &context.context,
            self.settings.history_turns,
        );
        let limit = self.settings.fragment_timeout;
        let mut fragments = timeout(limit, llm.stream(messages, self.settings.max_tokens))
            .await
            .map_err(|_| timed_out(limit))??;

        let mut forwarded = 0usize;
        loop {
            match timeout(limit, fragments.next()).await {
                Err(_) => return Err(timed_out(limit)),
                Ok(None) => break,
                Ok(Some(fragment)) => {
                    let fragment = fragment?;
                    if fragment.is_empty() {
                        continue;
                    }
                    if tx.send(ChatEvent::content(fragment)).await.is_err() {
                        debug!(forwarded, "client disconnected; stopping delivery");
                        break;
                    }
                    forwarded += 1;
                }
            }
        }

        debug!(forwarded, "completion streamed");
        Ok(done())
    }
}

fn timed_out(limit: Duration) -> AppError {
    AppError::Unavailable(format!(
        "Language model did not respond within {}s",
        limit.as_secs_f32()
    ))
}

fn into_event_stream(mut rx: mpsc::Receiver<ChatEvent>) -> ChatEventStream {
    stream! {
        let mut finished = false;
        while let Some(event) = rx.recv().await {
            finished = event.is_terminal();
            yield event;
            if finished {
                break;
            }
        }
        if !finished {
            yield ChatEvent::error("Answer stream ended unexpectedly");
        }
    }
    .boxed()
}
