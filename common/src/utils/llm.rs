use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, utils::config::AppConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Incremental text fragments of one completion, in arrival order.
pub type FragmentStream = BoxStream<'static, Result<String, AppError>>;

/// A chat-completion capability, optionally streamed.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>, max_tokens: u32)
        -> Result<String, AppError>;

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
    ) -> Result<FragmentStream, AppError>;
}

/// Chat completions against any OpenAI-compatible endpoint.
pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChat {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Client with the configured key, base URL and request timeout. The
    /// timeout covers the whole response, streamed bodies included.
    pub fn from_config(config: &AppConfig, model: &str) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.llm_timeout_secs))
            .build()?;
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        )
        .with_http_client(http);
        Ok(Self::new(client, model))
    }

    #[allow(deprecated)]
    fn build_request(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let messages = messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()?;

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_tokens(max_tokens)
            .build()
    }
}

fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let content = message.content.clone();
    Ok(match message.role {
        ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()?
            .into(),
    })
}

#[async_trait]
impl ChatCompletion for OpenAiChat {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
    ) -> Result<String, AppError> {
        let request = self.build_request(&messages, max_tokens)?;
        let response = self.client.chat().create(request).await?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::LLMParsing("No content found in LLM response".into()))
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
    ) -> Result<FragmentStream, AppError> {
        let request = self.build_request(&messages, max_tokens)?;
        let upstream = self.client.chat().create_stream(request).await?;

        let fragments = upstream.filter_map(|item| async move {
            match item {
                Ok(response) => response
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.clone())
                    .filter(|content| !content.is_empty())
                    .map(Ok),
                Err(err) => Some(Err(AppError::from(err))),
            }
        });

        Ok(fragments.boxed())
    }
}
