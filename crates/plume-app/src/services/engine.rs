//! Correction-engine client abstraction.
//!
//! The pipeline talks to the language engine through [`CorrectionEngine`] so
//! tests can substitute a scripted engine; the production implementation is
//! an OpenAI-compatible chat-completions client over reqwest. Every failure
//! mode here (transport, HTTP status, empty content, malformed JSON) is
//! transient from the pipeline's point of view and handled by the retry
//! wrapper.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EngineConfig;
use crate::services::retry::RetryableError;
use crate::services::usage::TokenUsage;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

/// Raw completion content plus the call's token accounting.
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub content: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("missing OPENAI_API_KEY environment variable")]
    MissingApiKey,
    #[error("engine request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("engine returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("engine returned an empty completion")]
    EmptyCompletion,
    #[error("failed to parse engine output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("engine output rejected: {reason}")]
    Rejected { reason: String, feedback: String },
}

impl RetryableError for EngineError {
    fn feedback(&self) -> Option<String> {
        match self {
            EngineError::Rejected { feedback, .. } => Some(feedback.clone()),
            _ => None,
        }
    }
}

#[async_trait]
pub trait CorrectionEngine: Send + Sync {
    /// Issues a single chat completion and returns its content and usage.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        format: ResponseFormat,
    ) -> Result<EngineResponse, EngineError>;
}

/// OpenAI-compatible chat-completions client.
#[derive(Debug, Clone)]
pub struct OpenAiChatEngine {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiChatEngine {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
        }
    }

    /// Builds a client from `OPENAI_API_KEY` and the engine configuration.
    pub fn from_env(config: &EngineConfig) -> Result<Self, EngineError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| EngineError::MissingApiKey)?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(
            api_key,
            base_url,
            config.model.clone(),
            config.temperature,
        ))
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormatBody>,
}

#[derive(Debug, Serialize)]
struct ResponseFormatBody {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl CorrectionEngine for OpenAiChatEngine {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        format: ResponseFormat,
    ) -> Result<EngineResponse, EngineError> {
        debug_assert!(!messages.is_empty());

        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            response_format: match format {
                ResponseFormat::JsonObject => Some(ResponseFormatBody {
                    kind: "json_object",
                }),
                ResponseFormat::Text => None,
            },
        };

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: CompletionResponse = response.json().await?;
        let usage = completion
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(EngineError::EmptyCompletion)?;

        Ok(EngineResponse { content, usage })
    }
}
