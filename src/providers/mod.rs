//! LLM Provider module for nex
//!
//! Wire-level clients for the generation collaborator. Providers do not retry;
//! backoff lives one layer up in `generation`, which sees every call.
//!
//! - `LlmProvider` trait defines the interface all providers must implement
//! - Provider-specific implementations are in separate modules
//! - `ProviderFactory` creates the appropriate provider based on configuration

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod error;
pub mod factory;
#[cfg(test)]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod stream;

pub use error::ProviderError;
pub use factory::{OllamaConfig, OpenAiConfig, OpenRouterConfig, ProviderConfig, ProviderFactory};
pub use ollama::OllamaProvider;
pub use openai::GenericOpenAiProvider;

/// Ordered text deltas from a streaming completion
pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;

/// Represents a message in the conversation for LLM context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn new(role: LlmRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(LlmRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(LlmRole::User, content)
    }
}

/// Role of a message sender in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

impl LlmRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmRole::System => "system",
            LlmRole::User => "user",
            LlmRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for LlmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Requested shape of a non-streaming completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Ask the provider to constrain output to a JSON object
    Json,
}

/// Response from the LLM provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
}

impl LlmResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            prompt_tokens: None,
            completion_tokens: None,
        }
    }

    pub fn with_tokens(mut self, prompt: u32, completion: u32) -> Self {
        self.prompt_tokens = Some(prompt);
        self.completion_tokens = Some(completion);
        self
    }

    pub fn total_tokens(&self) -> Option<u32> {
        match (self.prompt_tokens, self.completion_tokens) {
            (Some(p), Some(c)) => Some(p + c),
            _ => None,
        }
    }
}

/// Trait for LLM providers (OpenAI-compatible, Ollama, etc.)
///
/// All implementations must be Send + Sync to allow concurrent usage across turns.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Sends a single completion request and waits for the whole answer
    async fn chat(
        &self,
        messages: Vec<LlmMessage>,
        format: ResponseFormat,
        model: &str,
    ) -> Result<LlmResponse, ProviderError>;

    /// Opens a streaming completion.
    ///
    /// Errors before the first delta (auth, rate limit, overload) are returned
    /// here; errors after that arrive as items of the stream.
    async fn chat_stream(
        &self,
        messages: Vec<LlmMessage>,
        model: &str,
    ) -> Result<TextStream, ProviderError>;

    /// Returns the default model for this provider
    fn default_model(&self) -> String;

    /// Returns the provider name, used for logging
    fn provider_name(&self) -> &'static str;
}
