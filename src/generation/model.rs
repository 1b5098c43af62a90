use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, warn};

use crate::generation::prompts;
use crate::generation::routing::{RoutingDecision, parse_routing_decision, single_line};
use crate::generation::{GenerationError, RetryPolicy};
use crate::providers::{LlmProvider, ResponseFormat};

/// Reply text deltas in emission order
pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

/// The generation collaborator the turn pipeline talks to
#[async_trait]
pub trait ConversationModel: Send + Sync {
    /// Decides whether the turn needs long-term context
    async fn classify(&self, text: &str) -> Result<RoutingDecision, GenerationError>;

    /// Opens a reply stream, optionally conditioned on retrieved context.
    ///
    /// Failures before the first fragment are returned here; later failures
    /// arrive as stream items.
    async fn generate_stream(
        &self,
        text: &str,
        context: Option<&str>,
    ) -> Result<FragmentStream, GenerationError>;

    /// One-line summary of a completed exchange
    async fn summarize(&self, text: &str, reply: &str) -> Result<String, GenerationError>;
}

/// Model names used for each call; `None` means the provider default
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSelection {
    pub reply: Option<String>,
    pub classify: Option<String>,
    pub summary: Option<String>,
}

/// `ConversationModel` backed by an LLM provider with retry and backoff
pub struct LlmConversationModel {
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    models: ModelSelection,
}

impl LlmConversationModel {
    pub fn new(provider: Arc<dyn LlmProvider>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            models: ModelSelection::default(),
        }
    }

    pub fn with_models(mut self, models: ModelSelection) -> Self {
        self.models = models;
        self
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    fn model_for(&self, selected: &Option<String>) -> String {
        selected
            .clone()
            .or_else(|| self.models.reply.clone())
            .unwrap_or_else(|| self.provider.default_model())
    }
}

#[async_trait]
impl ConversationModel for LlmConversationModel {
    async fn classify(&self, text: &str) -> Result<RoutingDecision, GenerationError> {
        let model = self.model_for(&self.models.classify);
        let response = self
            .retry
            .run("classify", || {
                self.provider
                    .chat(prompts::classify_messages(text), ResponseFormat::Json, &model)
            })
            .await?;

        let decision = parse_routing_decision(&response.content)?;
        debug!(
            needs_past_memory = decision.needs_past_memory,
            confidence = ?decision.confidence,
            has_standalone = decision.standalone_answer.is_some(),
            reasoning = %decision.reasoning,
            "Classified turn"
        );
        Ok(decision)
    }

    async fn generate_stream(
        &self,
        text: &str,
        context: Option<&str>,
    ) -> Result<FragmentStream, GenerationError> {
        let model = self.model_for(&self.models.reply);
        let stream = self
            .retry
            .run("generate", || {
                self.provider
                    .chat_stream(prompts::reply_messages(text, context), &model)
            })
            .await?;

        let provider_name = self.provider.provider_name();
        Ok(stream
            .map(move |item| {
                item.map_err(|e| {
                    warn!(provider = provider_name, error = %e, "Reply stream failed mid-way");
                    GenerationError::failed(format!("Error calling {}: {}", provider_name, e))
                })
            })
            .boxed())
    }

    async fn summarize(&self, text: &str, reply: &str) -> Result<String, GenerationError> {
        let model = self.model_for(&self.models.summary);
        let response = self
            .retry
            .run("summarize", || {
                self.provider
                    .chat(prompts::summary_messages(text, reply), ResponseFormat::Text, &model)
            })
            .await?;

        let line = single_line(response.content.trim().trim_matches('"'));
        if line.is_empty() {
            return Err(GenerationError::malformed("empty summary"));
        }
        Ok(line)
    }
}
