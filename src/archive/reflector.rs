use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::archive::Reflection;
use crate::generation::prompts::reflection_messages;
use crate::generation::routing::extract_json_object;
use crate::generation::{GenerationError, RetryPolicy};
use crate::providers::{LlmProvider, ResponseFormat};
use crate::session::TurnRecord;

/// The archival collaborator: turns a transcript into a reflection
#[async_trait]
pub trait Reflector: Send + Sync {
    async fn reflect(&self, transcript: &[TurnRecord]) -> Result<Reflection, GenerationError>;
}

/// `Reflector` that asks an LLM for a JSON reflection
pub struct ModelReflector {
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    model: Option<String>,
}

impl ModelReflector {
    pub fn new(provider: Arc<dyn LlmProvider>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            model: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

#[async_trait]
impl Reflector for ModelReflector {
    async fn reflect(&self, transcript: &[TurnRecord]) -> Result<Reflection, GenerationError> {
        let model = self
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model());
        let response = self
            .retry
            .run("reflect", || {
                self.provider
                    .chat(reflection_messages(transcript), ResponseFormat::Json, &model)
            })
            .await?;

        let reflection = parse_reflection(&response.content)?;
        debug!(title = %reflection.title, emotion = %reflection.emotion_tag, "Reflection generated");
        Ok(reflection)
    }
}

/// Parses a reflection; a response without a title or reflection is rejected
pub fn parse_reflection(raw: &str) -> Result<Reflection, GenerationError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| GenerationError::malformed("no JSON object in reflection"))?;
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| GenerationError::malformed(format!("reflection: {}", e)))?;

    if value.get("title").is_none() || value.get("reflection").is_none() {
        return Err(GenerationError::malformed(
            "reflection is missing title or text",
        ));
    }

    serde_json::from_value(value)
        .map_err(|e| GenerationError::malformed(format!("reflection: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use crate::providers::mock::MockLlmProvider;
    use crate::session::Role;
    use chrono::Utc;

    #[test]
    fn test_parse_reflection_defaults_emotion() {
        let reflection =
            parse_reflection(r#"{"title": "Finding Ground", "reflection": "Steady now."}"#)
                .unwrap();
        assert_eq!(reflection.title, "Finding Ground");
        assert_eq!(reflection.emotion_tag, "neutral");
    }

    #[test]
    fn test_parse_reflection_requires_title_and_text() {
        assert!(parse_reflection(r#"{"title": "Only a title"}"#).is_err());
        assert!(parse_reflection(r#"{"reflection": "no title"}"#).is_err());
        assert!(parse_reflection("the model rambled").is_err());
    }

    #[tokio::test]
    async fn test_model_reflector() {
        let mock = Arc::new(MockLlmProvider::new());
        mock.push_error(ProviderError::service_unavailable("busy"));
        mock.push_response(
            "```json\n{\"title\": \"Late Night Doubts\", \"reflection\": \"Some nights ask more of us.\", \"emotion_tag\": \"conflicted\"}\n```",
        );
        let reflector = ModelReflector::new(mock.clone(), RetryPolicy::immediate(3));

        let transcript = vec![TurnRecord::new(Role::User, "I can't sleep", Utc::now())];
        let reflection = reflector.reflect(&transcript).await.unwrap();
        assert_eq!(reflection.emotion_tag, "conflicted");
        assert_eq!(mock.call_count(), 2);

        let sent = mock.last_messages().unwrap();
        assert!(sent[0].content.contains("USER: I can't sleep"));
    }
}
