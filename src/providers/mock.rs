//! Mock LLM provider for testing
//!
//! Replies are served from a queue so a test can script a sequence of
//! failures followed by a success, which is how the retry layer is exercised.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use futures::stream;

use crate::providers::{
    LlmMessage, LlmProvider, LlmResponse, ProviderError, ResponseFormat, TextStream,
};

/// One scripted streaming reply: the fragments to emit, then an optional error
#[derive(Debug, Clone, Default)]
pub struct ScriptedStream {
    pub fragments: Vec<String>,
    pub error: Option<ProviderError>,
}

pub struct MockLlmProvider {
    replies: Arc<Mutex<VecDeque<Result<String, ProviderError>>>>,
    streams: Arc<Mutex<VecDeque<Result<ScriptedStream, ProviderError>>>>,
    fallback: String,
    call_count: Arc<Mutex<usize>>,
    last_messages: Arc<Mutex<Option<Vec<LlmMessage>>>>,
    last_format: Arc<Mutex<Option<ResponseFormat>>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            streams: Arc::new(Mutex::new(VecDeque::new())),
            fallback: "Mock response".to_string(),
            call_count: Arc::new(Mutex::new(0)),
            last_messages: Arc::new(Mutex::new(None)),
            last_format: Arc::new(Mutex::new(None)),
        }
    }

    /// Queues a successful `chat` reply
    pub fn push_response(&self, content: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Ok(content.into()));
    }

    /// Queues a failing `chat` call
    pub fn push_error(&self, error: ProviderError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    /// Queues a `chat_stream` call that fails before the first delta
    pub fn push_stream_error(&self, error: ProviderError) {
        self.streams.lock().unwrap().push_back(Err(error));
    }

    /// Queues a streaming reply
    pub fn push_stream(&self, fragments: &[&str], error: Option<ProviderError>) {
        self.streams.lock().unwrap().push_back(Ok(ScriptedStream {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            error,
        }));
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn last_messages(&self) -> Option<Vec<LlmMessage>> {
        self.last_messages.lock().unwrap().clone()
    }

    pub fn last_format(&self) -> Option<ResponseFormat> {
        *self.last_format.lock().unwrap()
    }

    fn record(&self, messages: Vec<LlmMessage>) {
        *self.call_count.lock().unwrap() += 1;
        *self.last_messages.lock().unwrap() = Some(messages);
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockLlmProvider {
    async fn chat(
        &self,
        messages: Vec<LlmMessage>,
        format: ResponseFormat,
        _model: &str,
    ) -> Result<LlmResponse, ProviderError> {
        self.record(messages);
        *self.last_format.lock().unwrap() = Some(format);

        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(content)) => Ok(LlmResponse::new(content)),
            Some(Err(err)) => Err(err),
            None => Ok(LlmResponse::new(self.fallback.clone())),
        }
    }

    async fn chat_stream(
        &self,
        messages: Vec<LlmMessage>,
        _model: &str,
    ) -> Result<TextStream, ProviderError> {
        self.record(messages);

        let next = self.streams.lock().unwrap().pop_front();
        let scripted = match next {
            Some(Ok(scripted)) => scripted,
            Some(Err(err)) => return Err(err),
            None => ScriptedStream {
                fragments: vec![self.fallback.clone()],
                error: None,
            },
        };

        let mut items: Vec<Result<String, ProviderError>> =
            scripted.fragments.into_iter().map(Ok).collect();
        if let Some(err) = scripted.error {
            items.push(Err(err));
        }
        Ok(stream::iter(items).boxed())
    }

    fn default_model(&self) -> String {
        "mock-model".to_string()
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::LlmRole;

    #[tokio::test]
    async fn test_queued_replies_then_fallback() {
        let mock = MockLlmProvider::new();
        mock.push_error(ProviderError::rate_limit("slow", None));
        mock.push_response("ok");

        let messages = vec![LlmMessage::new(LlmRole::User, "Hi")];
        assert!(mock.chat(messages.clone(), ResponseFormat::Json, "m").await.is_err());
        let reply = mock.chat(messages.clone(), ResponseFormat::Text, "m").await.unwrap();
        assert_eq!(reply.content, "ok");
        let reply = mock.chat(messages, ResponseFormat::Text, "m").await.unwrap();
        assert_eq!(reply.content, "Mock response");
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.last_format(), Some(ResponseFormat::Text));
    }

    #[tokio::test]
    async fn test_scripted_stream_with_error() {
        let mock = MockLlmProvider::new();
        mock.push_stream(&["a", "b"], Some(ProviderError::network("reset")));

        let stream = mock
            .chat_stream(vec![LlmMessage::new(LlmRole::User, "Hi")], "m")
            .await
            .unwrap();
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[2].is_err());
    }
}
