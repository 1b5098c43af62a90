//! Ollama local LLM provider implementation
//!
//! Talks to a locally running Ollama server. Responses always arrive as
//! newline-delimited JSON; `chat` accumulates them, `chat_stream` forwards them.

use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::providers::factory::OllamaConfig;
use crate::providers::stream::{LineEvent, body_stream, decode_lines};
use crate::providers::{
    LlmMessage, LlmProvider, LlmResponse, ProviderError, ResponseFormat, TextStream,
};

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    /// "json" constrains output to a JSON value
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
}

/// Ollama streaming response chunk format
#[derive(Debug, Deserialize)]
struct OllamaResponseChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    /// Prompt evaluation count (only in final chunk)
    prompt_eval_count: Option<u32>,
    /// Completion tokens (only in final chunk)
    eval_count: Option<u32>,
    /// Set when the model failed mid-stream
    error: Option<String>,
}

/// Ollama provider implementation
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    config: OllamaConfig,
    client: Client,
}

impl OllamaProvider {
    /// Creates a new Ollama provider, returning an error if the HTTP client cannot be built
    pub fn try_new(config: OllamaConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn build_request(
        &self,
        messages: Vec<LlmMessage>,
        format: ResponseFormat,
        model: &str,
    ) -> OllamaRequest {
        let messages = messages
            .into_iter()
            .map(|msg| OllamaMessage {
                role: msg.role.as_str().to_string(),
                content: msg.content,
            })
            .collect();

        OllamaRequest {
            model: if model.is_empty() {
                self.config.default_model.clone()
            } else {
                model.to_string()
            },
            messages,
            stream: true,
            format: match format {
                ResponseFormat::Json => Some("json".to_string()),
                ResponseFormat::Text => None,
            },
            options: if self.config.options.is_empty() {
                None
            } else {
                match serde_json::to_value(&self.config.options) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize Ollama options, ignoring them");
                        None
                    }
                }
            },
        }
    }

    /// Handles HTTP errors and converts them to appropriate ProviderError variants
    fn handle_http_error(&self, status: StatusCode, body: Option<String>) -> ProviderError {
        let message = body.unwrap_or_else(|| "Unknown error".to_string());

        match status {
            StatusCode::NOT_FOUND => ProviderError::invalid_request(
                "Model not found. Run `ollama pull [model_name]` to download the model.",
            ),
            StatusCode::BAD_REQUEST => ProviderError::invalid_request(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ProviderError::auth("Authentication failed")
            }
            StatusCode::TOO_MANY_REQUESTS => {
                ProviderError::rate_limit(format!("Rate limit exceeded: {}", message), Some(1))
            }
            status if status.is_server_error() => {
                ProviderError::service_unavailable(format!("Ollama server error: {}", message))
            }
            _ => ProviderError::network(format!("HTTP error {}: {}", status, message)),
        }
    }

    /// Handles connection errors with helpful suggestions
    fn handle_connection_error(&self, err: &reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::timeout(self.config.timeout_seconds)
        } else if err.is_connect() {
            ProviderError::network(format!(
                "Cannot connect to Ollama at {}. Is Ollama running? Start it with: ollama serve",
                self.config.base_url
            ))
        } else {
            ProviderError::network(format!("Network error: {}", err))
        }
    }

    async fn open(&self, request: &OllamaRequest) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));
        debug!(url = %url, model = %request.model, "Making Ollama API request");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.handle_connection_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.ok();
            return Err(self.handle_http_error(status, body));
        }
        Ok(response)
    }
}

/// Decodes one NDJSON line of an Ollama chat stream
pub(crate) fn parse_ndjson_line(line: &str) -> Result<Option<LineEvent>, ProviderError> {
    let chunk: OllamaResponseChunk = serde_json::from_str(line).map_err(|e| {
        ProviderError::serialization(format!("Failed to parse response chunk: {}", e))
    })?;
    if let Some(error) = chunk.error {
        return Err(ProviderError::provider(error, None::<&str>));
    }
    if chunk.done {
        return Ok(Some(LineEvent::Done));
    }
    Ok(chunk.message.map(|m| LineEvent::Text(m.content)))
}

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
    async fn chat(
        &self,
        messages: Vec<LlmMessage>,
        format: ResponseFormat,
        model: &str,
    ) -> Result<LlmResponse, ProviderError> {
        info!(model = %model, message_count = messages.len(), "Sending request to Ollama");

        let request = self.build_request(messages, format, model);
        let response = self.open(&request).await?;

        let mut content = String::new();
        let mut usage = (None, None);
        let mut done = false;
        let mut stream = body_stream(response);
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            buffer.push_str(&String::from_utf8_lossy(&chunk?));
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<OllamaResponseChunk>(line) {
                    Ok(parsed) => {
                        if let Some(error) = parsed.error {
                            return Err(ProviderError::provider(error, None::<&str>));
                        }
                        if let Some(message) = parsed.message {
                            content.push_str(&message.content);
                        }
                        if parsed.done {
                            done = true;
                            usage = (parsed.prompt_eval_count, parsed.eval_count);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, line = %line, "Failed to parse chunk");
                    }
                }
            }
        }

        if !done {
            warn!("Ollama stream ended without done=true flag. Response may be incomplete.");
        }

        let mut llm_response = LlmResponse::new(content);
        if let (Some(prompt), Some(completion)) = usage {
            llm_response = llm_response.with_tokens(prompt, completion);
        }
        debug!(content_length = llm_response.content.len(), "Ollama response complete");
        Ok(llm_response)
    }

    async fn chat_stream(
        &self,
        messages: Vec<LlmMessage>,
        model: &str,
    ) -> Result<TextStream, ProviderError> {
        info!(model = %model, message_count = messages.len(), "Opening Ollama stream");

        let request = self.build_request(messages, ResponseFormat::Text, model);
        let response = self.open(&request).await?;
        Ok(decode_lines(body_stream(response), parse_ndjson_line))
    }

    fn default_model(&self) -> String {
        self.config.default_model.clone()
    }

    fn provider_name(&self) -> &'static str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::LlmRole;

    fn provider() -> OllamaProvider {
        OllamaProvider::try_new(OllamaConfig::new()).unwrap()
    }

    #[test]
    fn test_build_request_defaults_model() {
        let request = provider().build_request(
            vec![LlmMessage::new(LlmRole::User, "Hi")],
            ResponseFormat::Text,
            "",
        );
        assert_eq!(request.model, "llama3.2");
        assert!(request.stream);
        assert!(request.format.is_none());
        assert!(request.options.is_none());
    }

    #[test]
    fn test_build_request_json_format_and_options() {
        let config = OllamaConfig::new().with_option("temperature", 0.2);
        let provider = OllamaProvider::try_new(config).unwrap();
        let request = provider.build_request(
            vec![LlmMessage::new(LlmRole::User, "Hi")],
            ResponseFormat::Json,
            "mistral",
        );
        assert_eq!(request.format.as_deref(), Some("json"));
        assert_eq!(request.options.unwrap()["temperature"], 0.2);
    }

    #[test]
    fn test_handle_http_error() {
        let provider = provider();
        let err = provider.handle_http_error(StatusCode::NOT_FOUND, None);
        assert!(err.to_string().contains("ollama pull"));
        let err = provider.handle_http_error(StatusCode::INTERNAL_SERVER_ERROR, None);
        assert!(err.is_transient());
    }

    #[test]
    fn test_parse_ndjson_line() {
        let line = r#"{"model":"llama3.2","message":{"role":"assistant","content":"Hi"},"done":false}"#;
        assert_eq!(
            parse_ndjson_line(line).unwrap(),
            Some(LineEvent::Text("Hi".to_string()))
        );

        let done = r#"{"model":"llama3.2","done":true,"eval_count":3}"#;
        assert_eq!(parse_ndjson_line(done).unwrap(), Some(LineEvent::Done));

        assert!(parse_ndjson_line(r#"{"error":"model crashed"}"#).is_err());
        assert!(parse_ndjson_line("not json").is_err());
    }

    #[test]
    fn test_provider_name() {
        assert_eq!(provider().provider_name(), "ollama");
        assert_eq!(provider().default_model(), "llama3.2");
    }
}
