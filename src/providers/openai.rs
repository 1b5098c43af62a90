//! Generic OpenAI-compatible provider implementation
//!
//! Works against any OpenAI-compatible chat completions endpoint, including
//! OpenRouter and OpenAI native. Streaming uses server-sent events.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::providers::factory::{OpenAiConfig, OpenRouterConfig};
use crate::providers::stream::{LineEvent, body_stream, decode_lines};
use crate::providers::{
    LlmMessage, LlmProvider, LlmResponse, ProviderError, ResponseFormat, TextStream,
};

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
    error: Option<OpenAiError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<serde_json::Value>,
}

impl OpenAiError {
    fn into_provider_error(self) -> ProviderError {
        let code = self
            .code
            .map(|c| match c {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .or(self.error_type);
        ProviderError::provider(self.message, code)
    }
}

/// One server-sent event payload of a streaming completion
#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    error: Option<OpenAiError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiDelta,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

/// Configuration trait for OpenAI-compatible providers
pub trait OpenAiCompatibleConfig: Send + Sync {
    fn api_key(&self) -> &str;
    fn base_url(&self) -> &str;
    fn default_model(&self) -> &str;
    fn timeout_seconds(&self) -> u64;
    fn organization_id(&self) -> Option<&str>;
}

impl OpenAiCompatibleConfig for OpenRouterConfig {
    fn api_key(&self) -> &str {
        &self.api_key
    }
    fn base_url(&self) -> &str {
        &self.base_url
    }
    fn default_model(&self) -> &str {
        &self.default_model
    }
    fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }
    fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }
}

impl OpenAiCompatibleConfig for OpenAiConfig {
    fn api_key(&self) -> &str {
        &self.api_key
    }
    fn base_url(&self) -> &str {
        &self.base_url
    }
    fn default_model(&self) -> &str {
        &self.default_model
    }
    fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }
    fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }
}

/// Generic OpenAI-compatible provider implementation
#[derive(Debug, Clone)]
pub struct GenericOpenAiProvider {
    api_key: String,
    base_url: String,
    default_model: String,
    provider_name: &'static str,
    organization_id: Option<String>,
    timeout_seconds: u64,
    client: Client,
}

impl GenericOpenAiProvider {
    /// Creates a new provider, returning an error if the HTTP client cannot be built
    pub fn try_new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
        provider_name: &'static str,
        organization_id: Option<String>,
        timeout_seconds: u64,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
            provider_name,
            organization_id,
            timeout_seconds,
            client,
        })
    }

    /// Creates a new provider from an OpenAI-compatible configuration
    pub fn from_config<C: OpenAiCompatibleConfig>(
        config: &C,
        provider_name: &'static str,
    ) -> Result<Self, ProviderError> {
        Self::try_new(
            config.api_key(),
            config.base_url(),
            config.default_model(),
            provider_name,
            config.organization_id().map(|s| s.to_string()),
            config.timeout_seconds(),
        )
    }

    fn build_request(
        &self,
        messages: Vec<LlmMessage>,
        format: ResponseFormat,
        model: &str,
        stream: bool,
    ) -> OpenAiRequest {
        let messages = messages
            .into_iter()
            .map(|msg| OpenAiMessage {
                role: msg.role.as_str().to_string(),
                content: Some(msg.content),
            })
            .collect();

        OpenAiRequest {
            model: if model.is_empty() {
                self.default_model.clone()
            } else {
                model.to_string()
            },
            messages,
            response_format: match format {
                ResponseFormat::Json => Some(serde_json::json!({ "type": "json_object" })),
                ResponseFormat::Text => None,
            },
            stream,
        }
    }

    fn parse_response(&self, response: OpenAiResponse) -> Result<LlmResponse, ProviderError> {
        if let Some(error) = response.error {
            return Err(error.into_provider_error());
        }

        let choice =
            response.choices.into_iter().next().ok_or_else(|| {
                ProviderError::provider("No response choices returned", None::<&str>)
            })?;

        let mut llm_response = LlmResponse::new(choice.message.content.unwrap_or_default());
        if let Some(usage) = response.usage {
            llm_response = llm_response.with_tokens(usage.prompt_tokens, usage.completion_tokens);
        }
        Ok(llm_response)
    }

    /// Sends the request and maps non-success statuses to provider errors
    async fn send(&self, request: &OpenAiRequest) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, provider = %self.provider_name, stream = request.stream, "Making OpenAI-compatible API request");

        let mut request_builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");

        if let Some(org_id) = &self.organization_id {
            request_builder = request_builder.header("OpenAI-Organization", org_id);
        }

        if self.provider_name == "openrouter" {
            request_builder = request_builder
                .header("HTTP-Referer", "https://nex.local")
                .header("X-Title", "nex");
        }

        let response = request_builder
            .json(request)
            .send()
            .await
            .map_err(|e| self.handle_connection_error(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, &body, retry_after))
    }

    fn handle_connection_error(&self, err: &reqwest::Error) -> ProviderError {
        error!(error = %err, provider = %self.provider_name, "Request failed");
        if err.is_timeout() {
            ProviderError::timeout(self.timeout_seconds)
        } else if err.is_connect() {
            ProviderError::network(format!("Connection failed: {}", err))
        } else {
            ProviderError::network(format!("Request failed: {}", err))
        }
    }
}

/// Maps an HTTP failure status to the provider error taxonomy
pub(crate) fn map_status(status: StatusCode, body: &str, retry_after: Option<u64>) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::auth(format!("Authentication failed ({}): {}", status, body))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::rate_limit(format!("Rate limit exceeded: {}", body), retry_after)
        }
        StatusCode::REQUEST_TIMEOUT => ProviderError::timeout(retry_after.unwrap_or(0)),
        status if status.is_client_error() => {
            ProviderError::invalid_request(format!("Client error ({}): {}", status, body))
        }
        status if status.is_server_error() => {
            ProviderError::service_unavailable(format!("Server error ({}): {}", status, body))
        }
        _ => ProviderError::provider(
            format!("Unexpected status ({}): {}", status, body),
            Some(status.as_u16().to_string()),
        ),
    }
}

/// Decodes one server-sent event line
pub(crate) fn parse_sse_line(line: &str) -> Result<Option<LineEvent>, ProviderError> {
    // Comments and non-data fields carry nothing
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Some(LineEvent::Done));
    }

    let chunk: OpenAiStreamChunk = serde_json::from_str(data).map_err(|e| {
        ProviderError::serialization(format!("Failed to parse stream chunk: {}", e))
    })?;
    if let Some(error) = chunk.error {
        return Err(error.into_provider_error());
    }

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    Ok(Some(LineEvent::Text(text)))
}

#[async_trait::async_trait]
impl LlmProvider for GenericOpenAiProvider {
    async fn chat(
        &self,
        messages: Vec<LlmMessage>,
        format: ResponseFormat,
        model: &str,
    ) -> Result<LlmResponse, ProviderError> {
        info!(
            model = model,
            provider = %self.provider_name,
            message_count = messages.len(),
            json = matches!(format, ResponseFormat::Json),
            "Sending chat request to {}",
            self.provider_name
        );

        let request = self.build_request(messages, format, model, false);
        let response = self.send(&request).await?;
        let body = response.json::<OpenAiResponse>().await.map_err(|e| {
            ProviderError::serialization(format!("Failed to parse response: {}", e))
        })?;
        let llm_response = self.parse_response(body)?;

        debug!(
            content_length = llm_response.content.len(),
            prompt_tokens = ?llm_response.prompt_tokens,
            completion_tokens = ?llm_response.completion_tokens,
            "Received response from {}",
            self.provider_name
        );

        Ok(llm_response)
    }

    async fn chat_stream(
        &self,
        messages: Vec<LlmMessage>,
        model: &str,
    ) -> Result<TextStream, ProviderError> {
        info!(
            model = model,
            provider = %self.provider_name,
            message_count = messages.len(),
            "Opening chat stream to {}",
            self.provider_name
        );

        let request = self.build_request(messages, ResponseFormat::Text, model, true);
        let response = self.send(&request).await?;
        Ok(decode_lines(body_stream(response), parse_sse_line))
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn provider_name(&self) -> &'static str {
        self.provider_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::LlmRole;

    fn provider() -> GenericOpenAiProvider {
        GenericOpenAiProvider::from_config(&OpenRouterConfig::new("test-key"), "openrouter")
            .unwrap()
    }

    #[test]
    fn test_build_request_json_mode() {
        let provider = provider();
        let request = provider.build_request(
            vec![LlmMessage::new(LlmRole::User, "Hi")],
            ResponseFormat::Json,
            "",
            false,
        );
        assert_eq!(request.model, "anthropic/claude-3.5-sonnet");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
        assert!(json.get("stream").is_none());
    }

    #[test]
    fn test_build_request_stream_flag() {
        let provider = provider();
        let request = provider.build_request(
            vec![LlmMessage::new(LlmRole::User, "Hi")],
            ResponseFormat::Text,
            "gpt-4o-mini",
            true,
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["model"], "gpt-4o-mini");
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn test_parse_response_with_usage() {
        let body: OpenAiResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello"}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
        }))
        .unwrap();
        let response = provider().parse_response(body).unwrap();
        assert_eq!(response.content, "Hello");
        assert_eq!(response.total_tokens(), Some(4));
    }

    #[test]
    fn test_parse_response_api_error() {
        let body: OpenAiResponse = serde_json::from_value(serde_json::json!({
            "error": {"message": "bad model", "type": "invalid_request_error", "code": 400}
        }))
        .unwrap();
        let err = provider().parse_response(body).unwrap_err();
        assert!(matches!(err, ProviderError::Provider { code: Some(ref c), .. } if c == "400"));
    }

    #[test]
    fn test_map_status() {
        assert!(map_status(StatusCode::UNAUTHORIZED, "", None).is_auth_error());
        let err = map_status(StatusCode::TOO_MANY_REQUESTS, "slow down", Some(7));
        assert_eq!(err.retry_after(), Some(7));
        assert!(map_status(StatusCode::SERVICE_UNAVAILABLE, "", None).is_transient());
        assert!(!map_status(StatusCode::BAD_REQUEST, "", None).is_retryable());
    }

    #[test]
    fn test_parse_sse_lines() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            Some(LineEvent::Text("Hel".to_string()))
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), Some(LineEvent::Done));
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), None);
        assert!(parse_sse_line("data: {not json").is_err());

        let error_line = r#"data: {"error":{"message":"overloaded","code":"529"}}"#;
        assert!(parse_sse_line(error_line).is_err());
    }

    #[test]
    fn test_provider_metadata() {
        let provider = provider();
        assert_eq!(provider.provider_name(), "openrouter");
        assert_eq!(provider.default_model(), "anthropic/claude-3.5-sonnet");
    }
}
