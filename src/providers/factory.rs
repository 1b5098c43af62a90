//! Provider factory for creating LLM provider instances
//!
//! Configuration is a tagged enum so the config file selects the backend with
//! a `type` field; the factory validates it and builds the client.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::providers::{GenericOpenAiProvider, LlmProvider, OllamaProvider, ProviderError};

/// Configuration for OpenRouter provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenRouterConfig {
    /// API key for OpenRouter
    pub api_key: String,
    /// Base URL for OpenRouter API (optional, defaults to official endpoint)
    #[serde(default = "default_openrouter_base_url")]
    pub base_url: String,
    /// Default model to use
    #[serde(default = "default_openrouter_model")]
    pub default_model: String,
    /// Organization ID (optional)
    pub organization_id: Option<String>,
    /// HTTP timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_openrouter_model() -> String {
    "anthropic/claude-3.5-sonnet".to_string()
}

fn default_timeout() -> u64 {
    60
}

impl OpenRouterConfig {
    /// Creates a new OpenRouter configuration with the required API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: default_openrouter_base_url(),
            default_model: default_openrouter_model(),
            organization_id: None,
            timeout_seconds: default_timeout(),
        }
    }

    /// Sets a custom base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the default model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Sets the organization ID
    pub fn with_organization(mut self, org_id: impl Into<String>) -> Self {
        self.organization_id = Some(org_id.into());
        self
    }

    /// Sets the timeout
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::config("OpenRouter API key is required"));
        }

        if self.base_url.is_empty() {
            return Err(ProviderError::config("OpenRouter base URL cannot be empty"));
        }

        if self.default_model.is_empty() {
            return Err(ProviderError::config(
                "OpenRouter default model cannot be empty",
            ));
        }

        Ok(())
    }
}

/// Configuration for Ollama provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
    /// Default model to use
    #[serde(default = "default_ollama_model")]
    pub default_model: String,
    /// HTTP timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Additional options for Ollama
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2".to_string()
}

impl OllamaConfig {
    /// Creates a new Ollama configuration with default settings
    pub fn new() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            default_model: default_ollama_model(),
            timeout_seconds: default_timeout(),
            options: HashMap::new(),
        }
    }

    /// Sets a custom base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the default model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Sets the timeout
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Adds an option
    pub fn with_option(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.base_url.is_empty() {
            return Err(ProviderError::config("Ollama base URL cannot be empty"));
        }

        if self.default_model.is_empty() {
            return Err(ProviderError::config(
                "Ollama default model cannot be empty",
            ));
        }

        Ok(())
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the native OpenAI API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_openai_model")]
    pub default_model: String,
    pub organization_id: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: default_openai_base_url(),
            default_model: default_openai_model(),
            organization_id: None,
            timeout_seconds: default_timeout(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::config("OpenAI API key is required"));
        }
        if self.base_url.is_empty() {
            return Err(ProviderError::config("OpenAI base URL cannot be empty"));
        }
        if self.default_model.is_empty() {
            return Err(ProviderError::config("OpenAI default model cannot be empty"));
        }
        Ok(())
    }
}

/// Provider configuration variants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    OpenRouter(OpenRouterConfig),
    OpenAi(OpenAiConfig),
    Ollama(OllamaConfig),
}

impl ProviderConfig {
    pub fn provider_type(&self) -> &'static str {
        match self {
            ProviderConfig::OpenRouter(_) => "openrouter",
            ProviderConfig::OpenAi(_) => "openai",
            ProviderConfig::Ollama(_) => "ollama",
        }
    }

    pub fn validate(&self) -> Result<(), ProviderError> {
        match self {
            ProviderConfig::OpenRouter(config) => config.validate(),
            ProviderConfig::OpenAi(config) => config.validate(),
            ProviderConfig::Ollama(config) => config.validate(),
        }
    }

    pub fn default_model(&self) -> &str {
        match self {
            ProviderConfig::OpenRouter(config) => &config.default_model,
            ProviderConfig::OpenAi(config) => &config.default_model,
            ProviderConfig::Ollama(config) => &config.default_model,
        }
    }

    /// Replaces the default model, used by the `--model` flag
    pub fn set_default_model(&mut self, model: impl Into<String>) {
        let model = model.into();
        match self {
            ProviderConfig::OpenRouter(config) => config.default_model = model,
            ProviderConfig::OpenAi(config) => config.default_model = model,
            ProviderConfig::Ollama(config) => config.default_model = model,
        }
    }

    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::OpenRouter(OpenRouterConfig::new(api_key))
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::OpenAi(OpenAiConfig::new(api_key))
    }

    pub fn ollama() -> Self {
        Self::Ollama(OllamaConfig::new())
    }
}

/// Factory for creating LLM provider instances
pub struct ProviderFactory;

impl ProviderFactory {
    /// Validates the configuration and builds the matching client
    pub fn create(config: ProviderConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        config.validate()?;

        let provider: Arc<dyn LlmProvider> = match config {
            ProviderConfig::OpenRouter(config) => {
                Arc::new(GenericOpenAiProvider::from_config(&config, "openrouter")?)
            }
            ProviderConfig::OpenAi(config) => {
                Arc::new(GenericOpenAiProvider::from_config(&config, "openai")?)
            }
            ProviderConfig::Ollama(config) => Arc::new(OllamaProvider::try_new(config)?),
        };
        Ok(provider)
    }

    /// Creates a provider from JSON configuration
    pub fn create_from_json(json: &str) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let config: ProviderConfig =
            serde_json::from_str(json).map_err(|e| ProviderError::config(e.to_string()))?;
        Self::create(config)
    }

    pub fn available_providers() -> Vec<&'static str> {
        vec!["openrouter", "openai", "ollama"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openrouter_config_validation() {
        assert!(OpenRouterConfig::new("valid-key").validate().is_ok());

        let config = OpenRouterConfig {
            api_key: "".to_string(),
            ..OpenRouterConfig::new("placeholder")
        };
        assert!(config.validate().is_err());

        let config = OpenRouterConfig {
            base_url: "".to_string(),
            ..OpenRouterConfig::new("key")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_openrouter_config_builder() {
        let config = OpenRouterConfig::new("my-key")
            .with_model("custom-model")
            .with_timeout(90)
            .with_organization("my-org");

        assert_eq!(config.api_key, "my-key");
        assert_eq!(config.default_model, "custom-model");
        assert_eq!(config.timeout_seconds, 90);
        assert_eq!(config.organization_id, Some("my-org".to_string()));
    }

    #[test]
    fn test_openai_config_validation() {
        assert!(OpenAiConfig::new("sk-test").validate().is_ok());
        assert!(OpenAiConfig::new("").validate().is_err());
    }

    #[test]
    fn test_ollama_config_validation() {
        assert!(OllamaConfig::new().validate().is_ok());

        let config = OllamaConfig {
            base_url: "".to_string(),
            ..OllamaConfig::new()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_config_serialization() {
        let config = ProviderConfig::openrouter("test-key");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"type\":\"open_router\""));

        let decoded: ProviderConfig = serde_json::from_str(&json).unwrap();
        assert!(matches!(decoded, ProviderConfig::OpenRouter(_)));

        let decoded: ProviderConfig =
            serde_json::from_str(r#"{"type":"open_ai","api_key":"sk"}"#).unwrap();
        assert_eq!(decoded.default_model(), "gpt-4o-mini");
    }

    #[test]
    fn test_set_default_model() {
        let mut config = ProviderConfig::ollama();
        config.set_default_model("mistral");
        assert_eq!(config.default_model(), "mistral");
    }

    #[test]
    fn test_factory_creates_providers() {
        let provider = ProviderFactory::create(ProviderConfig::openrouter("test-key")).unwrap();
        assert_eq!(provider.provider_name(), "openrouter");

        let provider = ProviderFactory::create(ProviderConfig::openai("sk-test")).unwrap();
        assert_eq!(provider.provider_name(), "openai");

        let provider = ProviderFactory::create(ProviderConfig::ollama()).unwrap();
        assert_eq!(provider.provider_name(), "ollama");
    }

    #[test]
    fn test_factory_rejects_invalid_config() {
        let result = ProviderFactory::create(ProviderConfig::openrouter(""));
        assert!(matches!(result, Err(ProviderError::Config { .. })));
    }

    #[test]
    fn test_factory_create_from_json() {
        let json = r#"{"type":"ollama","default_model":"qwen2.5"}"#;
        let provider = ProviderFactory::create_from_json(json).unwrap();
        assert_eq!(provider.default_model(), "qwen2.5");

        assert!(ProviderFactory::create_from_json("invalid json").is_err());
    }

    #[test]
    fn test_available_providers() {
        let providers = ProviderFactory::available_providers();
        assert!(providers.contains(&"openrouter"));
        assert!(providers.contains(&"ollama"));
    }

    #[test]
    fn test_provider_config_default_values() {
        let config = OpenRouterConfig::new("key");
        assert_eq!(config.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(config.timeout_seconds, 60);

        let config = OllamaConfig::new();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.default_model, "llama3.2");
    }
}
