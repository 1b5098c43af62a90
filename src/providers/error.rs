//! Error types for LLM provider operations
//!
//! Errors are split into transient ones (worth a backoff and another attempt)
//! and permanent ones (surfaced immediately as a generation failure).

use thiserror::Error;

/// Errors that can occur when interacting with LLM providers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Connection issues, DNS failures, dropped streams
    #[error("Network error: {message}")]
    Network { message: String },

    /// Invalid API key or unauthorized access
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Too many requests
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        /// Optional retry-after duration in seconds
        retry_after: Option<u64>,
    },

    /// The provider is overloaded or temporarily down (5xx)
    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    /// Bad parameters, unknown model, malformed input
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Request timeout after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Errors reported by the LLM service itself
    #[error("Provider error: {message}")]
    Provider {
        message: String,
        code: Option<String>,
    },

    /// The response body could not be decoded
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

impl ProviderError {
    /// Returns true if the error is transient and another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network { .. }
                | ProviderError::RateLimit { .. }
                | ProviderError::ServiceUnavailable { .. }
                | ProviderError::Timeout { .. }
        )
    }

    /// Rate limiting or overload, the cases reported as "retry later"
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit { .. } | ProviderError::ServiceUnavailable { .. }
        )
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, ProviderError::Auth { .. })
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimit { .. })
    }

    /// Returns the provider-suggested retry delay in seconds, if any
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    pub fn provider(message: impl Into<String>, code: Option<impl Into<String>>) -> Self {
        Self::Provider {
            message: message.into(),
            code: code.map(|c| c.into()),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_is_retryable_not_transient() {
        let err = ProviderError::network("Connection failed");
        assert!(err.is_retryable());
        assert!(!err.is_transient());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_auth_error_not_retryable() {
        let err = ProviderError::auth("Invalid API key");
        assert!(!err.is_retryable());
        assert!(err.is_auth_error());
    }

    #[test]
    fn test_rate_limit_error() {
        let err = ProviderError::rate_limit("Too many requests", Some(60));
        assert!(err.is_retryable());
        assert!(err.is_transient());
        assert!(err.is_rate_limit());
        assert_eq!(err.retry_after(), Some(60));
    }

    #[test]
    fn test_service_unavailable_is_transient() {
        let err = ProviderError::service_unavailable("503 overloaded");
        assert!(err.is_retryable());
        assert!(err.is_transient());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(!ProviderError::invalid_request("Bad parameter").is_retryable());
        assert!(!ProviderError::serialization("bad json").is_retryable());
        let err = ProviderError::provider("Server error", Some::<&str>("bad_model"));
        assert!(!err.is_retryable());
        assert!(matches!(err, ProviderError::Provider { code: Some(_), .. }));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let provider_err: ProviderError = json_err.into();
        assert!(matches!(provider_err, ProviderError::Serialization { .. }));
    }

    #[test]
    fn test_error_display_messages() {
        let err = ProviderError::network("Connection refused");
        assert!(err.to_string().contains("Network error"));
        assert!(err.to_string().contains("Connection refused"));

        let err = ProviderError::service_unavailable("busy");
        assert!(err.to_string().contains("Service unavailable"));
    }
}
