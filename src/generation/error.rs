use crate::providers::ProviderError;
use thiserror::Error;

/// Outcome of a generation call after retries have been applied
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// Transient provider errors persisted through every attempt
    #[error("RATE_LIMITED: provider overloaded after {attempts} attempts")]
    Overloaded { attempts: u32 },

    /// Permanent failure, not retried
    #[error("Generation failed: {message}")]
    Failed { message: String },

    /// The model answered but the structured output could not be used
    #[error("Malformed model output: {message}")]
    Malformed { message: String },
}

impl GenerationError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    pub fn is_overloaded(&self) -> bool {
        matches!(self, GenerationError::Overloaded { .. })
    }
}

impl From<ProviderError> for GenerationError {
    /// Provider errors other than exhausted overload map to failures
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Serialization { message } => Self::Malformed { message },
            other => Self::Failed {
                message: other.to_string(),
            },
        }
    }
}
