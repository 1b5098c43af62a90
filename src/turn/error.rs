use crate::quota::QuotaDenial;
use crate::session::SessionError;
use crate::utils::NexError;
use thiserror::Error;

/// Reasons a turn is refused before any fragment is produced
#[derive(Error, Debug)]
pub enum TurnError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("{0}")]
    QuotaExceeded(QuotaDenial),

    #[error("SESSION_TURN_LIMIT_REACHED: this session allows {limit} turns")]
    SessionTurnLimit { limit: u32 },

    #[error("RATE_LIMITED: the service is overloaded, please try again shortly")]
    Overloaded,

    #[error("Generation failed: {message}")]
    GenerationFailed { message: String },

    #[error("Turn text is empty")]
    EmptyTurn,

    #[error(transparent)]
    Store(#[from] NexError),
}

impl TurnError {
    /// Stable code for callers
    pub fn code(&self) -> &'static str {
        match self {
            TurnError::Session(SessionError::Store(_)) | TurnError::Store(_) => "STORE_UNAVAILABLE",
            TurnError::Session(_) => "SESSION_INVALID",
            TurnError::QuotaExceeded(denial) => denial.kind.error_code(),
            TurnError::SessionTurnLimit { .. } => "SESSION_TURN_LIMIT_REACHED",
            TurnError::Overloaded => "RATE_LIMITED",
            TurnError::GenerationFailed { .. } => "GENERATION_FAILED",
            TurnError::EmptyTurn => "INVALID_INPUT",
        }
    }

    /// The same request may succeed later without the user changing anything
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TurnError::Overloaded | TurnError::Store(_) | TurnError::Session(SessionError::Store(_))
        )
    }

    /// The caller has to start a new session before trying again
    pub fn requires_restart(&self) -> bool {
        match self {
            TurnError::Session(e) => e.requires_restart(),
            TurnError::SessionTurnLimit { .. } => true,
            _ => false,
        }
    }
}
