use crate::quota::Tier;
use crate::utils::NexError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Inactivity window after which an active session is treated as ended
pub const SESSION_TIMEOUT_MINUTES: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One transcript entry. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl TurnRecord {
    pub fn new(role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub transcript: Vec<TurnRecord>,
    pub turn_count: u32,
}

impl SessionRecord {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            started_at: now,
            last_activity_at: now,
            ended_at: None,
            is_active: true,
            transcript: Vec::new(),
            turn_count: 0,
        }
    }

    /// True when the last activity is older than `window` at `now`
    pub fn is_idle(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now.signed_duration_since(self.last_activity_at) > window
    }

    pub fn push_turn(&mut self, turn: TurnRecord) {
        self.last_activity_at = turn.timestamp;
        self.transcript.push(turn);
        self.turn_count += 1;
    }

    /// Marks the session closed and hands over its transcript
    pub fn close(&mut self, ended_at: DateTime<Utc>) -> Vec<TurnRecord> {
        self.is_active = false;
        self.ended_at = Some(ended_at);
        std::mem::take(&mut self.transcript)
    }
}

/// Public view of a freshly started session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionHandle {
    pub session_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
}

impl From<&SessionRecord> for SessionHandle {
    fn from(record: &SessionRecord) -> Self {
        Self {
            session_id: record.session_id.clone(),
            user_id: record.user_id.clone(),
            started_at: record.started_at,
        }
    }
}

/// Why a session was closed, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Explicit,
    Superseded,
    Timeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Explicit => write!(f, "explicit"),
            CloseReason::Superseded => write!(f, "superseded"),
            CloseReason::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("DAILY_SESSION_LIMIT_REACHED: {tier} allows {limit} session(s) per day")]
    DailySessionLimitReached { tier: Tier, limit: usize },

    #[error("No active session")]
    NoActiveSession,

    #[error("Session {supplied} is not the active session ({active})")]
    SessionMismatch { supplied: String, active: String },

    #[error("Session {id} is already closed")]
    SessionClosed { id: String },

    #[error("Session {id} not found")]
    NotFound { id: String },

    #[error(transparent)]
    Store(#[from] NexError),
}

impl SessionError {
    /// Session state errors mean the caller must start a new session
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            SessionError::NoActiveSession
                | SessionError::SessionMismatch { .. }
                | SessionError::SessionClosed { .. }
                | SessionError::NotFound { .. }
        )
    }
}
