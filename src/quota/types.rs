//! Types for the quota system
//!
//! Tiers map to a fixed limits table. Counters live on the user's record and
//! are only ever changed through the store's atomic increment primitive.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription rank of a user, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "TIER_1")]
    Tier1,
    #[serde(rename = "TIER_2")]
    Tier2,
    #[serde(rename = "TIER_3")]
    Tier3,
}

/// Limits attached to a tier. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub daily_messages: Option<u64>,
    pub memory_items: Option<u64>,
    pub daily_sessions: Option<usize>,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Tier1, Tier::Tier2, Tier::Tier3];

    /// Ordinal rank, starting at 1
    pub fn rank(&self) -> u8 {
        match self {
            Tier::Tier1 => 1,
            Tier::Tier2 => 2,
            Tier::Tier3 => 3,
        }
    }

    /// The fixed limits table
    pub fn limits(&self) -> TierLimits {
        match self {
            Tier::Tier1 => TierLimits {
                daily_messages: Some(20),
                memory_items: Some(5),
                daily_sessions: Some(1),
            },
            Tier::Tier2 => TierLimits {
                daily_messages: Some(50),
                memory_items: Some(20),
                daily_sessions: None,
            },
            Tier::Tier3 => TierLimits {
                daily_messages: None,
                memory_items: None,
                daily_sessions: None,
            },
        }
    }

    /// True unless this is already the highest tier
    pub fn can_upgrade(&self) -> bool {
        *self != Tier::Tier3
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tier1 => "TIER_1",
            Tier::Tier2 => "TIER_2",
            Tier::Tier3 => "TIER_3",
        }
    }
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Tier1
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "TIER_1" | "TIER1" | "1" => Ok(Tier::Tier1),
            "TIER_2" | "TIER2" | "2" => Ok(Tier::Tier2),
            "TIER_3" | "TIER3" | "3" => Ok(Tier::Tier3),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// Which counter on the user record an operation touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Messages,
    Memory,
    Sessions,
}

impl QuotaKind {
    /// Error code surfaced to callers when this quota refuses
    pub fn error_code(&self) -> &'static str {
        match self {
            QuotaKind::Messages => "MESSAGE_LIMIT_REACHED",
            QuotaKind::Memory => "MEMORY_LIMIT_REACHED",
            QuotaKind::Sessions => "DAILY_SESSION_LIMIT_REACHED",
        }
    }
}

/// Per-user quota state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserQuotaRecord {
    pub user_id: String,
    pub tier: Tier,
    pub messages_used_today: u64,
    /// UTC day `messages_used_today` counts for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_day: Option<NaiveDate>,
    pub memory_used: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_expiry: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserQuotaRecord {
    /// A fresh lowest-tier record
    pub fn bootstrap(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            tier: Tier::Tier1,
            messages_used_today: 0,
            messages_day: Some(now.date_naive()),
            memory_used: 0,
            subscription_expiry: None,
            created_at: now,
        }
    }

    pub fn counter(&self, kind: QuotaKind) -> u64 {
        match kind {
            QuotaKind::Messages => self.messages_used_today,
            QuotaKind::Memory => self.memory_used,
            QuotaKind::Sessions => 0,
        }
    }
}

/// Answer to "may this user act"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub limit: Option<u64>,
    pub used: u64,
}

impl QuotaCheck {
    pub fn evaluate(limit: Option<u64>, used: u64) -> Self {
        Self {
            allowed: limit.is_none_or(|l| used < l),
            limit,
            used,
        }
    }

    /// Remaining allowance; `None` when unbounded
    pub fn remaining(&self) -> Option<u64> {
        self.limit.map(|l| l.saturating_sub(self.used))
    }
}

/// A refused quota check, with enough context for an upgrade prompt
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} for {tier} (used {used} of {limit})", kind.error_code())]
pub struct QuotaDenial {
    pub kind: QuotaKind,
    pub tier: Tier,
    pub limit: u64,
    pub used: u64,
    pub upgrade_available: bool,
}

impl QuotaDenial {
    pub fn new(kind: QuotaKind, tier: Tier, limit: u64, used: u64) -> Self {
        Self {
            kind,
            tier,
            limit,
            used,
            upgrade_available: tier.can_upgrade(),
        }
    }
}

/// Snapshot of a user's standing, as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub tier: Tier,
    pub daily_limit: Option<u64>,
    pub messages_used_today: u64,
    pub messages_remaining: Option<u64>,
    pub memory_limit: Option<u64>,
    pub memory_used: u64,
}
