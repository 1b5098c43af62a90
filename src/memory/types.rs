//! Types for the long-term memory backends

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::quota::{QuotaCheck, QuotaDenial};
use crate::utils::NexError;

/// One remembered fact about a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            content: content.into(),
            timestamp,
        }
    }
}

/// A user's stored memories together with their memory allowance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryListing {
    pub entries: Vec<MemoryEntry>,
    pub limit: Option<u64>,
    pub used: u64,
}

impl MemoryListing {
    pub fn new(entries: Vec<MemoryEntry>, quota: QuotaCheck) -> Self {
        Self {
            entries,
            limit: quota.limit,
            used: quota.used,
        }
    }
}

/// Error types for memory operations
#[derive(Debug)]
pub enum MemoryError {
    /// Empty or otherwise unusable content
    InvalidContent(String),
    /// Owner id cannot be mapped to a storage location
    InvalidOwner(String),
    /// Storage operation failed
    StorageFailed {
        operation: String,
        source: std::io::Error,
    },
    /// The user's memory allowance is used up
    QuotaExceeded(QuotaDenial),
    /// The quota record could not be read or updated
    Store(NexError),
    /// The configured backend keeps nothing
    Disabled,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::InvalidContent(msg) => write!(f, "Invalid content: {}", msg),
            MemoryError::InvalidOwner(owner) => write!(f, "Invalid memory owner: '{}'", owner),
            MemoryError::StorageFailed { operation, source } => {
                write!(f, "Storage operation '{}' failed: {}", operation, source)
            }
            MemoryError::QuotaExceeded(denial) => write!(f, "{}", denial),
            MemoryError::Store(e) => write!(f, "{}", e),
            MemoryError::Disabled => write!(f, "Long-term memory is disabled"),
        }
    }
}

impl std::error::Error for MemoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MemoryError::StorageFailed { source, .. } => Some(source),
            MemoryError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NexError> for MemoryError {
    fn from(err: NexError) -> Self {
        MemoryError::Store(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::{QuotaKind, Tier};

    #[test]
    fn test_memory_error_display() {
        let error = MemoryError::InvalidContent("empty".to_string());
        assert!(error.to_string().contains("empty"));

        let denial = QuotaDenial::new(QuotaKind::Memory, Tier::Tier1, 5, 5);
        let error = MemoryError::QuotaExceeded(denial);
        assert!(error.to_string().starts_with("MEMORY_LIMIT_REACHED"));
    }

    #[test]
    fn test_listing_carries_quota() {
        let listing = MemoryListing::new(
            vec![MemoryEntry::new("likes tea", Utc::now())],
            QuotaCheck::evaluate(Some(5), 1),
        );
        assert_eq!(listing.limit, Some(5));
        assert_eq!(listing.used, 1);
    }
}
