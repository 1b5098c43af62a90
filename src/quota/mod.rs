//! Quota tracking
//!
//! Each user has a tier, a daily message counter and a stored-memory counter.
//! Checks are evaluated independently per counter.

pub mod tracker;
pub mod types;

pub use tracker::QuotaTracker;
pub use types::{
    QuotaCheck, QuotaDenial, QuotaKind, QuotaStatus, Tier, TierLimits, UserQuotaRecord,
};
