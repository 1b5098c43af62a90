//! Document store for users, sessions and archives
//!
//! The store is the only place state is mutated. Every method that changes a
//! record does so atomically with respect to other callers, so the layers
//! above never read-then-write a counter or a transcript.

pub mod memory;
pub mod persistence;

pub use memory::InMemoryStore;
pub use persistence::SnapshotPersistence;

use crate::archive::ArchiveRecord;
use crate::quota::{QuotaKind, Tier, UserQuotaRecord};
use crate::session::{SessionRecord, TurnRecord};
use crate::utils::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Result of a conditional counter increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterUpdate {
    /// The counter was bumped to this value
    Applied(u64),
    /// The ceiling was already reached; the counter holds this value
    Refused(u64),
}

/// Result of appending a turn to a session transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended { turn_count: u32 },
    Closed,
    Missing,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn load_user(&self, user_id: &str) -> Result<Option<UserQuotaRecord>>;

    /// Inserts `record` unless the user exists; returns the stored record
    async fn insert_user_if_absent(&self, record: UserQuotaRecord) -> Result<UserQuotaRecord>;

    async fn set_tier(&self, user_id: &str, tier: Tier) -> Result<Option<UserQuotaRecord>>;

    /// Zeroes the daily message counter unless it already counts for `day`
    async fn roll_daily_counter(
        &self,
        user_id: &str,
        day: NaiveDate,
    ) -> Result<Option<UserQuotaRecord>>;

    /// Bumps a counter by one unless it already sits at `ceiling`
    async fn increment_counter(
        &self,
        user_id: &str,
        kind: QuotaKind,
        ceiling: Option<u64>,
    ) -> Result<CounterUpdate>;

    /// Lowers a counter by one, saturating at zero
    async fn decrement_counter(&self, user_id: &str, kind: QuotaKind) -> Result<u64>;

    async fn insert_session(&self, session: SessionRecord) -> Result<()>;

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// The most recently started active session of a user
    async fn active_session_for(&self, user_id: &str) -> Result<Option<SessionRecord>>;

    /// Number of sessions the user started at or after `since`
    async fn sessions_started_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<usize>;

    /// Appends a turn only if the session is still active
    async fn append_turn(&self, session_id: &str, turn: TurnRecord) -> Result<AppendOutcome>;

    /// Flips an active session inactive, clears its transcript and stores
    /// `archive`, all in one write. Returns the cleared transcript, or `None`
    /// (and stores nothing) when the session is missing or already closed.
    async fn close_session_with_archive(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
        archive: ArchiveRecord,
    ) -> Result<Option<Vec<TurnRecord>>>;

    /// Active sessions whose last activity is older than `cutoff`
    async fn idle_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionRecord>>;

    async fn insert_archive(&self, archive: ArchiveRecord) -> Result<()>;

    async fn get_archive(&self, archive_id: &str) -> Result<Option<ArchiveRecord>>;

    /// Archives owned by the user, newest first
    async fn archives_for(&self, user_id: &str, limit: usize) -> Result<Vec<ArchiveRecord>>;

    /// Writes pending state to durable storage, if any
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
