use crate::archive::{ArchiveService, ArchiveSummary};
use crate::quota::QuotaTracker;
use crate::session::locks::SessionLocks;
use crate::session::types::{
    CloseReason, Role, SESSION_TIMEOUT_MINUTES, SessionError, SessionHandle, SessionRecord,
    TurnRecord,
};
use crate::store::{AppendOutcome, Store};
use crate::utils::{Clock, start_of_day};
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Type alias for Results in this module
type Result<T> = std::result::Result<T, SessionError>;

/// Session lifecycle controller.
///
/// Owns the one-active-session-per-user invariant and every transition out of
/// the active state. All three exits (explicit end, supersede, timeout) go
/// through the same close path, which stores the archive in the same write
/// that deactivates the session.
pub struct SessionManager {
    store: Arc<dyn Store>,
    archives: Arc<ArchiveService>,
    quota: Arc<QuotaTracker>,
    clock: Arc<dyn Clock>,
    locks: SessionLocks,
    inactivity: Duration,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn Store>,
        archives: Arc<ArchiveService>,
        quota: Arc<QuotaTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            archives,
            quota,
            clock,
            locks: SessionLocks::new(),
            inactivity: Duration::minutes(SESSION_TIMEOUT_MINUTES),
        }
    }

    pub fn with_inactivity_minutes(mut self, minutes: u64) -> Self {
        self.inactivity = Duration::minutes(minutes.max(1) as i64);
        self
    }

    pub fn inactivity_window(&self) -> Duration {
        self.inactivity
    }

    /// Starts a fresh session, superseding any active one.
    ///
    /// The daily cap is checked first so a refused start leaves the current
    /// session untouched.
    pub async fn start(&self, user_id: &str) -> Result<SessionHandle> {
        let key = user_key(user_id);
        let guard = self.locks.acquire(&key).await;
        let started = self.start_locked(user_id).await;
        drop(guard);
        self.locks.release(&key).await;
        started
    }

    async fn start_locked(&self, user_id: &str) -> Result<SessionHandle> {
        let now = self.clock.now();

        let tier = self.quota.tier(user_id).await?;
        if let Some(limit) = tier.limits().daily_sessions {
            let started_today = self
                .store
                .sessions_started_since(user_id, start_of_day(now))
                .await?;
            if started_today >= limit {
                info!(user_id = %user_id, %tier, started_today, "Daily session limit reached");
                return Err(SessionError::DailySessionLimitReached { tier, limit });
            }
        }

        if let Some(active) = self.store.active_session_for(user_id).await? {
            self.close(&active.session_id, &active.user_id, CloseReason::Superseded)
                .await?;
        }

        let session = SessionRecord::new(user_id, now);
        let handle = SessionHandle::from(&session);
        self.store.insert_session(session).await?;

        info!(user_id = %user_id, session_id = %handle.session_id, "Session started");
        Ok(handle)
    }

    /// The user's active session, or `None`.
    ///
    /// A session idle past the inactivity window is closed and archived here
    /// and reported as absent.
    pub async fn get_active(&self, user_id: &str) -> Result<Option<SessionRecord>> {
        let Some(session) = self.store.active_session_for(user_id).await? else {
            return Ok(None);
        };

        if session.is_idle(self.clock.now(), self.inactivity) {
            self.close(&session.session_id, &session.user_id, CloseReason::Timeout)
                .await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Checks that `session_id` is the user's live session
    pub async fn validate(&self, user_id: &str, session_id: &str) -> Result<SessionRecord> {
        let active = self
            .get_active(user_id)
            .await?
            .ok_or(SessionError::NoActiveSession)?;

        if active.session_id != session_id {
            return Err(SessionError::SessionMismatch {
                supplied: session_id.to_string(),
                active: active.session_id,
            });
        }
        Ok(active)
    }

    /// Appends a turn and returns the new turn count.
    ///
    /// Writing to a closed session is reported, never dropped.
    pub async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: impl Into<String>,
    ) -> Result<u32> {
        let _guard = self.locks.acquire(session_id).await;
        let turn = TurnRecord::new(role, content, self.clock.now());

        match self.store.append_turn(session_id, turn).await? {
            AppendOutcome::Appended { turn_count } => {
                debug!(session_id = %session_id, %role, turn_count, "Turn appended");
                Ok(turn_count)
            }
            AppendOutcome::Closed => {
                error!(session_id = %session_id, %role, "Write to closed session rejected");
                Err(SessionError::SessionClosed {
                    id: session_id.to_string(),
                })
            }
            AppendOutcome::Missing => Err(SessionError::NotFound {
                id: session_id.to_string(),
            }),
        }
    }

    /// Ends a session. Returns `None` when it was already closed.
    pub async fn end(&self, session_id: &str) -> Result<Option<ArchiveSummary>> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;
        self.close(session_id, &session.user_id, CloseReason::Explicit)
            .await
    }

    /// Ends a session on behalf of its owner
    pub async fn end_for(&self, user_id: &str, session_id: &str) -> Result<Option<ArchiveSummary>> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;
        self.close(&session.session_id, user_id, CloseReason::Explicit)
            .await
    }

    /// Closes every session idle past the window; returns how many were closed
    pub async fn sweep_idle(&self) -> Result<usize> {
        let cutoff = self.clock.now() - self.inactivity;
        let idle = self.store.idle_sessions(cutoff).await?;

        let mut closed = 0;
        for session in idle {
            if self
                .close(&session.session_id, &session.user_id, CloseReason::Timeout)
                .await?
                .is_some()
            {
                closed += 1;
            }
        }
        Ok(closed)
    }

    /// Archives the transcript and deactivates the session in one store write.
    ///
    /// Runs under the session lock, so concurrent closers produce exactly one
    /// archive. If the write fails the session stays active with its
    /// transcript, and a later close can retry.
    async fn close(
        &self,
        session_id: &str,
        user_id: &str,
        reason: CloseReason,
    ) -> Result<Option<ArchiveSummary>> {
        let guard = self.locks.acquire(session_id).await;
        let Some(session) = self
            .store
            .get_session(session_id)
            .await?
            .filter(|s| s.is_active)
        else {
            debug!(session_id = %session_id, %reason, "Session already closed");
            return Ok(None);
        };

        let record = self
            .archives
            .compose(user_id, session_id, &session.transcript)
            .await;
        let summary = ArchiveSummary::from(&record);
        let closed = self
            .store
            .close_session_with_archive(session_id, self.clock.now(), record)
            .await?;
        drop(guard);

        let Some(transcript) = closed else {
            debug!(session_id = %session_id, %reason, "Session already closed");
            return Ok(None);
        };
        self.locks.remove(session_id).await;

        info!(
            user_id = %user_id,
            session_id = %session_id,
            archive_id = %summary.archive_id,
            %reason,
            turns = transcript.len(),
            "Session archived"
        );
        Ok(Some(summary))
    }
}

fn user_key(user_id: &str) -> String {
    format!("user:{}", user_id)
}
