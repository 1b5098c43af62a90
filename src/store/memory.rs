use crate::archive::ArchiveRecord;
use crate::quota::{QuotaKind, Tier, UserQuotaRecord};
use crate::session::{SessionRecord, TurnRecord};
use crate::store::persistence::{Snapshot, SnapshotPersistence};
use crate::store::{AppendOutcome, CounterUpdate, Store};
use crate::utils::{NexError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, interval};
use tracing::{debug, error, info};

#[derive(Debug, Default)]
struct Collections {
    users: HashMap<String, UserQuotaRecord>,
    sessions: HashMap<String, SessionRecord>,
    archives: HashMap<String, ArchiveRecord>,
}

impl Collections {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            users: snapshot
                .users
                .into_iter()
                .map(|u| (u.user_id.clone(), u))
                .collect(),
            sessions: snapshot
                .sessions
                .into_iter()
                .map(|s| (s.session_id.clone(), s))
                .collect(),
            archives: snapshot
                .archives
                .into_iter()
                .map(|a| (a.archive_id.clone(), a))
                .collect(),
        }
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            users: self.users.values().cloned().collect(),
            sessions: self.sessions.values().cloned().collect(),
            archives: self.archives.values().cloned().collect(),
        }
    }
}

/// Document store held in process memory, optionally snapshotted to disk.
///
/// Every mutation happens under a single write lock, which makes the
/// conditional increment, append and close primitives atomic. Locks are
/// never held across disk I/O.
pub struct InMemoryStore {
    inner: Arc<RwLock<Collections>>,
    persistence: Option<Arc<SnapshotPersistence>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// A purely volatile store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Collections::default())),
            persistence: None,
        }
    }

    /// Opens a store backed by snapshots in `data_dir`, loading any existing state
    pub async fn open(data_dir: PathBuf) -> Result<Self> {
        let persistence = SnapshotPersistence::new(data_dir);
        persistence
            .create_data_dir()
            .await
            .map_err(|e| NexError::store(format!("{:#}", e)))?;
        let snapshot = persistence
            .load()
            .await
            .map_err(|e| NexError::store(format!("{:#}", e)))?;

        Ok(Self {
            inner: Arc::new(RwLock::new(Collections::from_snapshot(snapshot))),
            persistence: Some(Arc::new(persistence)),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }

    /// Clones the current state
    pub async fn snapshot(&self) -> Snapshot {
        self.inner.read().await.to_snapshot()
    }

    /// Starts a background task that snapshots the store on an interval.
    ///
    /// Returns `None` for a volatile store. Otherwise returns a JoinHandle and a
    /// shutdown sender; the task writes one final snapshot before exiting.
    pub fn start_auto_persistence(
        &self,
        interval_secs: u64,
    ) -> Option<(tokio::task::JoinHandle<()>, tokio::sync::mpsc::Sender<()>)> {
        let persistence = Arc::clone(self.persistence.as_ref()?);
        let inner = Arc::clone(&self.inner);
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(interval_secs.max(1)));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        // Brief read lock, clone, release before I/O
                        let snapshot = inner.read().await.to_snapshot();
                        if let Err(e) = persistence.save(&snapshot).await {
                            error!(error = %e, "Auto-persistence failed");
                        } else {
                            debug!("Auto-persistence cycle completed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Persistence task received shutdown signal, completing...");
                        let snapshot = inner.read().await.to_snapshot();
                        if let Err(e) = persistence.save(&snapshot).await {
                            error!(error = %e, "Final snapshot failed");
                        }
                        break;
                    }
                }
            }
        });

        Some((handle, shutdown_tx))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn load_user(&self, user_id: &str) -> Result<Option<UserQuotaRecord>> {
        Ok(self.inner.read().await.users.get(user_id).cloned())
    }

    async fn insert_user_if_absent(&self, record: UserQuotaRecord) -> Result<UserQuotaRecord> {
        let mut guard = self.inner.write().await;
        let stored = guard
            .users
            .entry(record.user_id.clone())
            .or_insert(record);
        Ok(stored.clone())
    }

    async fn set_tier(&self, user_id: &str, tier: Tier) -> Result<Option<UserQuotaRecord>> {
        let mut guard = self.inner.write().await;
        Ok(guard.users.get_mut(user_id).map(|user| {
            user.tier = tier;
            user.clone()
        }))
    }

    async fn roll_daily_counter(
        &self,
        user_id: &str,
        day: NaiveDate,
    ) -> Result<Option<UserQuotaRecord>> {
        let mut guard = self.inner.write().await;
        Ok(guard.users.get_mut(user_id).map(|user| {
            if user.messages_day != Some(day) {
                user.messages_used_today = 0;
                user.messages_day = Some(day);
            }
            user.clone()
        }))
    }

    async fn increment_counter(
        &self,
        user_id: &str,
        kind: QuotaKind,
        ceiling: Option<u64>,
    ) -> Result<CounterUpdate> {
        let mut guard = self.inner.write().await;
        let user = guard
            .users
            .get_mut(user_id)
            .ok_or_else(|| NexError::invalid_input(format!("unknown user: {}", user_id)))?;

        let counter = match kind {
            QuotaKind::Messages => &mut user.messages_used_today,
            QuotaKind::Memory => &mut user.memory_used,
            QuotaKind::Sessions => {
                return Err(NexError::invalid_input(
                    "session starts are counted from session records",
                ));
            }
        };

        if ceiling.is_some_and(|c| *counter >= c) {
            return Ok(CounterUpdate::Refused(*counter));
        }
        *counter += 1;
        Ok(CounterUpdate::Applied(*counter))
    }

    async fn decrement_counter(&self, user_id: &str, kind: QuotaKind) -> Result<u64> {
        let mut guard = self.inner.write().await;
        let Some(user) = guard.users.get_mut(user_id) else {
            return Ok(0);
        };
        let counter = match kind {
            QuotaKind::Messages => &mut user.messages_used_today,
            QuotaKind::Memory => &mut user.memory_used,
            QuotaKind::Sessions => return Ok(0),
        };
        *counter = counter.saturating_sub(1);
        Ok(*counter)
    }

    async fn insert_session(&self, session: SessionRecord) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard.sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.inner.read().await.sessions.get(session_id).cloned())
    }

    async fn active_session_for(&self, user_id: &str) -> Result<Option<SessionRecord>> {
        let guard = self.inner.read().await;
        Ok(guard
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active)
            .max_by_key(|s| s.started_at)
            .cloned())
    }

    async fn sessions_started_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<usize> {
        let guard = self.inner.read().await;
        Ok(guard
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.started_at >= since)
            .count())
    }

    async fn append_turn(&self, session_id: &str, turn: TurnRecord) -> Result<AppendOutcome> {
        let mut guard = self.inner.write().await;
        match guard.sessions.get_mut(session_id) {
            None => Ok(AppendOutcome::Missing),
            Some(session) if !session.is_active => Ok(AppendOutcome::Closed),
            Some(session) => {
                session.push_turn(turn);
                Ok(AppendOutcome::Appended {
                    turn_count: session.turn_count,
                })
            }
        }
    }

    async fn close_session_with_archive(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
        archive: ArchiveRecord,
    ) -> Result<Option<Vec<TurnRecord>>> {
        let mut guard = self.inner.write().await;
        let collections = &mut *guard;
        let Some(session) = collections
            .sessions
            .get_mut(session_id)
            .filter(|s| s.is_active)
        else {
            return Ok(None);
        };
        let transcript = session.close(ended_at);
        collections
            .archives
            .insert(archive.archive_id.clone(), archive);
        Ok(Some(transcript))
    }

    async fn idle_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionRecord>> {
        let guard = self.inner.read().await;
        Ok(guard
            .sessions
            .values()
            .filter(|s| s.is_active && s.last_activity_at < cutoff)
            .cloned()
            .collect())
    }

    async fn insert_archive(&self, archive: ArchiveRecord) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard.archives.insert(archive.archive_id.clone(), archive);
        Ok(())
    }

    async fn get_archive(&self, archive_id: &str) -> Result<Option<ArchiveRecord>> {
        Ok(self.inner.read().await.archives.get(archive_id).cloned())
    }

    async fn archives_for(&self, user_id: &str, limit: usize) -> Result<Vec<ArchiveRecord>> {
        let guard = self.inner.read().await;
        let mut archives: Vec<ArchiveRecord> = guard
            .archives
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        drop(guard);

        archives.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        archives.truncate(limit);
        Ok(archives)
    }

    async fn flush(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let snapshot = self.snapshot().await;
        persistence
            .save(&snapshot)
            .await
            .map_err(|e| NexError::store(format!("{:#}", e)))
    }
}
