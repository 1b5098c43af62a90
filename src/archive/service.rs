use std::sync::Arc;

use tracing::warn;

use crate::archive::{ArchiveRecord, ArchiveSummary, Reflection, Reflector};
use crate::session::TurnRecord;
use crate::store::Store;
use crate::utils::{Clock, Result};

pub const DEFAULT_ARCHIVE_LIMIT: usize = 10;

/// Creates and serves archives. Creation never fails on reflection errors.
pub struct ArchiveService {
    store: Arc<dyn Store>,
    reflector: Arc<dyn Reflector>,
    clock: Arc<dyn Clock>,
}

impl ArchiveService {
    pub fn new(store: Arc<dyn Store>, reflector: Arc<dyn Reflector>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            reflector,
            clock,
        }
    }

    /// Reflects on a session's transcript and builds its archive record.
    ///
    /// An empty transcript gets the quiet placeholder without a model call;
    /// a failed reflection gets the fallback triple. Nothing is stored here.
    pub async fn compose(
        &self,
        user_id: &str,
        session_id: &str,
        transcript: &[TurnRecord],
    ) -> ArchiveRecord {
        let reflection = if transcript.is_empty() {
            Reflection::quiet()
        } else {
            match self.reflector.reflect(transcript).await {
                Ok(reflection) => reflection,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Reflection failed, using fallback");
                    Reflection::fallback()
                }
            }
        };

        ArchiveRecord {
            archive_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            title: reflection.title,
            reflection: reflection.reflection,
            emotion_tag: reflection.emotion_tag,
            created_at: self.clock.now(),
        }
    }

    /// The user's archives, newest first
    pub async fn list(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<ArchiveSummary>> {
        let records = self
            .store
            .archives_for(user_id, limit.unwrap_or(DEFAULT_ARCHIVE_LIMIT))
            .await?;
        Ok(records.iter().map(ArchiveSummary::from).collect())
    }

    /// One archive, visible only to its owner
    pub async fn get(&self, user_id: &str, archive_id: &str) -> Result<Option<ArchiveRecord>> {
        Ok(self
            .store
            .get_archive(archive_id)
            .await?
            .filter(|record| record.user_id == user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationError;
    use crate::session::Role;
    use crate::store::InMemoryStore;
    use crate::utils::ManualClock;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReflector {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Reflector for CountingReflector {
        async fn reflect(&self, _transcript: &[TurnRecord]) -> std::result::Result<Reflection, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(GenerationError::failed("boom"))
            } else {
                Ok(Reflection::new("Small Wins", "You kept going.", "hopeful"))
            }
        }
    }

    struct Fixture {
        service: ArchiveService,
        store: Arc<InMemoryStore>,
        reflector: Arc<CountingReflector>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        async fn archive(&self, user_id: &str, session_id: &str) -> ArchiveRecord {
            let record = self.service.compose(user_id, session_id, &transcript()).await;
            self.store.insert_archive(record.clone()).await.unwrap();
            record
        }
    }

    fn fixture(fail: bool) -> Fixture {
        let reflector = Arc::new(CountingReflector {
            calls: AtomicUsize::new(0),
            fail,
        });
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::new());
        let service = ArchiveService::new(store.clone(), reflector.clone(), clock.clone());
        Fixture {
            service,
            store,
            reflector,
            clock,
        }
    }

    fn transcript() -> Vec<TurnRecord> {
        vec![TurnRecord::new(Role::User, "I ran 5k today", Utc::now())]
    }

    #[tokio::test]
    async fn test_empty_transcript_uses_quiet_placeholder() {
        let f = fixture(false);
        let record = f.service.compose("alice", "s1", &[]).await;
        assert_eq!(record.title, "Quiet Moments");
        assert_eq!(record.emotion_tag, "peaceful");
        assert_eq!(f.reflector.calls.load(Ordering::SeqCst), 0);
        // Composing does not store
        assert!(f.service.list("alice", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reflection_failure_uses_fallback() {
        let f = fixture(true);
        let record = f.service.compose("alice", "s1", &transcript()).await;
        assert_eq!(record.title, "A Moment of Connection");
        assert_eq!(record.emotion_tag, "reflective");
    }

    #[tokio::test]
    async fn test_list_newest_first_with_limit() {
        let f = fixture(false);
        for i in 0..12 {
            f.archive("alice", &format!("s{}", i)).await;
            f.clock.advance(Duration::minutes(1));
        }
        f.archive("bob", "b1").await;

        let listed = f.service.list("alice", None).await.unwrap();
        assert_eq!(listed.len(), DEFAULT_ARCHIVE_LIMIT);
        assert!(listed[0].created_at > listed[1].created_at);

        let listed = f.service.list("alice", Some(3)).await.unwrap();
        assert_eq!(listed.len(), 3);
    }

    #[tokio::test]
    async fn test_get_checks_owner() {
        let f = fixture(false);
        let record = f.archive("alice", "s1").await;

        assert!(f.service.get("alice", &record.archive_id).await.unwrap().is_some());
        assert!(f.service.get("bob", &record.archive_id).await.unwrap().is_none());
        assert!(f.service.get("alice", "missing").await.unwrap().is_none());
    }
}
