//! Background memory consolidation
//!
//! Completed turns are pushed onto a work queue and summarized into long-term
//! memory off the response path. Jobs run concurrently and in no particular
//! order. Every failure is logged and dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::generation::ConversationModel;
use crate::memory::MemoryBackend;
use crate::quota::QuotaTracker;

/// Where the one-line summary of a turn comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummarySource {
    /// The router's candidate, used when no context was retrieved
    Candidate(String),
    /// Summarize the exchange again, because retrieved context made the candidate stale
    Regenerate,
}

#[derive(Debug, Clone)]
pub struct ConsolidationJob {
    pub user_id: String,
    pub text: String,
    pub reply: String,
    pub summary: SummarySource,
}

/// What happened to one job, for logging and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsolidationOutcome {
    Stored(String),
    QuotaReached,
    Dropped(String),
}

#[derive(Clone)]
struct Worker {
    model: Arc<dyn ConversationModel>,
    memory: Arc<dyn MemoryBackend>,
    quota: Arc<QuotaTracker>,
}

impl Worker {
    async fn process(&self, job: ConsolidationJob) -> ConsolidationOutcome {
        if !self.memory.accepts_writes() {
            return ConsolidationOutcome::Dropped("memory disabled".to_string());
        }

        let summary = match job.summary {
            SummarySource::Candidate(line) => line,
            SummarySource::Regenerate => match self.model.summarize(&job.text, &job.reply).await {
                Ok(line) => line,
                Err(e) => return ConsolidationOutcome::Dropped(format!("summary failed: {}", e)),
            },
        };

        match self.quota.increment_memory(&job.user_id).await {
            Ok(Ok(_)) => {}
            Ok(Err(denial)) => {
                debug!(user_id = %job.user_id, %denial, "Memory allowance used up, skipping write");
                return ConsolidationOutcome::QuotaReached;
            }
            Err(e) => return ConsolidationOutcome::Dropped(format!("quota unavailable: {}", e)),
        }

        if let Err(e) = self.memory.store(&job.user_id, &summary).await {
            if let Err(release) = self.quota.release_memory(&job.user_id).await {
                warn!(user_id = %job.user_id, error = %release, "Failed to release memory quota");
            }
            return ConsolidationOutcome::Dropped(format!("memory write failed: {}", e));
        }
        ConsolidationOutcome::Stored(summary)
    }
}

/// Handle to the consolidation queue. Cheap to share behind an `Arc`.
pub struct MemoryConsolidator {
    tx: Mutex<Option<mpsc::UnboundedSender<ConsolidationJob>>>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryConsolidator {
    /// Starts the dispatcher task
    pub fn start(
        model: Arc<dyn ConversationModel>,
        memory: Arc<dyn MemoryBackend>,
        quota: Arc<QuotaTracker>,
    ) -> Self {
        Self::start_inner(model, memory, quota, None)
    }

    /// Like `start`, also reporting each job's outcome on `outcomes`
    pub fn start_with_outcomes(
        model: Arc<dyn ConversationModel>,
        memory: Arc<dyn MemoryBackend>,
        quota: Arc<QuotaTracker>,
        outcomes: mpsc::UnboundedSender<ConsolidationOutcome>,
    ) -> Self {
        Self::start_inner(model, memory, quota, Some(outcomes))
    }

    fn start_inner(
        model: Arc<dyn ConversationModel>,
        memory: Arc<dyn MemoryBackend>,
        quota: Arc<QuotaTracker>,
        outcomes: Option<mpsc::UnboundedSender<ConsolidationOutcome>>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ConsolidationJob>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());
        let worker = Worker {
            model,
            memory,
            quota,
        };

        let dispatcher = {
            let in_flight = Arc::clone(&in_flight);
            let idle = Arc::clone(&idle);
            tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    let worker = worker.clone();
                    let in_flight = Arc::clone(&in_flight);
                    let idle = Arc::clone(&idle);
                    let outcomes = outcomes.clone();
                    tokio::spawn(async move {
                        let user_id = job.user_id.clone();
                        let outcome = worker.process(job).await;
                        match &outcome {
                            ConsolidationOutcome::Stored(line) => {
                                debug!(user_id = %user_id, summary = %line, "Turn consolidated")
                            }
                            ConsolidationOutcome::QuotaReached => {}
                            ConsolidationOutcome::Dropped(reason) => {
                                warn!(user_id = %user_id, reason = %reason, "Consolidation dropped")
                            }
                        }
                        if let Some(outcomes) = outcomes {
                            let _ = outcomes.send(outcome);
                        }
                        if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                            idle.notify_waiters();
                        }
                    });
                }
                debug!("Consolidation queue closed");
            })
        };

        Self {
            tx: Mutex::new(Some(tx)),
            in_flight,
            idle,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Queues a job without waiting for it; returns false once shut down
    pub async fn enqueue(&self, job: ConsolidationJob) -> bool {
        let guard = self.tx.lock().await;
        let Some(tx) = guard.as_ref() else {
            debug!(user_id = %job.user_id, "Consolidator stopped, job discarded");
            return false;
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if tx.send(job).is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolves once every queued job has finished
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stops accepting jobs and waits for the queued ones to finish
    pub async fn shutdown(&self) {
        self.tx.lock().await.take();
        if let Some(dispatcher) = self.dispatcher.lock().await.take() {
            if let Err(e) = dispatcher.await {
                warn!(error = %e, "Consolidation dispatcher ended abnormally");
            }
        }
        self.wait_idle().await;
        info!("Consolidator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{FragmentStream, GenerationError, RoutingDecision};
    use crate::memory::{DisabledMemory, VolatileMemory};
    use crate::quota::Tier;
    use crate::store::InMemoryStore;
    use crate::utils::SystemClock;
    use async_trait::async_trait;

    struct SummaryModel {
        fail: bool,
    }

    #[async_trait]
    impl ConversationModel for SummaryModel {
        async fn classify(&self, text: &str) -> Result<RoutingDecision, GenerationError> {
            Ok(RoutingDecision::fallback(text))
        }

        async fn generate_stream(
            &self,
            _text: &str,
            _context: Option<&str>,
        ) -> Result<FragmentStream, GenerationError> {
            Err(GenerationError::failed("unused"))
        }

        async fn summarize(&self, text: &str, _reply: &str) -> Result<String, GenerationError> {
            if self.fail {
                Err(GenerationError::failed("no summary"))
            } else {
                Ok(format!("Fresh summary of: {}", text))
            }
        }
    }

    fn setup(
        fail: bool,
    ) -> (
        MemoryConsolidator,
        Arc<VolatileMemory>,
        Arc<QuotaTracker>,
        mpsc::UnboundedReceiver<ConsolidationOutcome>,
    ) {
        let memory = Arc::new(VolatileMemory::new());
        let quota = Arc::new(QuotaTracker::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(SystemClock),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let consolidator = MemoryConsolidator::start_with_outcomes(
            Arc::new(SummaryModel { fail }),
            memory.clone(),
            quota.clone(),
            tx,
        );
        (consolidator, memory, quota, rx)
    }

    fn job(summary: SummarySource) -> ConsolidationJob {
        ConsolidationJob {
            user_id: "alice".to_string(),
            text: "I started pottery".to_string(),
            reply: "How fun!".to_string(),
            summary,
        }
    }

    #[tokio::test]
    async fn test_candidate_is_stored_and_counted() {
        let (consolidator, memory, quota, mut rx) = setup(false);
        assert!(
            consolidator
                .enqueue(job(SummarySource::Candidate("User started pottery.".into())))
                .await
        );
        consolidator.wait_idle().await;

        assert_eq!(
            rx.recv().await,
            Some(ConsolidationOutcome::Stored("User started pottery.".into()))
        );
        assert_eq!(memory.len("alice").await, 1);
        assert_eq!(quota.check_memory("alice").await.unwrap().used, 1);
    }

    #[tokio::test]
    async fn test_regenerate_uses_fresh_summary() {
        let (consolidator, memory, _, _rx) = setup(false);
        consolidator.enqueue(job(SummarySource::Regenerate)).await;
        consolidator.wait_idle().await;

        let listed = memory.list("alice").await.unwrap();
        assert_eq!(listed[0].content, "Fresh summary of: I started pottery");
    }

    #[tokio::test]
    async fn test_failures_are_dropped() {
        let (consolidator, memory, quota, mut rx) = setup(true);
        consolidator.enqueue(job(SummarySource::Regenerate)).await;
        consolidator.wait_idle().await;

        assert!(matches!(rx.recv().await, Some(ConsolidationOutcome::Dropped(_))));
        assert_eq!(memory.len("alice").await, 0);
        assert_eq!(quota.check_memory("alice").await.unwrap().used, 0);
    }

    #[tokio::test]
    async fn test_disabled_memory_spends_no_quota() {
        let quota = Arc::new(QuotaTracker::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(SystemClock),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let consolidator = MemoryConsolidator::start_with_outcomes(
            Arc::new(SummaryModel { fail: false }),
            Arc::new(DisabledMemory),
            quota.clone(),
            tx,
        );

        consolidator
            .enqueue(job(SummarySource::Candidate("User started pottery.".into())))
            .await;
        consolidator.wait_idle().await;

        assert!(matches!(rx.recv().await, Some(ConsolidationOutcome::Dropped(_))));
        assert_eq!(quota.check_memory("alice").await.unwrap().used, 0);
    }

    #[tokio::test]
    async fn test_memory_quota_stops_writes() {
        let (consolidator, memory, quota, _rx) = setup(false);
        for i in 0..8 {
            consolidator
                .enqueue(job(SummarySource::Candidate(format!("fact {}", i))))
                .await;
        }
        consolidator.wait_idle().await;
        assert_eq!(memory.len("alice").await, 5);

        quota.upgrade_tier("alice", Tier::Tier2).await.unwrap();
        consolidator
            .enqueue(job(SummarySource::Candidate("one more".into())))
            .await;
        consolidator.shutdown().await;
        assert_eq!(memory.len("alice").await, 6);
        assert!(!consolidator.enqueue(job(SummarySource::Regenerate)).await);
    }
}
