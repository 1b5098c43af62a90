//! Service context and engine facade
//!
//! `ServiceContext` holds every collaborator, built once at process start.
//! `Engine` wires the quota tracker, session controller, archive service and
//! turn orchestrator on top of it and exposes the caller operations.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::archive::{
    ArchiveRecord, ArchiveService, ArchiveSummary, ModelReflector, Reflection, Reflector,
};
use crate::config::Config;
use crate::generation::{
    ConversationModel, FragmentStream, GenerationError, LlmConversationModel, ModelSelection,
    RoutingDecision,
};
use crate::memory::{MemoryBackend, MemoryError, MemoryListing};
use crate::providers::ProviderFactory;
use crate::quota::{QuotaStatus, QuotaTracker, Tier, UserQuotaRecord};
use crate::session::{
    SessionError, SessionHandle, SessionManager, SessionRecord, TurnRecord, start_sweeper_task,
};
use crate::store::{InMemoryStore, Store};
use crate::turn::{
    AcceptedTurn, ConsolidationOutcome, MemoryConsolidator, TurnError, TurnOrchestrator, TurnRouter,
};
use crate::utils::{Clock, NexError, Result, SystemClock};

/// Every collaborator the engine depends on
pub struct ServiceContext {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub model: Arc<dyn ConversationModel>,
    pub memory: Arc<dyn MemoryBackend>,
    pub reflector: Arc<dyn Reflector>,
    pub clock: Arc<dyn Clock>,
    /// Set when the store writes snapshots, for the auto-persistence task
    snapshots: Option<Arc<InMemoryStore>>,
}

impl ServiceContext {
    /// Assembles a context from ready-made collaborators
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        model: Arc<dyn ConversationModel>,
        memory: Arc<dyn MemoryBackend>,
        reflector: Arc<dyn Reflector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            model,
            memory,
            reflector,
            clock,
            snapshots: None,
        }
    }

    /// Builds the production context: provider clients, store and memory backend.
    ///
    /// Without a provider the context still serves quota, archive and memory
    /// operations; turns fail with a generation error.
    pub async fn from_config(config: Config) -> Result<Self> {
        let (model, reflector): (Arc<dyn ConversationModel>, Arc<dyn Reflector>) =
            match config.provider_config.clone() {
                Some(provider_config) => {
                    let provider = ProviderFactory::create(provider_config)
                        .map_err(|e| NexError::config(format!("provider setup failed: {}", e)))?;
                    let retry = config.generation.retry_policy();
                    let model = LlmConversationModel::new(Arc::clone(&provider), retry)
                        .with_models(ModelSelection {
                            reply: None,
                            classify: config.generation.classify_model.clone(),
                            summary: config.generation.summary_model.clone(),
                        });
                    let reflector = ModelReflector::new(provider, retry)
                        .with_model(config.generation.summary_model.clone());
                    (Arc::new(model), Arc::new(reflector))
                }
                None => {
                    warn!("No provider configured; set OPENAI_API_KEY, OPENROUTER_API_KEY or OLLAMA_HOST");
                    (Arc::new(Offline), Arc::new(Offline))
                }
            };

        let data_dir = config.resolved_data_dir();
        let (store, snapshots): (Arc<dyn Store>, Option<Arc<InMemoryStore>>) = if config.persist {
            let dir = data_dir
                .clone()
                .ok_or_else(|| NexError::config("cannot resolve a data directory"))?;
            let store = Arc::new(InMemoryStore::open(dir).await?);
            let shared: Arc<dyn Store> = store.clone();
            (shared, Some(store))
        } else {
            (Arc::new(InMemoryStore::new()), None)
        };

        let memory_dir = data_dir
            .unwrap_or_else(|| PathBuf::from(".nex"))
            .join("memory");
        let memory = config.memory.build(memory_dir);

        info!(
            provider = provider_name(&config),
            memory = memory.name(),
            persistent = snapshots.is_some(),
            "Service context ready"
        );

        Ok(Self {
            config,
            store,
            model,
            memory,
            reflector,
            clock: Arc::new(SystemClock),
            snapshots,
        })
    }
}

/// Stands in for the model when no provider is configured
struct Offline;

#[async_trait]
impl ConversationModel for Offline {
    async fn classify(&self, _text: &str) -> std::result::Result<RoutingDecision, GenerationError> {
        Err(GenerationError::failed("no provider configured"))
    }

    async fn generate_stream(
        &self,
        _text: &str,
        _context: Option<&str>,
    ) -> std::result::Result<FragmentStream, GenerationError> {
        Err(GenerationError::failed("no provider configured"))
    }

    async fn summarize(&self, _text: &str, _reply: &str) -> std::result::Result<String, GenerationError> {
        Err(GenerationError::failed("no provider configured"))
    }
}

#[async_trait]
impl Reflector for Offline {
    async fn reflect(&self, _transcript: &[TurnRecord]) -> std::result::Result<Reflection, GenerationError> {
        Err(GenerationError::failed("no provider configured"))
    }
}

fn provider_name(config: &Config) -> &'static str {
    config
        .provider_config
        .as_ref()
        .map(|p| p.provider_type())
        .unwrap_or("none")
}

type Background = (JoinHandle<()>, mpsc::Sender<()>);

/// Caller-facing operations
pub struct Engine {
    config: Config,
    store: Arc<dyn Store>,
    memory: Arc<dyn MemoryBackend>,
    quota: Arc<QuotaTracker>,
    sessions: Arc<SessionManager>,
    archives: Arc<ArchiveService>,
    consolidator: Arc<MemoryConsolidator>,
    orchestrator: TurnOrchestrator,
    snapshots: Option<Arc<InMemoryStore>>,
    background: Mutex<Vec<Background>>,
}

impl Engine {
    /// Wires the components. Must be called inside a tokio runtime.
    pub fn new(context: ServiceContext) -> Self {
        Self::build(context, None)
    }

    /// Like `new`, also reporting every consolidation outcome
    pub fn with_consolidation_outcomes(
        context: ServiceContext,
        outcomes: mpsc::UnboundedSender<ConsolidationOutcome>,
    ) -> Self {
        Self::build(context, Some(outcomes))
    }

    fn build(
        context: ServiceContext,
        outcomes: Option<mpsc::UnboundedSender<ConsolidationOutcome>>,
    ) -> Self {
        let ServiceContext {
            config,
            store,
            model,
            memory,
            reflector,
            clock,
            snapshots,
        } = context;

        let quota = Arc::new(QuotaTracker::new(Arc::clone(&store), Arc::clone(&clock)));
        let archives = Arc::new(ArchiveService::new(
            Arc::clone(&store),
            reflector,
            Arc::clone(&clock),
        ));
        let sessions = Arc::new(
            SessionManager::new(
                Arc::clone(&store),
                Arc::clone(&archives),
                Arc::clone(&quota),
                clock,
            )
            .with_inactivity_minutes(config.session.inactivity_minutes),
        );

        let consolidator = Arc::new(match outcomes {
            Some(tx) => MemoryConsolidator::start_with_outcomes(
                Arc::clone(&model),
                Arc::clone(&memory),
                Arc::clone(&quota),
                tx,
            ),
            None => {
                MemoryConsolidator::start(Arc::clone(&model), Arc::clone(&memory), Arc::clone(&quota))
            }
        });

        let router = TurnRouter::new(Arc::clone(&model))
            .with_confidence_threshold(config.generation.confidence_threshold);
        let orchestrator = TurnOrchestrator::new(
            Arc::clone(&sessions),
            Arc::clone(&quota),
            router,
            model,
            Arc::clone(&memory),
            Arc::clone(&consolidator),
        )
        .with_max_turns_per_session(config.session.max_turns_per_session);

        Self {
            config,
            store,
            memory,
            quota,
            sessions,
            archives,
            consolidator,
            orchestrator,
            snapshots,
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn start_session(&self, user_id: &str) -> std::result::Result<SessionHandle, SessionError> {
        self.sessions.start(user_id).await
    }

    /// The user's active session; an idle one is archived and reported absent
    pub async fn active_session(
        &self,
        user_id: &str,
    ) -> std::result::Result<Option<SessionRecord>, SessionError> {
        self.sessions.get_active(user_id).await
    }

    pub async fn submit_turn(
        &self,
        user_id: &str,
        session_id: &str,
        text: &str,
    ) -> std::result::Result<AcceptedTurn, TurnError> {
        self.orchestrator.submit_turn(user_id, session_id, text).await
    }

    /// Ends the user's session and returns its archive.
    ///
    /// `None` means a concurrent close already archived it.
    pub async fn end_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> std::result::Result<Option<ArchiveSummary>, SessionError> {
        self.sessions.end_for(user_id, session_id).await
    }

    pub async fn list_archives(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ArchiveSummary>> {
        self.archives.list(user_id, limit).await
    }

    pub async fn get_archive(&self, user_id: &str, archive_id: &str) -> Result<Option<ArchiveRecord>> {
        self.archives.get(user_id, archive_id).await
    }

    pub async fn quota_status(&self, user_id: &str) -> Result<QuotaStatus> {
        self.quota.status(user_id).await
    }

    pub async fn upgrade_tier(&self, user_id: &str, tier: Tier) -> Result<UserQuotaRecord> {
        self.quota.upgrade_tier(user_id, tier).await
    }

    /// Stores a user-approved memory item, gated by the memory quota
    pub async fn remember(
        &self,
        user_id: &str,
        content: &str,
    ) -> std::result::Result<MemoryListing, MemoryError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MemoryError::InvalidContent(
                "memory content cannot be empty".to_string(),
            ));
        }
        if !self.memory.accepts_writes() {
            return Err(MemoryError::Disabled);
        }

        let check = match self.quota.increment_memory(user_id).await? {
            Ok(check) => check,
            Err(denial) => {
                info!(user_id = %user_id, %denial, "Memory refused by quota");
                return Err(MemoryError::QuotaExceeded(denial));
            }
        };

        if let Err(e) = self.memory.store(user_id, content).await {
            if let Err(release) = self.quota.release_memory(user_id).await {
                warn!(user_id = %user_id, error = %release, "Failed to release memory quota");
            }
            return Err(e);
        }
        debug!(user_id = %user_id, used = check.used, "Memory stored");

        let entries = self.memory.list(user_id).await?;
        Ok(MemoryListing::new(entries, check))
    }

    /// Stored memories, newest first, with the user's allowance
    pub async fn memories(&self, user_id: &str) -> std::result::Result<MemoryListing, MemoryError> {
        let check = self.quota.check_memory(user_id).await?;
        let entries = self.memory.list(user_id).await?;
        Ok(MemoryListing::new(entries, check))
    }

    /// Closes and archives every idle session now
    pub async fn sweep_idle(&self) -> std::result::Result<usize, SessionError> {
        self.sessions.sweep_idle().await
    }

    /// Waits until queued consolidation writes have finished
    pub async fn wait_for_consolidation(&self) {
        self.consolidator.wait_idle().await;
    }

    /// Starts the idle sweeper and snapshot persistence, as configured
    pub async fn start_background(&self) {
        let mut background = self.background.lock().await;
        if !background.is_empty() {
            return;
        }

        if let Some(interval) = self.config.session.sweep_interval_secs {
            background.push(start_sweeper_task(Arc::clone(&self.sessions), interval));
            debug!(interval, "Idle sweeper started");
        }
        if let Some(store) = &self.snapshots {
            if let Some(task) =
                store.start_auto_persistence(self.config.session.persistence_interval_secs)
            {
                background.push(task);
                debug!("Auto-persistence started");
            }
        }
    }

    /// Stops background tasks, drains consolidation and flushes the store
    pub async fn shutdown(&self) -> Result<()> {
        let tasks: Vec<Background> = self.background.lock().await.drain(..).collect();
        for (handle, shutdown_tx) in tasks {
            let _ = shutdown_tx.send(()).await;
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.consolidator.shutdown().await;
        self.store.flush().await?;
        info!("Engine shut down");
        Ok(())
    }
}
