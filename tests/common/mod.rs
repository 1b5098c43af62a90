//! Scripted collaborators and an engine builder driven by a manual clock
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::mpsc;

use nex::archive::{Reflection, Reflector};
use nex::config::Config;
use nex::generation::{ConversationModel, FragmentStream, GenerationError, RoutingDecision};
use nex::memory::{MemoryBackend, MemoryEntry, MemoryError};
use nex::session::TurnRecord;
use nex::store::InMemoryStore;
use nex::turn::ConsolidationOutcome;
use nex::utils::ManualClock;
use nex::{Engine, ServiceContext};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
}

pub fn decision(needs_memory: bool, standalone: Option<&str>, one_liner: Option<&str>) -> RoutingDecision {
    RoutingDecision {
        needs_past_memory: needs_memory,
        standalone_answer: standalone.map(str::to_string),
        memory_one_liner: one_liner.map(str::to_string),
        reasoning: "scripted".to_string(),
        confidence: Some(0.9),
        needs_broader_context: false,
    }
}

/// Generation collaborator with canned answers and call recording
pub struct ScriptedModel {
    decision: Mutex<Option<RoutingDecision>>,
    fragments: Mutex<Vec<String>>,
    mid_stream_error: Mutex<Option<String>>,
    open_error: Mutex<Option<GenerationError>>,
    summary: Mutex<Result<String, GenerationError>>,
    pub classify_calls: AtomicUsize,
    pub generate_calls: AtomicUsize,
    pub summarize_calls: AtomicUsize,
    pub contexts: Mutex<Vec<Option<String>>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            decision: Mutex::new(Some(decision(false, None, Some("User said hello")))),
            fragments: Mutex::new(vec!["Hello ".to_string(), "there".to_string()]),
            mid_stream_error: Mutex::new(None),
            open_error: Mutex::new(None),
            summary: Mutex::new(Ok("Regenerated summary".to_string())),
            classify_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            summarize_calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// `None` makes classification fail
    pub fn set_decision(&self, decision: Option<RoutingDecision>) {
        *self.decision.lock().unwrap() = decision;
    }

    pub fn set_fragments(&self, fragments: &[&str]) {
        *self.fragments.lock().unwrap() = fragments.iter().map(|f| f.to_string()).collect();
    }

    /// Error delivered after the scripted fragments
    pub fn fail_mid_stream(&self, message: &str) {
        *self.mid_stream_error.lock().unwrap() = Some(message.to_string());
    }

    /// Error returned before any fragment
    pub fn fail_open(&self, error: GenerationError) {
        *self.open_error.lock().unwrap() = Some(error);
    }

    pub fn set_summary(&self, summary: Result<String, GenerationError>) {
        *self.summary.lock().unwrap() = summary;
    }

    pub fn generate_count(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn summarize_count(&self) -> usize {
        self.summarize_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationModel for ScriptedModel {
    async fn classify(&self, _text: &str) -> Result<RoutingDecision, GenerationError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.decision
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| GenerationError::malformed("scripted classification failure"))
    }

    async fn generate_stream(
        &self,
        _text: &str,
        context: Option<&str>,
    ) -> Result<FragmentStream, GenerationError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(context.map(str::to_string));
        if let Some(error) = self.open_error.lock().unwrap().clone() {
            return Err(error);
        }

        let mut items: Vec<Result<String, GenerationError>> = self
            .fragments
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(Ok)
            .collect();
        if let Some(message) = self.mid_stream_error.lock().unwrap().clone() {
            items.push(Err(GenerationError::failed(message)));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn summarize(&self, _text: &str, _reply: &str) -> Result<String, GenerationError> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        self.summary.lock().unwrap().clone()
    }
}

/// Memory collaborator that records every call
pub struct RecordingMemory {
    context: Mutex<String>,
    pub retrievals: Mutex<Vec<(String, String)>>,
    pub stored: Mutex<Vec<(String, String)>>,
    fail_store: Mutex<bool>,
}

impl RecordingMemory {
    pub fn new() -> Self {
        Self {
            context: Mutex::new(String::new()),
            retrievals: Mutex::new(Vec::new()),
            stored: Mutex::new(Vec::new()),
            fail_store: Mutex::new(false),
        }
    }

    pub fn set_context(&self, context: &str) {
        *self.context.lock().unwrap() = context.to_string();
    }

    pub fn fail_writes(&self) {
        *self.fail_store.lock().unwrap() = true;
    }

    pub fn retrieval_count(&self) -> usize {
        self.retrievals.lock().unwrap().len()
    }

    pub fn stored_contents(&self) -> Vec<String> {
        self.stored
            .lock()
            .unwrap()
            .iter()
            .map(|(_, content)| content.clone())
            .collect()
    }
}

#[async_trait]
impl MemoryBackend for RecordingMemory {
    async fn retrieve(&self, owner: &str, query: &str) -> Result<String, MemoryError> {
        self.retrievals
            .lock()
            .unwrap()
            .push((owner.to_string(), query.to_string()));
        Ok(self.context.lock().unwrap().clone())
    }

    async fn store(&self, owner: &str, content: &str) -> Result<(), MemoryError> {
        if *self.fail_store.lock().unwrap() {
            return Err(MemoryError::StorageFailed {
                operation: "store".to_string(),
                source: std::io::Error::other("scripted write failure"),
            });
        }
        self.stored
            .lock()
            .unwrap()
            .push((owner.to_string(), content.to_string()));
        Ok(())
    }

    async fn list(&self, owner: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        Ok(self
            .stored
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|(o, _)| o == owner)
            .map(|(_, content)| MemoryEntry::new(content.clone(), t0()))
            .collect())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Archival collaborator returning one reflection, or failing
pub struct FixedReflector {
    reflection: Mutex<Option<Reflection>>,
    pub calls: AtomicUsize,
    pub transcripts: Mutex<Vec<Vec<TurnRecord>>>,
}

impl FixedReflector {
    pub fn new() -> Self {
        Self {
            reflection: Mutex::new(Some(Reflection::new(
                "Morning Chat",
                "A short and warm exchange.",
                "warm",
            ))),
            calls: AtomicUsize::new(0),
            transcripts: Mutex::new(Vec::new()),
        }
    }

    pub fn fail(&self) {
        *self.reflection.lock().unwrap() = None;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reflector for FixedReflector {
    async fn reflect(&self, transcript: &[TurnRecord]) -> Result<Reflection, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transcripts.lock().unwrap().push(transcript.to_vec());
        self.reflection
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| GenerationError::failed("scripted reflection failure"))
    }
}

/// An engine wired to scripted collaborators
pub struct Harness {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryStore>,
    pub model: Arc<ScriptedModel>,
    pub memory: Arc<RecordingMemory>,
    pub reflector: Arc<FixedReflector>,
    pub outcomes: mpsc::UnboundedReceiver<ConsolidationOutcome>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config {
            persist: false,
            ..Config::default()
        })
    }

    pub fn with_config(config: Config) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(InMemoryStore::new());
        let model = Arc::new(ScriptedModel::new());
        let memory = Arc::new(RecordingMemory::new());
        let reflector = Arc::new(FixedReflector::new());
        let (tx, outcomes) = mpsc::unbounded_channel();

        let context = ServiceContext::new(
            config,
            store.clone(),
            model.clone(),
            memory.clone(),
            reflector.clone(),
            clock.clone(),
        );
        let engine = Engine::with_consolidation_outcomes(context, tx);

        Self {
            engine,
            clock,
            store,
            model,
            memory,
            reflector,
            outcomes,
        }
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(Duration::minutes(minutes));
    }

    /// Next consolidation outcome, failing the test if none arrives
    pub async fn next_outcome(&mut self) -> ConsolidationOutcome {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.outcomes.recv())
            .await
            .expect("consolidation outcome timed out")
            .expect("outcome channel closed")
    }
}
