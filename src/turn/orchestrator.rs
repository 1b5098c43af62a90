//! Turn pipeline: admission, routing, retrieval, generation, consolidation
//!
//! `submit_turn` does everything that can refuse a turn up front and returns
//! as soon as a reply is ready to stream. The reply itself is pumped by a
//! spawned task so the caller sees fragments as they arrive.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::generation::{
    ConversationModel, FragmentStream, GenerationError, RoutingDecision, generic_one_liner,
};
use crate::memory::MemoryBackend;
use crate::quota::QuotaTracker;
use crate::session::{Role, SessionManager};
use crate::turn::consolidator::{ConsolidationJob, MemoryConsolidator, SummarySource};
use crate::turn::fragment::{Fragment, TurnStream, split_answer};
use crate::turn::router::{GateReason, TurnRouter};
use crate::turn::TurnError;

/// Fragments buffered between the producer and a slow reader
const FRAGMENT_BUFFER: usize = 32;

/// An admitted turn
#[derive(Debug)]
pub struct AcceptedTurn {
    pub session_id: String,
    /// Messages left today after this one; `None` when unbounded
    pub remaining_messages: Option<u64>,
    /// Why retrieval ran, if it did
    pub gate: Option<GateReason>,
    pub fragments: TurnStream,
}

/// Where the reply text comes from
enum ReplySource {
    Standalone(String),
    Model(FragmentStream),
}

pub struct TurnOrchestrator {
    sessions: Arc<SessionManager>,
    quota: Arc<QuotaTracker>,
    router: TurnRouter,
    model: Arc<dyn ConversationModel>,
    memory: Arc<dyn MemoryBackend>,
    consolidator: Arc<MemoryConsolidator>,
    max_turns_per_session: Option<u32>,
}

impl TurnOrchestrator {
    pub fn new(
        sessions: Arc<SessionManager>,
        quota: Arc<QuotaTracker>,
        router: TurnRouter,
        model: Arc<dyn ConversationModel>,
        memory: Arc<dyn MemoryBackend>,
        consolidator: Arc<MemoryConsolidator>,
    ) -> Self {
        Self {
            sessions,
            quota,
            router,
            model,
            memory,
            consolidator,
            max_turns_per_session: None,
        }
    }

    /// Caps the number of user turns in one session
    pub fn with_max_turns_per_session(mut self, limit: Option<u32>) -> Self {
        self.max_turns_per_session = limit;
        self
    }

    pub async fn submit_turn(
        &self,
        user_id: &str,
        session_id: &str,
        text: &str,
    ) -> Result<AcceptedTurn, TurnError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TurnError::EmptyTurn);
        }

        let session = self.sessions.validate(user_id, session_id).await?;

        if let Some(limit) = self.max_turns_per_session {
            let user_turns = session.transcript.iter().filter(|t| t.is_user()).count();
            if user_turns >= limit as usize {
                return Err(TurnError::SessionTurnLimit { limit });
            }
        }

        let admitted = match self.quota.increment_messages(user_id).await? {
            Ok(check) => check,
            Err(denial) => {
                info!(user_id = %user_id, %denial, "Turn refused by quota");
                return Err(TurnError::QuotaExceeded(denial));
            }
        };

        let decision = self.router.route(text).await;
        let gate = self.router.gate(&decision);
        let context = match gate {
            Some(_) => self.retrieve_context(user_id, text).await,
            None => None,
        };

        let source = match self.open_reply(text, &decision, gate, context.as_deref()).await {
            Ok(source) => source,
            Err(e) => {
                self.refund(user_id).await;
                return Err(match e {
                    GenerationError::Overloaded { attempts } => {
                        warn!(user_id = %user_id, attempts, "Generation overloaded");
                        TurnError::Overloaded
                    }
                    GenerationError::Failed { message } => TurnError::GenerationFailed { message },
                    other => TurnError::GenerationFailed {
                        message: other.to_string(),
                    },
                });
            }
        };

        if let Err(e) = self
            .sessions
            .add_message(session_id, Role::User, text)
            .await
        {
            self.refund(user_id).await;
            return Err(e.into());
        }

        let summary = match gate {
            Some(_) => SummarySource::Regenerate,
            None => SummarySource::Candidate(
                decision
                    .memory_one_liner
                    .clone()
                    .unwrap_or_else(|| generic_one_liner(text)),
            ),
        };

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        let pump = ReplyPump {
            sessions: Arc::clone(&self.sessions),
            consolidator: Arc::clone(&self.consolidator),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            text: text.to_string(),
            summary,
        };
        tokio::spawn(pump.run(source, tx));

        Ok(AcceptedTurn {
            session_id: session_id.to_string(),
            remaining_messages: admitted.remaining(),
            gate,
            fragments: TurnStream::new(rx),
        })
    }

    /// Empty or failed retrieval means "no context"
    async fn retrieve_context(&self, user_id: &str, text: &str) -> Option<String> {
        match self.memory.retrieve(user_id, text).await {
            Ok(context) if !context.trim().is_empty() => {
                debug!(user_id = %user_id, chars = context.len(), "Retrieved memory context");
                Some(context)
            }
            Ok(_) => {
                debug!(user_id = %user_id, "No memory context available");
                None
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Memory retrieval failed, continuing without context");
                None
            }
        }
    }

    async fn open_reply(
        &self,
        text: &str,
        decision: &RoutingDecision,
        gate: Option<GateReason>,
        context: Option<&str>,
    ) -> Result<ReplySource, GenerationError> {
        if gate.is_none() {
            if let Some(answer) = &decision.standalone_answer {
                debug!("Using standalone answer, generation skipped");
                return Ok(ReplySource::Standalone(answer.clone()));
            }
        }
        let stream = self.model.generate_stream(text, context).await?;
        Ok(ReplySource::Model(stream))
    }

    async fn refund(&self, user_id: &str) {
        if let Err(e) = self.quota.release_message(user_id).await {
            warn!(user_id = %user_id, error = %e, "Failed to refund message quota");
        }
    }
}

/// Moves fragments to the caller, then records the reply
struct ReplyPump {
    sessions: Arc<SessionManager>,
    consolidator: Arc<MemoryConsolidator>,
    user_id: String,
    session_id: String,
    text: String,
    summary: SummarySource,
}

impl ReplyPump {
    async fn run(self, source: ReplySource, tx: mpsc::Sender<Fragment>) {
        let mut reply = String::new();
        let mut connected = true;

        match source {
            ReplySource::Standalone(answer) => {
                for word in split_answer(&answer) {
                    reply.push_str(&word);
                    if tx.send(Fragment::Text(word)).await.is_err() {
                        connected = false;
                        break;
                    }
                }
            }
            ReplySource::Model(mut stream) => loop {
                let item = tokio::select! {
                    _ = tx.closed() => {
                        connected = false;
                        break;
                    }
                    item = stream.next() => item,
                };
                match item {
                    Some(Ok(piece)) => {
                        reply.push_str(&piece);
                        if tx.send(Fragment::Text(piece)).await.is_err() {
                            connected = false;
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Fragment::Error(e.to_string())).await;
                        break;
                    }
                    None => break,
                }
            },
        }

        let reply = reply.trim().to_string();
        if !reply.is_empty() {
            if let Err(e) = self
                .sessions
                .add_message(&self.session_id, Role::Assistant, reply.clone())
                .await
            {
                warn!(session_id = %self.session_id, error = %e, "Assistant turn not recorded");
            }
        }

        if !connected {
            info!(session_id = %self.session_id, "Caller disconnected, generation abandoned");
            return;
        }

        self.consolidator
            .enqueue(ConsolidationJob {
                user_id: self.user_id,
                text: self.text,
                reply,
                summary: self.summary,
            })
            .await;
        let _ = tx.send(Fragment::End).await;
    }
}
