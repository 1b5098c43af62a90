//! Turn router and memory gate
//!
//! One classification call per turn. Retrieval is selective: it only runs
//! when the gate fires, so most turns skip the memory round-trip.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::generation::{ConversationModel, RoutingDecision};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Why the memory gate fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateReason {
    NeedsPastMemory,
    LowConfidence,
    NeedsBroaderContext,
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateReason::NeedsPastMemory => write!(f, "needs_past_memory"),
            GateReason::LowConfidence => write!(f, "low_confidence"),
            GateReason::NeedsBroaderContext => write!(f, "needs_broader_context"),
        }
    }
}

pub struct TurnRouter {
    model: Arc<dyn ConversationModel>,
    confidence_threshold: f32,
}

impl TurnRouter {
    pub fn new(model: Arc<dyn ConversationModel>) -> Self {
        Self {
            model,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Classifies the turn. A failed classification never blocks the turn.
    pub async fn route(&self, text: &str) -> RoutingDecision {
        match self.model.classify(text).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "Classification failed, using conservative fallback");
                RoutingDecision::fallback(text)
            }
        }
    }

    /// First matching criterion wins; `None` means answer without memory
    pub fn gate(&self, decision: &RoutingDecision) -> Option<GateReason> {
        let reason = if decision.needs_past_memory {
            Some(GateReason::NeedsPastMemory)
        } else if decision
            .confidence
            .is_some_and(|c| c < self.confidence_threshold)
        {
            Some(GateReason::LowConfidence)
        } else if decision.needs_broader_context {
            Some(GateReason::NeedsBroaderContext)
        } else {
            None
        };

        match reason {
            Some(reason) => debug!(%reason, "Memory gate fired"),
            None => debug!("Memory gate skipped retrieval"),
        }
        reason
    }
}
