//! Turn orchestration
//!
//! Router and memory gate, the reply fragment stream, background memory
//! consolidation, and the orchestrator tying them to sessions and quota.

pub mod consolidator;
pub mod error;
pub mod fragment;
pub mod orchestrator;
pub mod router;

pub use consolidator::{ConsolidationJob, ConsolidationOutcome, MemoryConsolidator, SummarySource};
pub use error::TurnError;
pub use fragment::{END_MARKER, Fragment, TurnStream, split_answer};
pub use orchestrator::{AcceptedTurn, TurnOrchestrator};
pub use router::{DEFAULT_CONFIDENCE_THRESHOLD, GateReason, TurnRouter};
