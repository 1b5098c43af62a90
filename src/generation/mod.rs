//! Generation collaborator
//!
//! Wraps a raw LLM provider with the three calls the turn pipeline needs
//! (classify, stream a reply, summarize) and owns retry with backoff, so
//! transient provider trouble is either absorbed or reported as overload.

pub mod error;
pub mod model;
pub mod prompts;
pub mod retry;
pub mod routing;

pub use error::GenerationError;
pub use model::{ConversationModel, FragmentStream, LlmConversationModel, ModelSelection};
pub use retry::RetryPolicy;
pub use routing::{RoutingDecision, generic_one_liner, parse_routing_decision};
