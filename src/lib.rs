//! nex: turn orchestration and session lifecycle engine
//!
//! Admits user turns against per-tier quotas, decides per turn whether
//! long-term memory is needed, streams the reply, and consolidates a summary
//! back into memory off the response path. Sessions end explicitly, by
//! supersession or by inactivity, and each produces one reflective archive.

pub mod archive;
pub mod config;
pub mod engine;
pub mod generation;
pub mod memory;
pub mod providers;
pub mod quota;
pub mod session;
pub mod store;
pub mod turn;
pub mod utils;

pub use engine::{Engine, ServiceContext};
