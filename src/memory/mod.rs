//! Long-term memory collaborator
//!
//! The turn pipeline depends only on [`MemoryBackend`]. The concrete backend
//! is chosen from configuration when the service context is built:
//! - `file`: per-user Markdown log with keyword ranking
//! - `volatile`: in-process, for development and tests
//! - `disabled`: retrieves nothing and drops writes

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod file;
pub mod ranker;
pub mod types;
pub mod volatile;

pub use file::FileMemory;
pub use types::{MemoryEntry, MemoryError, MemoryListing};
pub use volatile::VolatileMemory;

#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Context relevant to `query`; an empty string means nothing relevant
    async fn retrieve(&self, owner: &str, query: &str) -> Result<String, MemoryError>;

    /// Appends one fact about the owner
    async fn store(&self, owner: &str, content: &str) -> Result<(), MemoryError>;

    /// All stored facts, newest first
    async fn list(&self, owner: &str) -> Result<Vec<MemoryEntry>, MemoryError>;

    /// Backend name, used for logging
    fn name(&self) -> &'static str;

    /// False when writes are discarded, so callers skip the memory quota
    fn accepts_writes(&self) -> bool {
        true
    }
}

/// Backend that remembers nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledMemory;

#[async_trait]
impl MemoryBackend for DisabledMemory {
    async fn retrieve(&self, _owner: &str, _query: &str) -> Result<String, MemoryError> {
        Ok(String::new())
    }

    async fn store(&self, owner: &str, _content: &str) -> Result<(), MemoryError> {
        tracing::debug!(owner = %owner, "Memory disabled, dropping write");
        Ok(())
    }

    async fn list(&self, _owner: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }

    fn accepts_writes(&self) -> bool {
        false
    }
}

/// Backend selection, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryBackendConfig {
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dir: Option<PathBuf>,
    },
    Volatile,
    Disabled,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        MemoryBackendConfig::File { dir: None }
    }
}

impl MemoryBackendConfig {
    pub fn backend_type(&self) -> &'static str {
        match self {
            MemoryBackendConfig::File { .. } => "file",
            MemoryBackendConfig::Volatile => "volatile",
            MemoryBackendConfig::Disabled => "disabled",
        }
    }

    /// Builds the backend; `default_dir` is used when a file backend has no dir
    pub fn build(&self, default_dir: PathBuf) -> Arc<dyn MemoryBackend> {
        match self {
            MemoryBackendConfig::File { dir } => {
                Arc::new(FileMemory::new(dir.clone().unwrap_or(default_dir)))
            }
            MemoryBackendConfig::Volatile => Arc::new(VolatileMemory::new()),
            MemoryBackendConfig::Disabled => Arc::new(DisabledMemory),
        }
    }
}
