//! In-process memory backend, lost on restart

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::memory::ranker::{DEFAULT_CONTEXT_LIMIT, rank, render_context};
use crate::memory::{MemoryBackend, MemoryEntry, MemoryError};

/// Maximum entries kept per owner; the oldest are dropped first
pub const MAX_VOLATILE_ENTRIES: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct VolatileMemory {
    entries: Arc<RwLock<HashMap<String, Vec<MemoryEntry>>>>,
}

impl VolatileMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, owner: &str) -> usize {
        self.entries
            .read()
            .await
            .get(owner)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MemoryBackend for VolatileMemory {
    async fn retrieve(&self, owner: &str, query: &str) -> Result<String, MemoryError> {
        let guard = self.entries.read().await;
        let Some(entries) = guard.get(owner) else {
            return Ok(String::new());
        };
        Ok(render_context(&rank(entries, query, DEFAULT_CONTEXT_LIMIT)))
    }

    async fn store(&self, owner: &str, content: &str) -> Result<(), MemoryError> {
        let content = content.split_whitespace().collect::<Vec<_>>().join(" ");
        if content.is_empty() {
            return Err(MemoryError::InvalidContent(
                "Content cannot be empty".to_string(),
            ));
        }

        let mut guard = self.entries.write().await;
        let entries = guard.entry(owner.to_string()).or_default();
        entries.push(MemoryEntry::new(content, Utc::now()));
        if entries.len() > MAX_VOLATILE_ENTRIES {
            let excess = entries.len() - MAX_VOLATILE_ENTRIES;
            entries.drain(..excess);
        }
        Ok(())
    }

    async fn list(&self, owner: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        let mut entries = self
            .entries
            .read()
            .await
            .get(owner)
            .cloned()
            .unwrap_or_default();
        entries.reverse();
        Ok(entries)
    }

    fn name(&self) -> &'static str {
        "volatile"
    }
}
