//! File-backed long-term memory
//!
//! Each user gets one Markdown file, `<dir>/<stem>.md`, holding dated
//! sections (`## YYYY-MM-DD`) of bullet entries with an `(added at ...)`
//! timestamp suffix. Files are created with 0600 permissions. The stem is the
//! owner id with every byte outside `[A-Za-z0-9_-]` written as `%XX`, so
//! distinct owners never share a file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::Mutex;

use crate::memory::ranker::{DEFAULT_CONTEXT_LIMIT, rank, render_context};
use crate::memory::{MemoryBackend, MemoryEntry, MemoryError};

/// Size above which a memory file triggers a maintenance warning (1MB)
const MEMORY_FILE_SIZE_LIMIT: u64 = 1024 * 1024;

/// Timestamp format suffix in memory entries: "(added at YYYY-MM-DDTHH:MM:SSZ)"
const TIMESTAMP_SUFFIX: &str = "(added at ";

#[derive(Debug, Clone)]
pub struct FileMemory {
    dir: PathBuf,
    /// One write lock per owner file
    write_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl FileMemory {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            write_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the owner's memory file
    pub fn file_for(&self, owner: &str) -> Result<PathBuf, MemoryError> {
        let stem = owner_file_stem(owner)?;
        Ok(self.dir.join(format!("{}.md", stem)))
    }

    async fn lock_for(&self, stem: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        Arc::clone(locks.entry(stem.to_string()).or_default())
    }

    async fn ensure_exists(&self, path: &Path) -> Result<(), MemoryError> {
        if path.exists() {
            return Ok(());
        }

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| MemoryError::StorageFailed {
                operation: format!("create memory directory {}", self.dir.display()),
                source: e,
            })?;

        fs::write(path, "# Memory\n")
            .await
            .map_err(|e| MemoryError::StorageFailed {
                operation: format!("create memory file {}", path.display()),
                source: e,
            })?;
        set_owner_only(path)?;

        tracing::info!(file = %path.display(), "Created memory file");
        Ok(())
    }

    /// Appends an entry under the section for its date
    pub async fn append_entry(
        &self,
        owner: &str,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<(), MemoryError> {
        let content = content.split_whitespace().collect::<Vec<_>>().join(" ");
        if content.is_empty() {
            return Err(MemoryError::InvalidContent(
                "Content cannot be empty".to_string(),
            ));
        }
        let stem = owner_file_stem(owner)?;
        let path = self.dir.join(format!("{}.md", stem));

        let lock = self.lock_for(&stem).await;
        let _guard = lock.lock().await;

        self.ensure_exists(&path).await?;
        check_file_size(&path).await;

        let existing = fs::read_to_string(&path)
            .await
            .map_err(|e| MemoryError::StorageFailed {
                operation: format!("read memory file {}", path.display()),
                source: e,
            })?;

        let header = format!("## {}", at.format("%Y-%m-%d"));
        let entry_line = format!("- {} {}{})\n", content, TIMESTAMP_SUFFIX, at.to_rfc3339());
        let updated = insert_entry(&existing, &header, &entry_line);

        fs::write(&path, updated)
            .await
            .map_err(|e| MemoryError::StorageFailed {
                operation: format!("write memory file {}", path.display()),
                source: e,
            })?;

        tracing::debug!(file = %path.display(), "Added memory entry");
        Ok(())
    }

    /// Every entry in the owner's file, in file order
    pub async fn read_entries(&self, owner: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        let path = self.file_for(owner)?;
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| MemoryError::StorageFailed {
                operation: format!("read memory file {}", path.display()),
                source: e,
            })?;
        Ok(parse_memory_content(&content))
    }
}

#[async_trait]
impl MemoryBackend for FileMemory {
    async fn retrieve(&self, owner: &str, query: &str) -> Result<String, MemoryError> {
        let entries = self.read_entries(owner).await?;
        Ok(render_context(&rank(&entries, query, DEFAULT_CONTEXT_LIMIT)))
    }

    async fn store(&self, owner: &str, content: &str) -> Result<(), MemoryError> {
        self.append_entry(owner, content, Utc::now()).await
    }

    async fn list(&self, owner: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        let mut entries = self.read_entries(owner).await?;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Maps an owner id to a file stem, one-to-one
fn owner_file_stem(owner: &str) -> Result<String, MemoryError> {
    if owner.trim().is_empty() {
        return Err(MemoryError::InvalidOwner(owner.to_string()));
    }

    let mut stem = String::with_capacity(owner.len());
    for byte in owner.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    Ok(stem)
}

/// Adds `entry_line` to the end of the `header` section, creating it if needed
fn insert_entry(existing: &str, header: &str, entry_line: &str) -> String {
    let mut lines: Vec<&str> = existing.lines().collect();
    let Some(start) = lines.iter().position(|l| *l == header) else {
        return format!("{}\n\n{}\n{}", existing.trim_end(), header, entry_line);
    };

    let mut end = start + 1;
    while end < lines.len() && !lines[end].starts_with("## ") {
        end += 1;
    }
    // Step back over trailing blank lines of the section
    while end > start + 1 && lines[end - 1].trim().is_empty() {
        end -= 1;
    }
    let entry = entry_line.trim_end();
    lines.insert(end, entry);
    format!("{}\n", lines.join("\n"))
}

fn parse_memory_content(content: &str) -> Vec<MemoryEntry> {
    let mut entries = Vec::new();
    let mut in_section = false;

    for line in content.lines() {
        if line.starts_with("## ") {
            in_section = true;
        } else if let Some(entry) = line.strip_prefix("- ") {
            if in_section {
                entries.push(parse_entry_line(entry));
            }
        }
    }
    entries
}

/// Parses "Content (added at 2026-02-16T10:30:00+00:00)"
fn parse_entry_line(line: &str) -> MemoryEntry {
    let line = line.trim();
    if let Some(start) = line.rfind(TIMESTAMP_SUFFIX) {
        let rest = &line[start + TIMESTAMP_SUFFIX.len()..];
        if let Some(end) = rest.find(')') {
            if let Ok(timestamp) = DateTime::parse_from_rfc3339(&rest[..end]) {
                return MemoryEntry::new(line[..start].trim(), timestamp.with_timezone(&Utc));
            }
        }
    }
    MemoryEntry::new(line, DateTime::<Utc>::default())
}

async fn check_file_size(path: &Path) {
    if let Ok(metadata) = fs::metadata(path).await {
        if metadata.len() > MEMORY_FILE_SIZE_LIMIT {
            tracing::warn!(
                file = %path.display(),
                size = metadata.len(),
                limit = MEMORY_FILE_SIZE_LIMIT,
                "Memory file exceeds size limit"
            );
        }
    }
}

fn set_owner_only(path: &Path) -> Result<(), MemoryError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms).map_err(|e| MemoryError::StorageFailed {
            operation: format!("set file permissions for {}", path.display()),
            source: e,
        })?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
