use crate::archive::ArchiveRecord;
use crate::quota::UserQuotaRecord;
use crate::session::SessionRecord;
use anyhow::{Context, Result};
use serde::{Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info};

const USERS_FILE: &str = "users.json";
const SESSIONS_FILE: &str = "sessions.json";
const ARCHIVES_FILE: &str = "archives.json";

/// Everything the in-memory store holds, in serializable form
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub users: Vec<UserQuotaRecord>,
    pub sessions: Vec<SessionRecord>,
    pub archives: Vec<ArchiveRecord>,
}

/// Reads and writes store snapshots as one JSON file per collection
pub struct SnapshotPersistence {
    pub data_dir: PathBuf,
}

impl SnapshotPersistence {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub async fn create_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            fs::create_dir_all(&self.data_dir)
                .await
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let permissions = std::fs::Permissions::from_mode(0o700);
                fs::set_permissions(&self.data_dir, permissions)
                    .await
                    .with_context(|| format!("Failed to set permissions on: {:?}", self.data_dir))?;
            }

            info!("Created data directory: {:?}", self.data_dir);
        }
        Ok(())
    }

    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        self.create_data_dir().await?;
        self.write_collection(USERS_FILE, &snapshot.users).await?;
        self.write_collection(SESSIONS_FILE, &snapshot.sessions).await?;
        self.write_collection(ARCHIVES_FILE, &snapshot.archives).await?;
        debug!(
            users = snapshot.users.len(),
            sessions = snapshot.sessions.len(),
            archives = snapshot.archives.len(),
            "Saved store snapshot"
        );
        Ok(())
    }

    /// Loads whatever collections exist. A corrupted file is moved aside and
    /// its collection starts empty.
    pub async fn load(&self) -> Result<Snapshot> {
        let snapshot = Snapshot {
            users: self.read_collection(USERS_FILE).await?,
            sessions: self.read_collection(SESSIONS_FILE).await?,
            archives: self.read_collection(ARCHIVES_FILE).await?,
        };
        info!(
            users = snapshot.users.len(),
            sessions = snapshot.sessions.len(),
            archives = snapshot.archives.len(),
            "Loaded store snapshot from {:?}",
            self.data_dir
        );
        Ok(snapshot)
    }

    async fn write_collection<T: Serialize>(&self, name: &str, items: &[T]) -> Result<()> {
        let file_path = self.data_dir.join(name);
        let json = serde_json::to_string_pretty(items)
            .with_context(|| format!("Failed to serialize {}", name))?;

        fs::write(&file_path, json)
            .await
            .with_context(|| format!("Failed to write snapshot file: {:?}", file_path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            fs::set_permissions(&file_path, permissions)
                .await
                .with_context(|| format!("Failed to set permissions on: {:?}", file_path))?;
        }

        Ok(())
    }

    async fn read_collection<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let file_path = self.data_dir.join(name);

        match fs::read_to_string(&file_path).await {
            Ok(json) => match serde_json::from_str::<Vec<T>>(&json) {
                Ok(items) => Ok(items),
                Err(e) => {
                    error!("Failed to parse {}: {}", name, e);
                    self.handle_corrupted_file(&file_path).await?;
                    Ok(Vec::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read snapshot file: {:?}", file_path))
            }
        }
    }

    async fn handle_corrupted_file(&self, file_path: &Path) -> Result<()> {
        let corrupted_path = file_path.with_extension("json.corrupted");

        fs::rename(file_path, &corrupted_path)
            .await
            .with_context(|| format!("Failed to rename corrupted file: {:?}", file_path))?;

        error!(
            "Corrupted snapshot file detected. Moved {:?} to {:?}",
            file_path, corrupted_path
        );
        Ok(())
    }
}
