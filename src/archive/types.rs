use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable reflective summary of one ended session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub archive_id: String,
    pub user_id: String,
    pub session_id: String,
    pub title: String,
    pub reflection: String,
    pub emotion_tag: String,
    pub created_at: DateTime<Utc>,
}

/// Public fields of an archive, as returned by `end_session` and listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveSummary {
    pub archive_id: String,
    pub title: String,
    pub reflection: String,
    pub emotion_tag: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ArchiveRecord> for ArchiveSummary {
    fn from(record: &ArchiveRecord) -> Self {
        Self {
            archive_id: record.archive_id.clone(),
            title: record.title.clone(),
            reflection: record.reflection.clone(),
            emotion_tag: record.emotion_tag.clone(),
            created_at: record.created_at,
        }
    }
}

/// The triple produced by the archival collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reflection {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub reflection: String,
    #[serde(default = "default_emotion")]
    pub emotion_tag: String,
}

fn default_title() -> String {
    "Untitled".to_string()
}

fn default_emotion() -> String {
    "neutral".to_string()
}

impl Reflection {
    pub fn new(
        title: impl Into<String>,
        reflection: impl Into<String>,
        emotion_tag: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            reflection: reflection.into(),
            emotion_tag: emotion_tag.into(),
        }
    }

    /// Used when the transcript has no turns
    pub fn quiet() -> Self {
        Self::new(
            "Quiet Moments",
            "Silence can be as meaningful as words.",
            "peaceful",
        )
    }

    /// Used when reflection generation fails
    pub fn fallback() -> Self {
        Self::new(
            "A Moment of Connection",
            "Every conversation leaves a mark. This one matters.",
            "reflective",
        )
    }
}
