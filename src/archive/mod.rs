//! Session archives
//!
//! When a session closes its transcript is handed here, turned into a short
//! reflection and stored as an immutable record owned by the user.

pub mod reflector;
pub mod service;
pub mod types;

pub use reflector::{ModelReflector, Reflector, parse_reflection};
pub use service::{ArchiveService, DEFAULT_ARCHIVE_LIMIT};
pub use types::{ArchiveRecord, ArchiveSummary, Reflection};
