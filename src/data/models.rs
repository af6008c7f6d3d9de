//! Data models for watched repositories and path status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::git::UserCommand;

/// A git-annex repository under watch.
///
/// Identity is the repository's `annex.uuid`; two values with the same UUID
/// are the same repository even if the path moved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedRepository {
    pub uuid: Uuid,
    pub path: PathBuf,
}

impl WatchedRepository {
    pub fn new(uuid: Uuid, path: PathBuf) -> Self {
        Self { uuid, path }
    }
}

impl PartialEq for WatchedRepository {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for WatchedRepository {}

impl Hash for WatchedRepository {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

/// Whether a path's content is in the local repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresentStatus {
    Present,
    Absent,
    PartiallyPresent,
}

impl PresentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresentStatus::Present => "present",
            PresentStatus::Absent => "absent",
            PresentStatus::PartiallyPresent => "partial",
        }
    }

    /// Combine two siblings: equal values stay, anything mixed is partial
    pub fn and(self, other: PresentStatus) -> PresentStatus {
        match (self, other) {
            (PresentStatus::Present, PresentStatus::Present) => PresentStatus::Present,
            (PresentStatus::Absent, PresentStatus::Absent) => PresentStatus::Absent,
            _ => PresentStatus::PartiallyPresent,
        }
    }
}

impl FromStr for PresentStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "present" => Ok(PresentStatus::Present),
            "absent" => Ok(PresentStatus::Absent),
            "partial" => Ok(PresentStatus::PartiallyPresent),
            _ => Err(()),
        }
    }
}

/// Whether a path has at least `numcopies` copies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnoughCopies {
    Enough,
    Lacking,
}

impl EnoughCopies {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnoughCopies::Enough => "enough",
            EnoughCopies::Lacking => "lacking",
        }
    }

    pub fn from_counts(copies: u32, required: u32) -> Self {
        if copies >= required {
            EnoughCopies::Enough
        } else {
            EnoughCopies::Lacking
        }
    }

    pub fn and(self, other: EnoughCopies) -> EnoughCopies {
        match self {
            EnoughCopies::Enough => other,
            EnoughCopies::Lacking => EnoughCopies::Lacking,
        }
    }
}

impl FromStr for EnoughCopies {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "enough" => Ok(EnoughCopies::Enough),
            "lacking" => Ok(EnoughCopies::Lacking),
            _ => Err(()),
        }
    }
}

/// Stored status of one path in one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Path relative to the repository root, `.` for the root
    pub path: String,
    pub present: Option<PresentStatus>,
    pub enough_copies: Option<EnoughCopies>,
    pub number_of_copies: Option<u32>,
    pub is_tracked: bool,
    /// git-annex key, files only
    pub content_key: Option<String>,
    pub is_dir: bool,
    /// Set while a directory still has to be (re)aggregated
    pub needs_update: bool,
    pub last_modified: DateTime<Utc>,
}

impl StatusRecord {
    /// A fully computed annexed file
    pub fn file(
        path: impl Into<String>,
        present: PresentStatus,
        enough_copies: EnoughCopies,
        number_of_copies: u32,
        content_key: Option<String>,
    ) -> Self {
        Self {
            path: path.into(),
            present: Some(present),
            enough_copies: Some(enough_copies),
            number_of_copies: Some(number_of_copies),
            is_tracked: true,
            content_key,
            is_dir: false,
            needs_update: false,
            last_modified: Utc::now(),
        }
    }

    /// A file git-annex does not manage
    pub fn untracked(path: impl Into<String>, is_dir: bool) -> Self {
        Self {
            path: path.into(),
            present: None,
            enough_copies: None,
            number_of_copies: None,
            is_tracked: false,
            content_key: None,
            is_dir,
            needs_update: false,
            last_modified: Utc::now(),
        }
    }

    /// A directory that still needs aggregation
    pub fn directory_placeholder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            present: None,
            enough_copies: None,
            number_of_copies: None,
            is_tracked: true,
            content_key: None,
            is_dir: true,
            needs_update: true,
            last_modified: Utc::now(),
        }
    }

    /// Status fields are known and no update is pending
    pub fn is_resolved(&self) -> bool {
        !self.needs_update && self.present.is_some() && self.enough_copies.is_some()
    }
}

/// A user command waiting to be run by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub id: i64,
    pub repo_uuid: Uuid,
    pub path: String,
    pub command: UserCommand,
    pub created_at: DateTime<Utc>,
}
