//! Activity ledger entries
//!
//! The activity ledger is the user-facing audit trail of what the engine did
//! to each file. Entries are immutable once created.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Kinds of recorded activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    /// A remote change was written locally
    Download,
    /// A new local file was uploaded
    Upload,
    /// An existing remote file received new content
    Update,
    /// A file was renamed or moved
    Rename,
    /// A file was deleted locally or trashed remotely
    Delete,
    /// A conflict was detected or resolved
    Conflict,
    /// A duplicate or variant file was reconciled
    Cleanup,
    /// A file was skipped by exclusion rules
    Skip,
    /// A full re-sync ran
    Resync,
    /// The engine was paused or resumed
    Pause,
    /// A per-file operation failed
    Error,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Download => "download",
            ActivityAction::Upload => "upload",
            ActivityAction::Update => "update",
            ActivityAction::Rename => "rename",
            ActivityAction::Delete => "delete",
            ActivityAction::Conflict => "conflict",
            ActivityAction::Cleanup => "cleanup",
            ActivityAction::Skip => "skip",
            ActivityAction::Resync => "resync",
            ActivityAction::Pause => "pause",
            ActivityAction::Error => "error",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s {
            "download" => ActivityAction::Download,
            "upload" => ActivityAction::Upload,
            "update" => ActivityAction::Update,
            "rename" => ActivityAction::Rename,
            "delete" => ActivityAction::Delete,
            "conflict" => ActivityAction::Conflict,
            "cleanup" => ActivityAction::Cleanup,
            "skip" => ActivityAction::Skip,
            "resync" => ActivityAction::Resync,
            "pause" => ActivityAction::Pause,
            "error" => ActivityAction::Error,
            other => {
                return Err(DomainError::UnknownVariant {
                    kind: "activity action",
                    value: other.to_string(),
                })
            }
        };
        Ok(action)
    }
}

/// One immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    id: u64,
    timestamp: DateTime<Utc>,
    action: ActivityAction,
    path: String,
    detail: String,
    error: Option<String>,
}

impl ActivityLogEntry {
    pub fn new(
        id: u64,
        timestamp: DateTime<Utc>,
        action: ActivityAction,
        path: impl Into<String>,
        detail: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            id,
            timestamp,
            action,
            path: path.into(),
            detail: detail.into(),
            error,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn action(&self) -> ActivityAction {
        self.action
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_string_roundtrip() {
        for action in [
            ActivityAction::Download,
            ActivityAction::Upload,
            ActivityAction::Update,
            ActivityAction::Rename,
            ActivityAction::Delete,
            ActivityAction::Conflict,
            ActivityAction::Cleanup,
            ActivityAction::Skip,
            ActivityAction::Resync,
            ActivityAction::Pause,
            ActivityAction::Error,
        ] {
            assert_eq!(action.as_str().parse::<ActivityAction>().unwrap(), action);
        }
    }

    #[test]
    fn test_entry_accessors() {
        let entry = ActivityLogEntry::new(
            7,
            Utc::now(),
            ActivityAction::Error,
            "notes/a.md",
            "upload failed",
            Some("HTTP 500".to_string()),
        );
        assert_eq!(entry.id(), 7);
        assert_eq!(entry.path(), "notes/a.md");
        assert!(entry.is_error());
        assert_eq!(entry.error(), Some("HTTP 500"));
    }
}
