//! Pending local actions awaiting push

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, VaultPath};

/// What happened to a local file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueAction {
    Create,
    Update,
    Delete,
    Rename,
}

impl fmt::Display for QueueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueueAction::Create => "create",
            QueueAction::Update => "update",
            QueueAction::Delete => "delete",
            QueueAction::Rename => "rename",
        };
        f.write_str(s)
    }
}

/// One pending local action
///
/// `old_path` is only set for renames. `local_hash` is the content hash
/// observed when the change was detected (absent for deletes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    pub action: QueueAction,
    pub path: VaultPath,
    pub old_path: Option<VaultPath>,
    pub local_hash: Option<ContentHash>,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

impl SyncQueueEntry {
    pub fn new(
        action: QueueAction,
        path: VaultPath,
        local_hash: Option<ContentHash>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            action,
            path,
            old_path: None,
            local_hash,
            timestamp,
            retry_count: 0,
        }
    }

    pub fn rename(
        old_path: VaultPath,
        path: VaultPath,
        local_hash: Option<ContentHash>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            action: QueueAction::Rename,
            path,
            old_path: Some(old_path),
            local_hash,
            timestamp,
            retry_count: 0,
        }
    }
}

/// A raw local change as reported by the file watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalChange {
    Created(VaultPath),
    Modified(VaultPath),
    Deleted(VaultPath),
    Renamed { from: VaultPath, to: VaultPath },
}

impl LocalChange {
    /// The path a debounce timer should be keyed on
    pub fn key(&self) -> &VaultPath {
        match self {
            LocalChange::Created(p) | LocalChange::Modified(p) | LocalChange::Deleted(p) => p,
            LocalChange::Renamed { to, .. } => to,
        }
    }
}
