//! Per-file sync records
//!
//! A [`SyncRecord`] is the durable memory of what the engine last agreed
//! with the remote store about one canonical path. The record store keeps
//! one record per path; a [`RecordSnapshot`] is the persisted form of the
//! whole store plus the change-feed bookkeeping.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ContentHash, PageToken, RemoteId, VaultPath};

/// Synchronization status of a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Local and remote content agree
    Synced,
    /// Local content changed and must be uploaded
    PendingPush,
    /// Remote content changed and must be downloaded
    PendingPull,
    /// Both sides diverged and the file needs manual attention
    Conflict,
}

impl RecordStatus {
    /// Stable string form used in storage and on the CLI
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Synced => "synced",
            RecordStatus::PendingPush => "pending_push",
            RecordStatus::PendingPull => "pending_pull",
            RecordStatus::Conflict => "conflict",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(RecordStatus::Synced),
            "pending_push" => Ok(RecordStatus::PendingPush),
            "pending_pull" => Ok(RecordStatus::PendingPull),
            "conflict" => Ok(RecordStatus::Conflict),
            other => Err(DomainError::UnknownVariant {
                kind: "record status",
                value: other.to_string(),
            }),
        }
    }
}

/// Sync state of one canonical path
///
/// Invariant: `status == Synced` exactly when `local_hash == remote_hash`.
/// The constructors and transition methods maintain it; [`SyncRecord::validate`]
/// checks it for records read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    path: VaultPath,
    remote_id: RemoteId,
    local_hash: ContentHash,
    remote_hash: ContentHash,
    last_synced: DateTime<Utc>,
    status: RecordStatus,
}

impl SyncRecord {
    /// A record for a file whose local and remote copies just converged
    pub fn synced(
        path: VaultPath,
        remote_id: RemoteId,
        hash: ContentHash,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            path,
            remote_id,
            local_hash: hash.clone(),
            remote_hash: hash,
            last_synced: at,
            status: RecordStatus::Synced,
        }
    }

    /// Rebuild a record from stored fields
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidRecord`] if the fields break the
    /// synced-iff-hashes-match invariant
    pub fn from_parts(
        path: VaultPath,
        remote_id: RemoteId,
        local_hash: ContentHash,
        remote_hash: ContentHash,
        last_synced: DateTime<Utc>,
        status: RecordStatus,
    ) -> Result<Self, DomainError> {
        let record = Self {
            path,
            remote_id,
            local_hash,
            remote_hash,
            last_synced,
            status,
        };
        record.validate()?;
        Ok(record)
    }

    /// Check the status/hash invariant
    pub fn validate(&self) -> Result<(), DomainError> {
        let hashes_match = self.local_hash == self.remote_hash;
        let is_synced = self.status == RecordStatus::Synced;
        if hashes_match != is_synced {
            return Err(DomainError::InvalidRecord {
                path: self.path.to_string(),
                reason: format!(
                    "status {} with local {} and remote {}",
                    self.status,
                    self.local_hash.short(),
                    self.remote_hash.short()
                ),
            });
        }
        Ok(())
    }

    pub fn path(&self) -> &VaultPath {
        &self.path
    }

    pub fn remote_id(&self) -> &RemoteId {
        &self.remote_id
    }

    pub fn local_hash(&self) -> &ContentHash {
        &self.local_hash
    }

    pub fn remote_hash(&self) -> &ContentHash {
        &self.remote_hash
    }

    pub fn last_synced(&self) -> DateTime<Utc> {
        self.last_synced
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn is_synced(&self) -> bool {
        self.status == RecordStatus::Synced
    }

    /// Record a new local hash; the record becomes pending-push unless the
    /// content already matches the remote side
    pub fn note_local_change(&mut self, hash: ContentHash) {
        self.status = if hash == self.remote_hash {
            RecordStatus::Synced
        } else {
            RecordStatus::PendingPush
        };
        self.local_hash = hash;
    }

    /// Record a new remote hash; the record becomes pending-pull unless the
    /// content already matches the local side
    pub fn note_remote_change(&mut self, hash: ContentHash) {
        self.status = if hash == self.local_hash {
            RecordStatus::Synced
        } else {
            RecordStatus::PendingPull
        };
        self.remote_hash = hash;
    }

    /// Flag the record as conflicted with the two diverging hashes
    ///
    /// If the hashes happen to agree the record is synced instead.
    pub fn mark_conflict(&mut self, local: ContentHash, remote: ContentHash) {
        self.status = if local == remote {
            RecordStatus::Synced
        } else {
            RecordStatus::Conflict
        };
        self.local_hash = local;
        self.remote_hash = remote;
    }

    /// Both sides converged on `hash`
    pub fn mark_synced(&mut self, remote_id: RemoteId, hash: ContentHash, at: DateTime<Utc>) {
        self.remote_id = remote_id;
        self.local_hash = hash.clone();
        self.remote_hash = hash;
        self.last_synced = at;
        self.status = RecordStatus::Synced;
    }

    /// Move the record to a new path, keeping all sync state
    pub fn relocate(&mut self, path: VaultPath) {
        self.path = path;
    }
}

/// Change-feed and folder bookkeeping stored alongside the records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Cursor into the remote change feed
    pub page_token: Option<PageToken>,
    /// Remote folder that maps to the vault root
    pub remote_root_id: Option<RemoteId>,
    /// Remote ids of folders created or discovered, keyed by vault path
    pub folder_ids: BTreeMap<String, RemoteId>,
    /// When the last full re-sync completed
    pub last_full_resync: Option<DateTime<Utc>>,
    /// When duplicate cleanup last ran
    pub last_duplicate_cleanup: Option<DateTime<Utc>>,
}

/// Persisted form of the record store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub records: Vec<SyncRecord>,
    pub meta: SyncMeta,
}
