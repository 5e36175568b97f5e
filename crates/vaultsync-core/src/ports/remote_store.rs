//! Remote store port (driven/secondary port)
//!
//! This module defines the interface to the cloud file store that mirrors
//! the vault. Files and folders are addressed by opaque [`RemoteId`]s and
//! linked through parent ids; the engine maintains the id-to-path mapping.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because transport errors are adapter-specific.
//!   Adapters should wrap failures in [`RemoteError`] so the engine can
//!   classify them; unclassified errors fall back to message heuristics.
//! - Every call takes the current access token explicitly. Token refresh
//!   is the job of [`ITokenProvider`](super::ITokenProvider).
//! - Pagination of the underlying HTTP API is the adapter's concern:
//!   `list_changed_files` returns the complete batch of changes since the
//!   given page token and the token to resume from next time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::newtypes::{ContentHash, PageToken, RemoteId};

// ============================================================================
// RemoteError
// ============================================================================

/// Classified failure of a remote call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection refused, DNS failure, timeout
    #[error("network error: {0}")]
    Network(String),

    /// HTTP 5xx
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// HTTP 429 or provider rate-limit signal
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 401; the access token was rejected
    #[error("unauthorized")]
    Unauthorized,

    /// The account ran out of storage
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// HTTP 4xx other than 401/404/429
    #[error("request rejected {status}: {message}")]
    Validation { status: u16, message: String },

    /// The target file or folder does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    /// True for failures that may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Network(_) | RemoteError::Server { .. } | RemoteError::RateLimited { .. }
        )
    }
}

// ============================================================================
// DTOs
// ============================================================================

/// Metadata of a remote file or folder
///
/// This is a port-level DTO; the engine maps it onto vault paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: RemoteId,
    pub name: String,
    /// Parent folder (None for items outside any known folder)
    pub parent_id: Option<RemoteId>,
    pub is_folder: bool,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Content hash, if the store reports one in the same format
    pub content_hash: Option<ContentHash>,
    /// The item was moved to the trash
    pub trashed: bool,
    /// The item was permanently removed (change feed tombstone)
    pub removed: bool,
}

impl RemoteFile {
    /// True if the item no longer exists from the vault's point of view
    pub fn is_gone(&self) -> bool {
        self.trashed || self.removed
    }
}

/// Result of a change-feed query
#[derive(Debug, Clone, Default)]
pub struct ChangesPage {
    /// Items that changed since the requested token, in feed order
    pub files: Vec<RemoteFile>,
    /// Token to pass on the next query
    pub next_page_token: Option<PageToken>,
}

/// One stored revision of a remote file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRevision {
    pub id: String,
    pub modified: DateTime<Utc>,
    pub content_hash: Option<ContentHash>,
    pub keep_forever: bool,
}

/// Storage usage of the remote account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageQuota {
    pub used: u64,
    /// `None` for unlimited accounts
    pub limit: Option<u64>,
}

impl StorageQuota {
    /// Bytes still available, `None` when unlimited
    pub fn remaining(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }
}

/// Request counters reported by the adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub requests_last_minute: u32,
    pub requests_total: u64,
    pub throttled_total: u64,
}

// ============================================================================
// IRemoteStore trait
// ============================================================================

/// Port trait for remote file store operations
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// Changes since `page_token`, or a full listing when it is `None`
    ///
    /// `root` restricts the listing to the subtree that mirrors the vault.
    async fn list_changed_files(
        &self,
        access_token: &str,
        root: &RemoteId,
        page_token: Option<&PageToken>,
    ) -> anyhow::Result<ChangesPage>;

    /// Current content of a file
    async fn download_file(&self, access_token: &str, id: &RemoteId) -> anyhow::Result<Vec<u8>>;

    /// Content of a specific stored revision
    async fn download_revision(
        &self,
        access_token: &str,
        id: &RemoteId,
        revision_id: &str,
    ) -> anyhow::Result<Vec<u8>>;

    async fn create_folder(
        &self,
        access_token: &str,
        parent_id: &RemoteId,
        name: &str,
    ) -> anyhow::Result<RemoteFile>;

    async fn create_file(
        &self,
        access_token: &str,
        parent_id: &RemoteId,
        name: &str,
        data: &[u8],
        keep_forever: bool,
    ) -> anyhow::Result<RemoteFile>;

    async fn update_file(
        &self,
        access_token: &str,
        id: &RemoteId,
        data: &[u8],
        keep_forever: bool,
    ) -> anyhow::Result<RemoteFile>;

    /// Move a file to the trash
    async fn trash_file(&self, access_token: &str, id: &RemoteId) -> anyhow::Result<()>;

    /// Rename a file, optionally moving it under a new parent
    async fn rename_file(
        &self,
        access_token: &str,
        id: &RemoteId,
        new_name: &str,
        new_parent: Option<&RemoteId>,
    ) -> anyhow::Result<RemoteFile>;

    async fn list_revisions(
        &self,
        access_token: &str,
        id: &RemoteId,
    ) -> anyhow::Result<Vec<RemoteRevision>>;

    async fn get_storage_quota(&self, access_token: &str) -> anyhow::Result<StorageQuota>;

    /// Local request counters; no network call
    fn get_rate_limit_snapshot(&self) -> RateLimitSnapshot;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Network("reset".into()).is_transient());
        assert!(RemoteError::Server {
            status: 503,
            message: "busy".into()
        }
        .is_transient());
        assert!(RemoteError::RateLimited {
            retry_after_secs: None
        }
        .is_transient());
        assert!(!RemoteError::Unauthorized.is_transient());
        assert!(!RemoteError::QuotaExceeded.is_transient());
        assert!(!RemoteError::Validation {
            status: 400,
            message: "bad name".into()
        }
        .is_transient());
    }

    #[test]
    fn test_quota_remaining() {
        let q = StorageQuota {
            used: 90,
            limit: Some(100),
        };
        assert_eq!(q.remaining(), Some(10));
        let over = StorageQuota {
            used: 120,
            limit: Some(100),
        };
        assert_eq!(over.remaining(), Some(0));
        let unlimited = StorageQuota {
            used: 5,
            limit: None,
        };
        assert_eq!(unlimited.remaining(), None);
    }
}
