//! Local store port (driven/secondary port)
//!
//! The engine's view of the vault on disk. All paths are vault-relative;
//! the adapter resolves them against its own root.
//!
//! ## Design Notes
//!
//! - `write` must be atomic from a reader's point of view (temp file plus
//!   rename) and create missing parent directories.
//! - `list` returns files only, recursively; directories are implied.
//! - File watching is not part of this port. Watcher events are fed to the
//!   engine as [`LocalChange`](crate::domain::LocalChange) values.

use chrono::{DateTime, Utc};

use crate::domain::newtypes::{ContentHash, VaultPath};

/// Metadata of a local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub path: VaultPath,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Port trait for local vault operations
#[async_trait::async_trait]
pub trait ILocalStore: Send + Sync {
    /// Every file in the vault, recursively
    async fn list(&self) -> anyhow::Result<Vec<LocalEntry>>;

    /// Metadata of a file, `None` if it does not exist
    async fn stat(&self, path: &VaultPath) -> anyhow::Result<Option<LocalEntry>>;

    async fn read(&self, path: &VaultPath) -> anyhow::Result<Vec<u8>>;

    /// Atomically replace the file content, creating parents as needed
    async fn write(&self, path: &VaultPath, data: &[u8]) -> anyhow::Result<()>;

    async fn mkdir(&self, path: &VaultPath) -> anyhow::Result<()>;

    /// Remove a file; removing a missing file is not an error
    async fn remove(&self, path: &VaultPath) -> anyhow::Result<()>;

    async fn rename(&self, from: &VaultPath, to: &VaultPath) -> anyhow::Result<()>;

    /// SHA-256 of the current file content
    async fn content_hash(&self, path: &VaultPath) -> anyhow::Result<ContentHash>;
}
