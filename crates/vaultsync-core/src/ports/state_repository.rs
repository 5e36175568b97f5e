//! State repository port (driven/secondary port)
//!
//! Device-local persistence for the record snapshot and the activity
//! ledger. The store lives outside the vault so it is never synced.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific.
//! - `save_snapshot` replaces the whole snapshot; the record store decides
//!   when its in-memory mutations become durable.
//! - Activity entries are append-only; there is no update or delete.

use crate::domain::{ActivityLogEntry, RecordSnapshot};

/// Port trait for persisted sync state
#[async_trait::async_trait]
pub trait IStateRepository: Send + Sync {
    /// Load the last saved snapshot (empty if nothing was saved yet)
    async fn load_snapshot(&self) -> anyhow::Result<RecordSnapshot>;

    /// Replace the stored snapshot
    async fn save_snapshot(&self, snapshot: &RecordSnapshot) -> anyhow::Result<()>;

    /// Append one ledger entry
    async fn append_activity(&self, entry: &ActivityLogEntry) -> anyhow::Result<()>;

    /// Ledger entries in id order, optionally only the most recent `limit`
    async fn list_activity(&self, limit: Option<usize>) -> anyhow::Result<Vec<ActivityLogEntry>>;
}
