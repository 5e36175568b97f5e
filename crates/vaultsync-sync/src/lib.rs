//! vaultsync sync - the vault synchronization engine
//!
//! Provides:
//! - Exclusion rules deciding which paths take part in sync
//! - The per-file record store and the pending change queue
//! - Retry with exponential backoff around remote calls
//! - Pull / resolve / push cycles, full re-sync and duplicate cleanup
//!
//! ## Modules
//!
//! - [`exclusion`] - Selective-sync and hard exclusion rules
//! - [`record_store`] - In-memory record map persisted on `save()`
//! - [`queue`] - Coalescing change queue and quiescence scheduler
//! - [`retry`] - Backoff and failure classification
//! - [`remote_tree`] - Mapping remote ids and parents onto vault paths
//! - [`engine`] - The sync orchestrator and its handle
//! - [`filesystem`] - `tokio::fs` implementation of `ILocalStore`
//! - [`notify`] - Notification sink that writes to the log

pub mod engine;
pub mod exclusion;
pub mod filesystem;
pub mod notify;
pub mod queue;
pub mod record_store;
pub mod remote_tree;
pub mod retry;

pub use engine::{
    list_local_ignored, select_primary, CleanupReport, CycleReport, EngineHandle, EnginePorts,
    IgnoredFile, IgnoredLocation, ResyncAction, ResyncPlan, ResyncStep, SyncEngine,
};
pub use exclusion::{exclusion_reason, ExclusionEngine};
pub use filesystem::LocalVaultStore;
pub use notify::LogNotifier;
pub use queue::{ChangeQueue, QuiescenceScheduler};
pub use record_store::SyncRecordStore;
pub use retry::FailureKind;

use thiserror::Error;

use vaultsync_core::domain::DomainError;
use vaultsync_core::ports::RemoteError;

/// Cycle-level failures
///
/// Per-file failures never surface here; they end up in the activity
/// ledger and the cycle carries on.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Sync was paused by the user
    #[error("sync is paused")]
    Paused,

    /// The remote store could not be reached
    #[error("remote store unreachable: {0}")]
    Offline(String),

    /// The access token was rejected even after a forced refresh
    #[error("authentication required")]
    AuthRequired,

    /// The operation was cancelled; completed steps are persisted
    #[error("operation cancelled")]
    Cancelled,

    /// Quota acknowledgement while the remote store is still full
    #[error("remote storage is still full ({used} of {limit} bytes used)")]
    StorageStillFull { used: u64, limit: u64 },

    /// No remote folder is configured for the vault
    #[error("no remote folder configured")]
    NoRemoteFolder,

    /// Unhandled remote failure
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Local storage or state persistence failed
    #[error("I/O error: {0}")]
    Io(#[source] anyhow::Error),

    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
}
