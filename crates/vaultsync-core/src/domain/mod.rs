//! Domain entities and business rules
//!
//! This module contains the core domain types for vaultsync:
//! - Newtypes for validated paths, identifiers and hashes
//! - Sync records and their persisted snapshot
//! - Queue entries for pending local actions
//! - Conflict and merge results
//! - Activity ledger entries
//! - Exclusion verdicts and file categories
//! - Generated variant file naming
//! - The engine-wide sync state

pub mod activity;
pub mod conflict;
pub mod errors;
pub mod exclusion;
pub mod newtypes;
pub mod queue_entry;
pub mod record;
pub mod state;
pub mod variant;

// Re-export commonly used types
pub use activity::{ActivityAction, ActivityLogEntry};
pub use conflict::{ConflictInfo, ConflictRegion, ConflictResolution, MergeResult};
pub use errors::DomainError;
pub use exclusion::{is_mergeable_text, ExclusionReason, FileCategory};
pub use newtypes::*;
pub use queue_entry::{LocalChange, QueueAction, SyncQueueEntry};
pub use record::{RecordSnapshot, RecordStatus, SyncMeta, SyncRecord};
pub use state::{PauseReason, SyncState};
pub use variant::{Variant, VariantKind};
