//! Engine-wide sync state

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why the engine is paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// The user asked to pause
    User,
    /// An upload hit the remote storage quota
    StorageFull,
}

/// State machine of the sync engine
///
/// ```text
///   Idle ──trigger──▶ Syncing ──clean──▶ Idle
///                       │ ├──edits queued mid-cycle──▶ Pending ──▶ Syncing
///                       │ ├──unresolved conflicts────▶ Conflict
///                       │ └──fatal failure───────────▶ Error
///   any ──remote unreachable──▶ Offline
///   any ──pause / quota────────▶ Paused(reason)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing,
    Pending,
    Offline,
    Error,
    Conflict,
    Paused(PauseReason),
}

impl SyncState {
    pub fn is_paused(&self) -> bool {
        matches!(self, SyncState::Paused(_))
    }

    /// True while uploads must not run
    pub fn blocks_uploads(&self) -> bool {
        matches!(self, SyncState::Paused(_))
    }
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState::Idle
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Syncing => write!(f, "syncing"),
            SyncState::Pending => write!(f, "pending"),
            SyncState::Offline => write!(f, "offline"),
            SyncState::Error => write!(f, "error"),
            SyncState::Conflict => write!(f, "conflict"),
            SyncState::Paused(PauseReason::User) => write!(f, "paused"),
            SyncState::Paused(PauseReason::StorageFull) => write!(f, "paused (storage full)"),
        }
    }
}
