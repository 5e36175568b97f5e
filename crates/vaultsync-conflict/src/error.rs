//! Error types for the conflict engine

use thiserror::Error;

/// Failures while resolving embedded conflict markers
///
/// Line numbers are 1-based.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarkerError {
    /// A marker appeared where the current block does not allow it
    #[error("malformed conflict block at line {line}: {reason}")]
    MalformedBlock { line: usize, reason: &'static str },

    /// Input ended inside a conflict block that started at `line`
    #[error("conflict block opened at line {line} is never closed")]
    IncompleteMarkers { line: usize },
}

/// Errors that can occur during conflict resolution
#[derive(Debug, Error)]
pub enum ConflictError {
    #[error(transparent)]
    Marker(#[from] MarkerError),

    /// Text strategy requested for content that is not valid UTF-8
    #[error("content of {0} is not valid UTF-8 text")]
    NotText(String),

    /// Every candidate conflict-copy name is taken
    #[error("no free conflict copy name for {0}")]
    NameExhausted(String),

    #[error(transparent)]
    Domain(#[from] vaultsync_core::domain::DomainError),
}
