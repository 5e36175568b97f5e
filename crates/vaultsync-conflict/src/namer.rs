//! Conflict naming for side-by-side copies
//!
//! Generates unique sibling names following the pattern
//! `name (conflicted copy YYYY-MM-DD HHMMSS).ext`, appending an ordinal
//! when the first candidate is already taken.

use chrono::{DateTime, Utc};

use vaultsync_core::domain::{variant::variant_path, VariantKind, VaultPath};

use crate::error::ConflictError;

const MAX_ORDINAL: u32 = 99;

/// Generates unique conflict and shadow copy paths
pub struct ConflictNamer;

impl ConflictNamer {
    /// Conflict copy path for `path` at time `at`
    ///
    /// Given "notes/report.md", produces
    /// "notes/report (conflicted copy 2026-02-07 101500).md".
    pub fn generate(path: &VaultPath, at: DateTime<Utc>) -> Result<VaultPath, ConflictError> {
        Ok(variant_path(path, VariantKind::ConflictCopy, at, None)?)
    }

    /// Like [`generate`](Self::generate), skipping names for which `exists`
    /// returns true
    pub fn generate_unique<F>(
        path: &VaultPath,
        kind: VariantKind,
        at: DateTime<Utc>,
        mut exists: F,
    ) -> Result<VaultPath, ConflictError>
    where
        F: FnMut(&VaultPath) -> bool,
    {
        let candidate = variant_path(path, kind, at, None)?;
        if !exists(&candidate) {
            return Ok(candidate);
        }

        for ordinal in 2..=MAX_ORDINAL {
            let numbered = variant_path(path, kind, at, Some(ordinal))?;
            if !exists(&numbered) {
                return Ok(numbered);
            }
        }

        Err(ConflictError::NameExhausted(path.to_string()))
    }
}
