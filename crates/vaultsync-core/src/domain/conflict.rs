//! Conflict and merge types
//!
//! [`ConflictInfo`] describes a path whose local and remote copies diverged
//! during a cycle. It is transient: it lives until the resolver decides what
//! to do with it. [`MergeResult`] is the output of a three-way text merge.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, VaultPath};

/// How a conflict was settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Three-way merge succeeded without overlapping hunks
    Merged,
    /// Three-way merge left embedded conflict markers in the file
    MergedWithMarkers { conflict_count: usize },
    /// The other side was written to a sibling conflict copy
    ConflictCopy { copy_path: VaultPath },
    /// Local content was kept and pushed
    KeptLocal,
    /// Remote content was kept and written locally
    KeptRemote,
}

impl ConflictResolution {
    /// True when the file still needs a human to look at it
    pub fn needs_attention(&self) -> bool {
        matches!(self, ConflictResolution::MergedWithMarkers { .. })
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictResolution::Merged => write!(f, "merged"),
            ConflictResolution::MergedWithMarkers { conflict_count } => {
                write!(f, "merged with {conflict_count} conflict block(s)")
            }
            ConflictResolution::ConflictCopy { copy_path } => {
                write!(f, "conflict copy at {copy_path}")
            }
            ConflictResolution::KeptLocal => write!(f, "kept local"),
            ConflictResolution::KeptRemote => write!(f, "kept remote"),
        }
    }
}

/// A detected divergence between local and remote content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub path: VaultPath,
    pub local_hash: ContentHash,
    pub remote_hash: ContentHash,
    /// Hash of the last agreed content, if the path was synced before
    pub base_hash: Option<ContentHash>,
    pub local_modified: DateTime<Utc>,
    pub remote_modified: DateTime<Utc>,
    pub resolution: Option<ConflictResolution>,
}

/// One overlapping region in a three-way merge
///
/// Line numbers are 1-based positions of the region in the merged output,
/// pointing at the opening marker line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRegion {
    pub start_line: usize,
    pub base: Vec<String>,
    pub local: Vec<String>,
    pub remote: Vec<String>,
}

/// Output of a three-way text merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub content: String,
    pub has_conflicts: bool,
    pub conflict_count: usize,
    pub regions: Vec<ConflictRegion>,
}

impl MergeResult {
    /// A merge that produced `content` without conflicts
    pub fn clean(content: String) -> Self {
        Self {
            content,
            has_conflicts: false,
            conflict_count: 0,
            regions: Vec::new(),
        }
    }
}
