//! Conflict resolution strategy table
//!
//! Maps a diverged file plus the configured strategies to a
//! [`ResolutionOutcome`]. The resolver never touches storage; the engine
//! applies the outcome (write local, push, create a copy, flag the record).
//!
//! Dispatch is a closed table: the file kind picks the strategy family,
//! and each strategy variant has exactly one resolver function.
//!
//! | Kind   | Strategy            | Outcome                                   |
//! |--------|---------------------|-------------------------------------------|
//! | text   | `auto_merge`        | `Merged` (markers when hunks overlap)     |
//! | text   | `conflict_file`     | `ConflictCopy`                            |
//! | text   | `local_wins`        | `KeepLocal`                               |
//! | text   | `remote_wins`       | `KeepRemote`                              |
//! | binary | `last_modified_wins`| `KeepLocal` / `KeepRemote` (tie: remote)  |
//! | binary | `conflict_file`     | `ConflictCopy`                            |

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use vaultsync_core::config::{BinaryStrategy, ConflictsConfig, MarkdownStrategy};
use vaultsync_core::domain::{is_mergeable_text, ConflictResolution, MergeResult, VaultPath};

use crate::error::ConflictError;
use crate::merge::{merge_three_way, merge_two_way};

/// Everything the resolver needs to know about one diverged file
#[derive(Debug, Clone)]
pub struct ConflictInput<'a> {
    pub path: &'a VaultPath,
    pub local: &'a [u8],
    pub remote: &'a [u8],
    /// Last agreed content, when it could be recovered
    pub base: Option<&'a [u8]>,
    pub local_modified: DateTime<Utc>,
    pub remote_modified: DateTime<Utc>,
}

/// What the engine should do with a diverged file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Local content wins and is pushed
    KeepLocal,
    /// Remote content wins and is written locally
    KeepRemote,
    /// Write the merged content locally; push it unless it has conflicts
    Merged(MergeResult),
    /// Leave the original alone and write the remote side to a sibling copy
    ConflictCopy,
}

impl ResolutionOutcome {
    /// The resolution to report once the outcome has been applied
    ///
    /// `copy_path` is only used for [`ResolutionOutcome::ConflictCopy`].
    pub fn resolution(&self, copy_path: Option<VaultPath>) -> Option<ConflictResolution> {
        match self {
            ResolutionOutcome::KeepLocal => Some(ConflictResolution::KeptLocal),
            ResolutionOutcome::KeepRemote => Some(ConflictResolution::KeptRemote),
            ResolutionOutcome::Merged(result) if result.has_conflicts => {
                Some(ConflictResolution::MergedWithMarkers {
                    conflict_count: result.conflict_count,
                })
            }
            ResolutionOutcome::Merged(_) => Some(ConflictResolution::Merged),
            ResolutionOutcome::ConflictCopy => {
                copy_path.map(|copy_path| ConflictResolution::ConflictCopy { copy_path })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Text,
    Binary,
}

/// Strategy-driven conflict resolver
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    markdown: MarkdownStrategy,
    binary: BinaryStrategy,
}

impl ConflictResolver {
    pub fn new(config: &ConflictsConfig) -> Self {
        Self {
            markdown: config.markdown_strategy,
            binary: config.binary_strategy,
        }
    }

    fn kind_of(input: &ConflictInput<'_>) -> FileKind {
        let text = is_mergeable_text(input.path)
            && std::str::from_utf8(input.local).is_ok()
            && std::str::from_utf8(input.remote).is_ok();
        if text {
            FileKind::Text
        } else {
            FileKind::Binary
        }
    }

    /// Decide how to settle a diverged file
    ///
    /// Identical content on both sides is never a conflict and resolves to
    /// `KeepRemote`, which the engine applies as a no-op write.
    pub fn resolve(&self, input: &ConflictInput<'_>) -> Result<ResolutionOutcome, ConflictError> {
        if input.local == input.remote {
            return Ok(ResolutionOutcome::KeepRemote);
        }

        let kind = Self::kind_of(input);
        let outcome = match kind {
            FileKind::Text => match self.markdown {
                MarkdownStrategy::AutoMerge => Self::auto_merge(input)?,
                MarkdownStrategy::ConflictFile => ResolutionOutcome::ConflictCopy,
                MarkdownStrategy::LocalWins => ResolutionOutcome::KeepLocal,
                MarkdownStrategy::RemoteWins => ResolutionOutcome::KeepRemote,
            },
            FileKind::Binary => match self.binary {
                BinaryStrategy::LastModifiedWins => Self::last_modified_wins(input),
                BinaryStrategy::ConflictFile => ResolutionOutcome::ConflictCopy,
            },
        };

        info!(
            path = %input.path,
            kind = ?kind,
            outcome = outcome_name(&outcome),
            "Conflict resolved by strategy"
        );
        Ok(outcome)
    }

    fn auto_merge(input: &ConflictInput<'_>) -> Result<ResolutionOutcome, ConflictError> {
        let as_text = |bytes: &[u8]| {
            std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|_| ConflictError::NotText(input.path.to_string()))
        };
        let local = as_text(input.local)?;
        let remote = as_text(input.remote)?;

        let result = match input.base.map(std::str::from_utf8) {
            Some(Ok(base)) => merge_three_way(base, &local, &remote),
            _ => {
                debug!(path = %input.path, "No usable base, falling back to two-way merge");
                merge_two_way(&local, &remote)
            }
        };
        Ok(ResolutionOutcome::Merged(result))
    }

    /// Newer side wins; on a tie the remote copy wins so every device
    /// converges on the same bytes
    fn last_modified_wins(input: &ConflictInput<'_>) -> ResolutionOutcome {
        if input.local_modified > input.remote_modified {
            ResolutionOutcome::KeepLocal
        } else {
            ResolutionOutcome::KeepRemote
        }
    }
}

fn outcome_name(outcome: &ResolutionOutcome) -> &'static str {
    match outcome {
        ResolutionOutcome::KeepLocal => "keep_local",
        ResolutionOutcome::KeepRemote => "keep_remote",
        ResolutionOutcome::Merged(r) if r.has_conflicts => "merged_with_markers",
        ResolutionOutcome::Merged(_) => "merged",
        ResolutionOutcome::ConflictCopy => "conflict_copy",
    }
}
