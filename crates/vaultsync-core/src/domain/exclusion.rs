//! Exclusion verdict types
//!
//! Stateless classifications derived from a path, its size and the
//! selective-sync settings. The rules themselves live in the sync crate.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::newtypes::VaultPath;

const NOTE_EXTENSIONS: &[&str] = &["md", "canvas"];
const IMAGE_EXTENSIONS: &[&str] = &[
    "bmp", "png", "jpg", "jpeg", "gif", "svg", "webp", "avif", "heic", "tif", "tiff",
];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "3gp", "flac", "ogg", "oga", "opus"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "ogv", "mov", "mkv"];
const PDF_EXTENSIONS: &[&str] = &["pdf"];

/// Extensions whose content can go through a line-based three-way merge
const MERGEABLE_TEXT_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// Broad file category used by the selective-sync type toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    /// Markdown notes and canvases, always synced
    Note,
    Image,
    Audio,
    Video,
    Pdf,
    /// Anything with an unrecognized extension
    Other,
}

impl FileCategory {
    /// Classify a path by its extension
    pub fn of(path: &VaultPath) -> Self {
        let Some(ext) = path.extension() else {
            return FileCategory::Other;
        };
        let ext = ext.as_str();
        if NOTE_EXTENSIONS.contains(&ext) {
            FileCategory::Note
        } else if IMAGE_EXTENSIONS.contains(&ext) {
            FileCategory::Image
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            FileCategory::Audio
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            FileCategory::Video
        } else if PDF_EXTENSIONS.contains(&ext) {
            FileCategory::Pdf
        } else {
            FileCategory::Other
        }
    }
}

/// True if `path` names a text file the merge engine may combine line by line
pub fn is_mergeable_text(path: &VaultPath) -> bool {
    path.extension()
        .is_some_and(|ext| MERGEABLE_TEXT_EXTENSIONS.contains(&ext.as_str()))
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileCategory::Note => "note",
            FileCategory::Image => "image",
            FileCategory::Audio => "audio",
            FileCategory::Video => "video",
            FileCategory::Pdf => "pdf",
            FileCategory::Other => "other",
        };
        f.write_str(s)
    }
}

/// Why a path does not participate in sync
///
/// Variants are listed in evaluation priority order: the first rule that
/// matches is the one reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Non-overridable deny-list (dotfiles, OS artifacts, sync variants, caches)
    HardExcluded,
    /// Under a user-excluded folder; `prefix` is the longest matching one
    ExcludedFolder { prefix: String },
    /// Inside the vault configuration directory and not allowed by a toggle
    VaultConfigDisabled,
    /// The file's category is turned off
    TypeDisabled { category: FileCategory },
    /// Larger than the configured ceiling
    FileTooLarge { size: u64, limit: u64 },
}

impl ExclusionReason {
    /// Short machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ExclusionReason::HardExcluded => "hard-excluded",
            ExclusionReason::ExcludedFolder { .. } => "excluded-folder",
            ExclusionReason::VaultConfigDisabled => "vault-config-disabled",
            ExclusionReason::TypeDisabled { .. } => "type-disabled",
            ExclusionReason::FileTooLarge { .. } => "file-too-large",
        }
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::HardExcluded => write!(f, "always excluded"),
            ExclusionReason::ExcludedFolder { prefix } => {
                write!(f, "inside excluded folder '{prefix}'")
            }
            ExclusionReason::VaultConfigDisabled => {
                write!(f, "vault configuration sync is disabled for this file")
            }
            ExclusionReason::TypeDisabled { category } => {
                write!(f, "{category} files are not synced")
            }
            ExclusionReason::FileTooLarge { size, limit } => {
                write!(f, "{size} bytes exceeds the {limit} byte limit")
            }
        }
    }
}
