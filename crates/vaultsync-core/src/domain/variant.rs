//! Generated variant file names
//!
//! The engine produces two kinds of sibling files next to a canonical path:
//!
//! - conflict copies: `notes (conflicted copy 2026-03-01 142530).md`
//! - shadow copies: `notes (shadow copy 2026-03-01 142530).md`
//!
//! When a name is already taken an ordinal is appended after the closing
//! parenthesis: `notes (conflicted copy 2026-03-01 142530) 2.md`.
//! Stripping the suffix yields the canonical path.

use chrono::{DateTime, NaiveDateTime, Utc};

use super::errors::DomainError;
use super::newtypes::VaultPath;

const CONFLICT_LABEL: &str = "conflicted copy";
const SHADOW_LABEL: &str = "shadow copy";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H%M%S";

/// Which kind of generated file a variant is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantKind {
    ConflictCopy,
    ShadowCopy,
}

impl VariantKind {
    fn label(self) -> &'static str {
        match self {
            VariantKind::ConflictCopy => CONFLICT_LABEL,
            VariantKind::ShadowCopy => SHADOW_LABEL,
        }
    }
}

/// A parsed variant file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub kind: VariantKind,
    pub canonical: VaultPath,
    pub created_at: NaiveDateTime,
    pub ordinal: Option<u32>,
}

/// Split a file name into stem and extension (extension keeps its dot)
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}

/// Build the variant path for `path`
///
/// # Errors
/// Returns error if the resulting name is not a valid path
pub fn variant_path(
    path: &VaultPath,
    kind: VariantKind,
    at: DateTime<Utc>,
    ordinal: Option<u32>,
) -> Result<VaultPath, DomainError> {
    let (stem, ext) = split_name(path.file_name());
    let stamp = at.format(TIMESTAMP_FORMAT);
    let name = match ordinal {
        Some(n) => format!("{stem} ({} {stamp}) {n}{ext}", kind.label()),
        None => format!("{stem} ({} {stamp}){ext}", kind.label()),
    };
    path.with_file_name(&name)
}

/// Parse a variant file name, returning `None` for ordinary files
pub fn parse_variant(path: &VaultPath) -> Option<Variant> {
    let (stem, ext) = split_name(path.file_name());

    // Optional " N" ordinal after the closing parenthesis
    let (stem, ordinal) = match stem.rfind(") ") {
        Some(pos)
            if pos + 2 < stem.len() && stem[pos + 2..].chars().all(|c| c.is_ascii_digit()) =>
        {
            (&stem[..=pos], stem[pos + 2..].parse::<u32>().ok())
        }
        _ => (stem, None),
    };

    let inner = stem.strip_suffix(')')?;
    for kind in [VariantKind::ConflictCopy, VariantKind::ShadowCopy] {
        let marker = format!(" ({} ", kind.label());
        let Some(pos) = inner.rfind(&marker) else {
            continue;
        };
        let base = &inner[..pos];
        let stamp = &inner[pos + marker.len()..];
        let Ok(created_at) = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT) else {
            continue;
        };
        if base.is_empty() {
            return None;
        }
        let canonical = path.with_file_name(&format!("{base}{ext}")).ok()?;
        return Some(Variant {
            kind,
            canonical,
            created_at,
            ordinal,
        });
    }
    None
}

/// Returns true if `path` is a generated variant file
pub fn is_variant(path: &VaultPath) -> bool {
    parse_variant(path).is_some()
}

/// The canonical path for `path` (itself if it is not a variant)
pub fn canonical_path(path: &VaultPath) -> VaultPath {
    parse_variant(path)
        .map(|v| v.canonical)
        .unwrap_or_else(|| path.clone())
}
