//! Exclusion rules
//!
//! [`exclusion_reason`] decides whether a vault path takes part in sync.
//! Rules are checked in a fixed order and the first match is reported:
//!
//! 1. hard-excluded (dotfiles, OS artifacts, generated variants, caches)
//! 2. excluded-folder (longest user-declared prefix)
//! 3. vault-config-disabled (config directory allow-list and toggles)
//! 4. type-disabled (category toggles)
//! 5. file-too-large (size ceiling)
//!
//! The verdict depends only on the arguments, so re-scans are stable.

use vaultsync_core::config::SelectiveSyncSettings;
use vaultsync_core::domain::variant::is_variant;
use vaultsync_core::domain::{ExclusionReason, FileCategory, VaultPath};

/// OS-generated files that never sync
const OS_ARTIFACTS: &[&str] = &[".DS_Store", "Thumbs.db", "ehthumbs.db", "desktop.ini"];

/// Files directly under the config directory that hold per-device state
const CONFIG_INTERNAL: &[&str] = &["workspace.json", "workspace-mobile.json", "cache"];

/// Core plugin list and the settings files of bundled plugins
const CORE_PLUGIN_FILES: &[&str] = &[
    "core-plugins.json",
    "core-plugins-migration.json",
    "backlink.json",
    "bookmarks.json",
    "canvas.json",
    "command-palette.json",
    "daily-notes.json",
    "file-recovery.json",
    "global-search.json",
    "graph.json",
    "note-composer.json",
    "page-preview.json",
    "switcher.json",
    "templates.json",
    "zk-prefixer.json",
];

/// Evaluate the exclusion rules for one path
///
/// `user_exclusions` are vault-relative folder prefixes. `size` is only
/// needed for the size ceiling; pass `None` when it is unknown.
pub fn exclusion_reason(
    path: &VaultPath,
    user_exclusions: &[String],
    selective: &SelectiveSyncSettings,
    config_dir: &str,
    size: Option<u64>,
) -> Option<ExclusionReason> {
    let config_dir = config_dir.trim_matches('/');
    let in_config = !config_dir.is_empty() && path.is_within(config_dir);

    if is_hard_excluded(path, config_dir, in_config) {
        return Some(ExclusionReason::HardExcluded);
    }

    if let Some(prefix) = longest_excluded_prefix(path, user_exclusions) {
        return Some(ExclusionReason::ExcludedFolder { prefix });
    }

    if in_config {
        return if config_file_allowed(path, config_dir, selective) {
            None
        } else {
            Some(ExclusionReason::VaultConfigDisabled)
        };
    }

    let category = FileCategory::of(path);
    if !category_enabled(category, selective) {
        return Some(ExclusionReason::TypeDisabled { category });
    }

    match (size, selective.max_file_size_bytes()) {
        (Some(size), Some(limit)) if size > limit => {
            Some(ExclusionReason::FileTooLarge { size, limit })
        }
        _ => None,
    }
}

fn is_hard_excluded(path: &VaultPath, config_dir: &str, in_config: bool) -> bool {
    let name = path.file_name();
    if OS_ARTIFACTS.contains(&name) || name.starts_with("~$") {
        return true;
    }

    // The config directory itself is the only dot-prefixed component allowed
    let skip = usize::from(in_config && config_dir.starts_with('.'));
    if path.components().skip(skip).any(|c| c.starts_with('.')) {
        return true;
    }

    if is_variant(path) {
        return true;
    }

    in_config
        && config_relative(path, config_dir)
            .and_then(|rel| rel.split('/').next())
            .is_some_and(|first| CONFIG_INTERNAL.contains(&first))
}

fn config_relative<'a>(path: &'a VaultPath, config_dir: &str) -> Option<&'a str> {
    path.as_str()
        .strip_prefix(config_dir)
        .and_then(|rest| rest.strip_prefix('/'))
}

fn longest_excluded_prefix(path: &VaultPath, user_exclusions: &[String]) -> Option<String> {
    user_exclusions
        .iter()
        .map(|prefix| prefix.trim_matches('/'))
        .filter(|prefix| !prefix.is_empty() && path.is_within(prefix))
        .max_by_key(|prefix| prefix.len())
        .map(str::to_string)
}

fn config_file_allowed(path: &VaultPath, config_dir: &str, s: &SelectiveSyncSettings) -> bool {
    let Some(rel) = config_relative(path, config_dir) else {
        return false;
    };
    let (first, nested) = match rel.split_once('/') {
        Some((first, _)) => (first, true),
        None => (rel, false),
    };

    match (first, nested) {
        ("app.json", false) => s.sync_app_settings,
        ("appearance.json", false) => s.sync_appearance,
        ("hotkeys.json", false) => s.sync_hotkeys,
        ("community-plugins.json", false) => s.sync_community_plugin_list,
        (name, false) if CORE_PLUGIN_FILES.contains(&name) => s.sync_core_plugin_settings,
        ("plugins", true) => s.sync_community_plugins,
        ("snippets", true) => s.sync_snippets,
        ("themes", true) => s.sync_themes,
        _ => false,
    }
}

fn category_enabled(category: FileCategory, s: &SelectiveSyncSettings) -> bool {
    match category {
        FileCategory::Note => true,
        FileCategory::Image => s.sync_images,
        FileCategory::Audio => s.sync_audio,
        FileCategory::Video => s.sync_videos,
        FileCategory::Pdf => s.sync_pdfs,
        FileCategory::Other => s.sync_other_types,
    }
}

/// Exclusion rules bound to one set of settings
#[derive(Debug, Clone)]
pub struct ExclusionEngine {
    selective: SelectiveSyncSettings,
    config_dir: String,
}

impl ExclusionEngine {
    pub fn new(selective: SelectiveSyncSettings, config_dir: impl Into<String>) -> Self {
        Self {
            selective,
            config_dir: config_dir.into(),
        }
    }

    /// Why `path` is excluded, using the settings' own folder exclusions
    pub fn reason(&self, path: &VaultPath, size: Option<u64>) -> Option<ExclusionReason> {
        exclusion_reason(
            path,
            &self.selective.excluded_folders,
            &self.selective,
            &self.config_dir,
            size,
        )
    }

    pub fn is_included(&self, path: &VaultPath, size: Option<u64>) -> bool {
        self.reason(path, size).is_none()
    }

    pub fn settings(&self) -> &SelectiveSyncSettings {
        &self.selective
    }

    pub fn config_dir(&self) -> &str {
        &self.config_dir
    }

    /// Swap in new settings, returning the old ones
    pub fn replace_settings(&mut self, selective: SelectiveSyncSettings) -> SelectiveSyncSettings {
        std::mem::replace(&mut self.selective, selective)
    }
}
