//! Configuration module for vaultsync.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation, defaults, and a builder for programmatic
//! use. The sync engine receives a [`Config`] at construction time and never
//! reads settings from anywhere else.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::newtypes::VaultPath;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for vaultsync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub selective: SelectiveSyncSettings,
    pub conflicts: ConflictsConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

/// Synchronization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root directory of the local vault.
    pub vault_root: PathBuf,
    /// Name of the vault configuration directory inside the vault.
    pub config_dir: String,
    /// Remote folder that mirrors the vault root, if already chosen.
    pub remote_folder_id: Option<String>,
    /// Seconds between periodic pulls.
    pub pull_interval_secs: u64,
    /// Idle time after the last local edit before a file is pushed.
    pub quiescence_ms: u64,
    /// Upper bound on concurrent I/O-bound operations (hashing, scans).
    pub max_concurrency: usize,
    /// Ask the remote store to keep every uploaded revision forever.
    pub keep_revisions_forever: bool,
    /// Seconds between periodic duplicate-artifact cleanups.
    pub duplicate_cleanup_interval_secs: u64,
    /// Device-local state database.
    pub state_db: PathBuf,
}

/// Per-device selective-sync settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectiveSyncSettings {
    pub sync_images: bool,
    pub sync_audio: bool,
    pub sync_videos: bool,
    pub sync_pdfs: bool,
    pub sync_other_types: bool,
    /// Files above this size (in MiB) are skipped. `None` disables the limit.
    pub max_file_size_mb: Option<u64>,
    /// `app.json`
    pub sync_app_settings: bool,
    /// `appearance.json`
    pub sync_appearance: bool,
    /// `hotkeys.json`
    pub sync_hotkeys: bool,
    /// Core plugin list and per-core-plugin settings files.
    pub sync_core_plugin_settings: bool,
    /// `community-plugins.json`
    pub sync_community_plugin_list: bool,
    /// The `plugins/` subtree.
    pub sync_community_plugins: bool,
    /// The `snippets/` subtree.
    pub sync_snippets: bool,
    /// The `themes/` subtree.
    pub sync_themes: bool,
    /// Vault-relative folders the user excluded from sync.
    pub excluded_folders: Vec<String>,
}

impl SelectiveSyncSettings {
    /// Size ceiling in bytes, if one is configured.
    pub fn max_file_size_bytes(&self) -> Option<u64> {
        self.max_file_size_mb.map(|mb| mb.saturating_mul(1024 * 1024))
    }
}

/// Strategy for diverging markdown/text files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkdownStrategy {
    /// Three-way merge, embedding conflict markers where hunks overlap.
    AutoMerge,
    /// Write the remote version to a sibling conflict copy.
    ConflictFile,
    LocalWins,
    RemoteWins,
}

/// Strategy for diverging binary files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryStrategy {
    /// Keep whichever side was modified last.
    LastModifiedWins,
    /// Write the remote version to a sibling conflict copy.
    ConflictFile,
}

/// Conflict resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    pub markdown_strategy: MarkdownStrategy,
    pub binary_strategy: BinaryStrategy,
}

/// Retry and backoff settings for remote calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per operation, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on every further retry.
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff delay.
    pub max_delay_ms: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Write the configuration as YAML to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/vaultsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("vaultsync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            vault_root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("Vault"),
            config_dir: ".obsidian".into(),
            remote_folder_id: None,
            pull_interval_secs: 60,
            quiescence_ms: 2000,
            max_concurrency: 8,
            keep_revisions_forever: false,
            duplicate_cleanup_interval_secs: 86_400,
            state_db: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("vaultsync")
                .join("state.db"),
        }
    }
}

impl Default for SelectiveSyncSettings {
    fn default() -> Self {
        Self {
            sync_images: true,
            sync_audio: true,
            sync_videos: true,
            sync_pdfs: true,
            sync_other_types: true,
            max_file_size_mb: None,
            sync_app_settings: true,
            sync_appearance: true,
            sync_hotkeys: true,
            sync_core_plugin_settings: true,
            sync_community_plugin_list: true,
            sync_community_plugins: false,
            sync_snippets: true,
            sync_themes: true,
            excluded_folders: Vec::new(),
        }
    }
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            markdown_strategy: MarkdownStrategy::AutoMerge,
            binary_strategy: BinaryStrategy::LastModifiedWins,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 16_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.pull_interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ValidationError {
                field: field.into(),
                message,
            })
        };

        // --- sync ---
        if self.sync.pull_interval_secs == 0 {
            push("sync.pull_interval_secs", "must be greater than 0".into());
        }
        if self.sync.quiescence_ms == 0 {
            push("sync.quiescence_ms", "must be greater than 0".into());
        }
        if self.sync.max_concurrency == 0 || self.sync.max_concurrency > 64 {
            push(
                "sync.max_concurrency",
                format!("must be between 1 and 64, got {}", self.sync.max_concurrency),
            );
        }
        if self.sync.duplicate_cleanup_interval_secs == 0 {
            push(
                "sync.duplicate_cleanup_interval_secs",
                "must be greater than 0".into(),
            );
        }
        let config_dir = &self.sync.config_dir;
        if !config_dir.starts_with('.') || config_dir.len() < 2 || config_dir.contains('/') {
            push(
                "sync.config_dir",
                format!("must be a single dot-prefixed directory name, got {config_dir:?}"),
            );
        }
        // Tilde paths are expanded at runtime, so only check absolute ones.
        let root_str = self.sync.vault_root.to_string_lossy();
        if !root_str.starts_with('~') && !self.sync.vault_root.exists() {
            push(
                "sync.vault_root",
                format!("directory does not exist: {}", self.sync.vault_root.display()),
            );
        }
        if self.sync.state_db.starts_with(&self.sync.vault_root) {
            push(
                "sync.state_db",
                "must live outside the vault so it is never synced".into(),
            );
        }

        // --- selective ---
        if self.selective.max_file_size_mb == Some(0) {
            push(
                "selective.max_file_size_mb",
                "must be greater than 0 when set".into(),
            );
        }
        for (i, folder) in self.selective.excluded_folders.iter().enumerate() {
            if VaultPath::new(folder.as_str()).is_err() {
                push(
                    &format!("selective.excluded_folders[{i}]"),
                    format!("not a valid vault path: {folder:?}"),
                );
            }
        }

        // --- retry ---
        if self.retry.max_attempts == 0 {
            push("retry.max_attempts", "must be at least 1".into());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            push(
                "retry.base_delay_ms",
                format!(
                    "must not exceed retry.max_delay_ms ({})",
                    self.retry.max_delay_ms
                ),
            );
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            push(
                "logging.level",
                format!(
                    "invalid level '{}', expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            );
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Config`], starting from the defaults.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start a new builder pre-filled with default values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn vault_root(mut self, root: PathBuf) -> Self {
        self.config.sync.vault_root = root;
        self
    }

    pub fn config_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.sync.config_dir = dir.into();
        self
    }

    pub fn remote_folder_id(mut self, id: impl Into<String>) -> Self {
        self.config.sync.remote_folder_id = Some(id.into());
        self
    }

    pub fn pull_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync.pull_interval_secs = secs;
        self
    }

    pub fn quiescence_ms(mut self, ms: u64) -> Self {
        self.config.sync.quiescence_ms = ms;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.sync.max_concurrency = n;
        self
    }

    pub fn state_db(mut self, path: PathBuf) -> Self {
        self.config.sync.state_db = path;
        self
    }

    pub fn selective(mut self, settings: SelectiveSyncSettings) -> Self {
        self.config.selective = settings;
        self
    }

    pub fn markdown_strategy(mut self, strategy: MarkdownStrategy) -> Self {
        self.config.conflicts.markdown_strategy = strategy;
        self
    }

    pub fn binary_strategy(mut self, strategy: BinaryStrategy) -> Self {
        self.config.conflicts.binary_strategy = strategy;
        self
    }

    pub fn retry(mut self, max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.config.retry = RetryConfig {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        };
        self
    }

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
