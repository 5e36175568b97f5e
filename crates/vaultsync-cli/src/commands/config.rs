//! Config command - View and manage the vaultsync configuration
//!
//! Provides the `vaultsync config` CLI command which:
//! 1. Shows the current configuration (YAML or JSON)
//! 2. Sets individual values via dot-notation keys
//! 3. Validates the configuration file and reports errors
//! 4. Writes a starter configuration for a vault

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use clap::Subcommand;
use tracing::info;

use vaultsync_core::config::{BinaryStrategy, Config, MarkdownStrategy};

use super::load_config;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "sync.pull_interval_secs")
        key: String,
        /// New value
        value: String,
    },
    /// Validate configuration file
    Validate,
    /// Write a default configuration for a vault
    Init {
        /// Root directory of the vault
        vault_root: PathBuf,
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        match self {
            ConfigCommand::Show => self.execute_show(format, config_path).await,
            ConfigCommand::Set { key, value } => {
                self.execute_set(key, value, format, config_path).await
            }
            ConfigCommand::Validate => self.execute_validate(format, config_path).await,
            ConfigCommand::Init { vault_root, force } => {
                self.execute_init(vault_root, *force, format, config_path)
                    .await
            }
        }
    }

    async fn execute_show(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format);
        let config = load_config(config_path)?;

        info!(config_path = %config_path.display(), "Showing configuration");

        if format.is_json() {
            let json = serde_json::to_value(&config)
                .context("Failed to serialize configuration to JSON")?;
            formatter.print_json(&json);
        } else {
            formatter.success(&format!("Configuration ({})", config_path.display()));
            formatter.info("");
            let yaml = serde_yaml::to_string(&config)
                .context("Failed to serialize configuration to YAML")?;
            for line in yaml.lines() {
                formatter.info(line);
            }
        }
        Ok(())
    }

    async fn execute_set(
        &self,
        key: &str,
        value: &str,
        format: OutputFormat,
        config_path: &Path,
    ) -> Result<()> {
        let formatter = get_formatter(format);
        let mut config = load_config(config_path)?;

        info!(key = %key, value = %value, "Setting configuration value");

        if let Err(e) = apply_config_value(&mut config, key, value) {
            if format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "success": false,
                    "key": key,
                    "value": value,
                    "error": e.to_string(),
                }));
            } else {
                formatter.error(&format!("Failed to set '{}': {}", key, e));
                formatter.info("");
                formatter.info("Supported keys:");
                for supported in SUPPORTED_KEYS {
                    formatter.info(&format!("  {}", supported));
                }
            }
            return Ok(());
        }

        // The vault may not exist yet when the config is written first
        let errors: Vec<String> = config
            .validate()
            .into_iter()
            .filter(|e| e.field != "sync.vault_root")
            .map(|e| e.to_string())
            .collect();
        if !errors.is_empty() {
            if format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "success": false,
                    "key": key,
                    "value": value,
                    "errors": errors,
                }));
            } else {
                formatter.error(&format!(
                    "Invalid value for '{}': {}",
                    key,
                    errors.join("; ")
                ));
            }
            return Ok(());
        }

        config
            .save(config_path)
            .context("Failed to write configuration file")?;

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "key": key,
                "value": value,
                "config_path": config_path.display().to_string(),
            }));
        } else {
            formatter.success(&format!("Set {} = {}", key, value));
            formatter.info(&format!("Saved to {}", config_path.display()));
        }
        Ok(())
    }

    async fn execute_validate(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format);

        if !config_path.exists() {
            if format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "valid": false,
                    "config_path": config_path.display().to_string(),
                    "errors": ["Configuration file not found. Using defaults."],
                }));
            } else {
                formatter.info(&format!(
                    "Configuration file not found at {}",
                    config_path.display()
                ));
                formatter.info("Run 'vaultsync config init <vault>' to create one.");
            }
            return Ok(());
        }

        let config = match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                if format.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "valid": false,
                        "config_path": config_path.display().to_string(),
                        "errors": [format!("Failed to parse configuration: {}", e)],
                    }));
                } else {
                    formatter.error(&format!("Failed to parse configuration: {}", e));
                    formatter.info(&format!("File: {}", config_path.display()));
                }
                return Ok(());
            }
        };

        info!(config_path = %config_path.display(), "Validating configuration");
        let errors = config.validate();

        if format.is_json() {
            let error_strings: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            formatter.print_json(&serde_json::json!({
                "valid": errors.is_empty(),
                "config_path": config_path.display().to_string(),
                "errors": error_strings,
            }));
        } else if errors.is_empty() {
            formatter.success("Configuration is valid");
            formatter.info(&format!("File: {}", config_path.display()));
        } else {
            formatter.error(&format!(
                "Configuration has {} error{}:",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" }
            ));
            formatter.info(&format!("File: {}", config_path.display()));
            formatter.info("");
            for error in &errors {
                formatter.info(&format!("  {} - {}", error.field, error.message));
            }
        }
        Ok(())
    }

    async fn execute_init(
        &self,
        vault_root: &Path,
        force: bool,
        format: OutputFormat,
        config_path: &Path,
    ) -> Result<()> {
        let formatter = get_formatter(format);
        if config_path.exists() && !force {
            bail!(
                "{} already exists; pass --force to overwrite it",
                config_path.display()
            );
        }

        let mut config = Config::default();
        config.sync.vault_root = vault_root.to_path_buf();
        config
            .save(config_path)
            .context("Failed to write configuration file")?;
        info!(config_path = %config_path.display(), vault_root = %vault_root.display(), "Initialized configuration");

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "config_path": config_path.display().to_string(),
                "vault_root": vault_root.display().to_string(),
            }));
        } else {
            formatter.success(&format!("Wrote {}", config_path.display()));
            if !vault_root.is_dir() {
                formatter.warn(&format!(
                    "Vault root {} does not exist yet",
                    vault_root.display()
                ));
            }
        }
        Ok(())
    }
}

const SUPPORTED_KEYS: &[&str] = &[
    "sync.vault_root                      - Vault directory",
    "sync.config_dir                      - Vault configuration directory (e.g. .obsidian)",
    "sync.remote_folder_id                - Remote folder id, 'none' to clear",
    "sync.pull_interval_secs              - Seconds between pulls",
    "sync.quiescence_ms                   - Idle time before a local edit is pushed",
    "sync.max_concurrency                 - Concurrent hashing and scan tasks",
    "sync.keep_revisions_forever          - true|false",
    "sync.duplicate_cleanup_interval_secs - Seconds between duplicate cleanups",
    "sync.state_db                        - State database path",
    "selective.sync_<category>            - images|audio|videos|pdfs|other_types",
    "selective.sync_<setting>             - app_settings|appearance|hotkeys|...",
    "selective.max_file_size_mb           - Size limit in MiB, 'none' to clear",
    "selective.excluded_folders           - Comma-separated folder list",
    "conflicts.markdown_strategy          - auto_merge|conflict_file|local_wins|remote_wins",
    "conflicts.binary_strategy            - last_modified_wins|conflict_file",
    "retry.max_attempts",
    "retry.base_delay_ms",
    "retry.max_delay_ms",
    "logging.level                        - trace|debug|info|warn|error",
    "logging.json                         - true|false",
];

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| anyhow!("'{}' is not a valid value for {}", value, key))
}

fn parse_optional<T: FromStr>(key: &str, value: &str) -> Result<Option<T>> {
    match value {
        "none" | "" => Ok(None),
        other => parse(key, other).map(Some),
    }
}

/// Strategy enums use their snake_case serde names
fn parse_enum<T: serde::de::DeserializeOwned>(key: &str, value: &str) -> Result<T> {
    serde_yaml::from_str(value).map_err(|_| anyhow!("'{}' is not a valid value for {}", value, key))
}

/// Apply a dot-notation key/value pair to a Config struct
fn apply_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let sync = &mut config.sync;
    let selective = &mut config.selective;
    match key {
        // --- sync ---
        "sync.vault_root" => sync.vault_root = PathBuf::from(value),
        "sync.config_dir" => sync.config_dir = value.to_string(),
        "sync.remote_folder_id" => sync.remote_folder_id = parse_optional(key, value)?,
        "sync.pull_interval_secs" => sync.pull_interval_secs = parse(key, value)?,
        "sync.quiescence_ms" => sync.quiescence_ms = parse(key, value)?,
        "sync.max_concurrency" => sync.max_concurrency = parse(key, value)?,
        "sync.keep_revisions_forever" => sync.keep_revisions_forever = parse(key, value)?,
        "sync.duplicate_cleanup_interval_secs" => {
            sync.duplicate_cleanup_interval_secs = parse(key, value)?
        }
        "sync.state_db" => sync.state_db = PathBuf::from(value),

        // --- selective ---
        "selective.sync_images" => selective.sync_images = parse(key, value)?,
        "selective.sync_audio" => selective.sync_audio = parse(key, value)?,
        "selective.sync_videos" => selective.sync_videos = parse(key, value)?,
        "selective.sync_pdfs" => selective.sync_pdfs = parse(key, value)?,
        "selective.sync_other_types" => selective.sync_other_types = parse(key, value)?,
        "selective.sync_app_settings" => selective.sync_app_settings = parse(key, value)?,
        "selective.sync_appearance" => selective.sync_appearance = parse(key, value)?,
        "selective.sync_hotkeys" => selective.sync_hotkeys = parse(key, value)?,
        "selective.sync_core_plugin_settings" => {
            selective.sync_core_plugin_settings = parse(key, value)?
        }
        "selective.sync_community_plugin_list" => {
            selective.sync_community_plugin_list = parse(key, value)?
        }
        "selective.sync_community_plugins" => {
            selective.sync_community_plugins = parse(key, value)?
        }
        "selective.sync_snippets" => selective.sync_snippets = parse(key, value)?,
        "selective.sync_themes" => selective.sync_themes = parse(key, value)?,
        "selective.max_file_size_mb" => selective.max_file_size_mb = parse_optional(key, value)?,
        "selective.excluded_folders" => {
            selective.excluded_folders = value
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(String::from)
                .collect()
        }

        // --- conflicts ---
        "conflicts.markdown_strategy" => {
            config.conflicts.markdown_strategy = parse_enum::<MarkdownStrategy>(key, value)?
        }
        "conflicts.binary_strategy" => {
            config.conflicts.binary_strategy = parse_enum::<BinaryStrategy>(key, value)?
        }

        // --- retry ---
        "retry.max_attempts" => config.retry.max_attempts = parse(key, value)?,
        "retry.base_delay_ms" => config.retry.base_delay_ms = parse(key, value)?,
        "retry.max_delay_ms" => config.retry.max_delay_ms = parse(key, value)?,

        // --- logging ---
        "logging.level" => config.logging.level = value.to_string(),
        "logging.json" => config.logging.json = parse(key, value)?,

        _ => bail!("Unknown configuration key: '{}'", key),
    }
    Ok(())
}
