//! Check command - explain whether a path takes part in sync

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use vaultsync_core::config::Config;
use vaultsync_core::domain::{ExclusionReason, FileCategory, VaultPath};
use vaultsync_sync::ExclusionEngine;

use super::load_config;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct CheckCommand {
    /// Vault-relative path, e.g. "notes/today.md"
    pub path: String,

    /// File size in bytes, to apply the size limit
    #[arg(long)]
    pub size: Option<u64>,
}

impl CheckCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format);
        let config = load_config(config_path)?;

        let path = VaultPath::new(self.path.as_str())
            .with_context(|| format!("Invalid vault path: '{}'", self.path))?;
        let verdict = evaluate(&config, &path, self.size);
        info!(path = path.as_str(), excluded = verdict.is_some(), "Checked path");

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "path": path.as_str(),
                "category": FileCategory::of(&path).to_string(),
                "synced": verdict.is_none(),
                "reason": verdict.as_ref().map(|r| r.code()),
                "explanation": verdict.as_ref().map(|r| r.to_string()),
            }));
            return Ok(());
        }

        match verdict {
            None => formatter.success(&format!("{} is synced", path.as_str())),
            Some(reason) => {
                formatter.warn(&format!("{} is not synced", path.as_str()));
                formatter.info(&format!("Reason: {} ({})", reason, reason.code()));
            }
        }
        formatter.info(&format!("Category: {}", FileCategory::of(&path)));
        Ok(())
    }
}

fn evaluate(config: &Config, path: &VaultPath, size: Option<u64>) -> Option<ExclusionReason> {
    ExclusionEngine::new(config.selective.clone(), config.sync.config_dir.clone())
        .reason(path, size)
}
