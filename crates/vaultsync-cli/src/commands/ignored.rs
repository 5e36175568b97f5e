//! Ignored command - list local files that selective sync leaves out
//!
//! Works offline: only the local vault is scanned.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use vaultsync_core::config::Config;
use vaultsync_sync::{list_local_ignored, ExclusionEngine, IgnoredFile, LocalVaultStore};

use super::load_config;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct IgnoredCommand {
    /// Include files that are always excluded (trash, OS metadata)
    #[arg(long)]
    pub all: bool,
}

impl IgnoredCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format);
        let config = load_config(config_path)?;
        let files = self.scan(&config).await?;
        info!(count = files.len(), "Listed ignored files");

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "vault_root": config.sync.vault_root.display().to_string(),
                "count": files.len(),
                "files": serde_json::to_value(&files)?,
            }));
            return Ok(());
        }

        if files.is_empty() {
            formatter.success("Every local file is synced");
            return Ok(());
        }
        let rows: Vec<Vec<String>> = files
            .iter()
            .map(|f| vec![f.path.as_str().to_string(), f.reason.to_string()])
            .collect();
        formatter.table(&["PATH", "REASON"], &rows);
        Ok(())
    }

    async fn scan(&self, config: &Config) -> Result<Vec<IgnoredFile>> {
        let root = &config.sync.vault_root;
        if !root.is_dir() {
            bail!("Vault root {} does not exist", root.display());
        }
        let local = LocalVaultStore::new(root.clone());
        let exclusions =
            ExclusionEngine::new(config.selective.clone(), config.sync.config_dir.clone());

        let mut files = list_local_ignored(&local, &exclusions)
            .await
            .context("Failed to scan the vault")?;
        if !self.all {
            files.retain(|f| f.reason.code() != "hard-excluded");
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultsync_core::domain::ExclusionReason;

    fn vault() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("img")).unwrap();
        std::fs::write(root.join("note.md"), "text\n").unwrap();
        std::fs::write(root.join("img/photo.png"), [1, 2, 3]).unwrap();
        std::fs::write(root.join(".DS_Store"), [0]).unwrap();

        let mut config = Config::default();
        config.sync.vault_root = root;
        config.selective.sync_images = false;
        (dir, config)
    }

    #[tokio::test]
    async fn test_disabled_type_is_listed() {
        let (_dir, config) = vault();
        let files = IgnoredCommand { all: false }.scan(&config).await.unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path.as_str(), "img/photo.png");
        assert!(matches!(files[0].reason, ExclusionReason::TypeDisabled { .. }));
    }

    #[tokio::test]
    async fn test_all_includes_hard_exclusions() {
        let (_dir, config) = vault();
        let files = IgnoredCommand { all: true }.scan(&config).await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.reason == ExclusionReason::HardExcluded));
    }

    #[tokio::test]
    async fn test_missing_vault_root() {
        let mut config = Config::default();
        config.sync.vault_root = "/nonexistent/vaultsync-test".into();
        assert!(IgnoredCommand { all: false }.scan(&config).await.is_err());
    }
}
