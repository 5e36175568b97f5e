//! Records command - list the per-file sync records of this device

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use vaultsync_core::domain::{RecordSnapshot, RecordStatus, SyncRecord};
use vaultsync_core::ports::IStateRepository;

use super::{load_config, open_state};
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct RecordsCommand {
    /// Only list records in this state (synced, pending_push, pending_pull, conflict)
    #[arg(long)]
    pub status: Option<RecordStatus>,
}

impl RecordsCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format);
        let config = load_config(config_path)?;

        let Some(repo) = open_state(&config).await? else {
            formatter.error("No state database found. Run a sync first.");
            return Ok(());
        };
        let snapshot = repo
            .load_snapshot()
            .await
            .context("Failed to load sync records")?;
        let records = self.select(&snapshot);
        info!(total = snapshot.records.len(), shown = records.len(), "Loaded sync records");

        if format.is_json() {
            let json: Vec<serde_json::Value> = records
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "path": r.path().as_str(),
                        "remote_id": r.remote_id().as_str(),
                        "status": r.status().as_str(),
                        "local_hash": r.local_hash().as_str(),
                        "remote_hash": r.remote_hash().as_str(),
                        "last_synced": r.last_synced().to_rfc3339(),
                    })
                })
                .collect();
            formatter.print_json(&serde_json::json!({
                "remote_folder_id": snapshot.meta.remote_root_id.as_ref().map(|id| id.as_str()),
                "has_page_token": snapshot.meta.page_token.is_some(),
                "last_full_resync": snapshot.meta.last_full_resync.map(|t| t.to_rfc3339()),
                "last_duplicate_cleanup": snapshot.meta.last_duplicate_cleanup.map(|t| t.to_rfc3339()),
                "records": json,
            }));
            return Ok(());
        }

        match &snapshot.meta.remote_root_id {
            Some(id) => formatter.info(&format!("Remote folder: {}", id.as_str())),
            None => formatter.warn("No remote folder recorded yet"),
        }
        if records.is_empty() {
            formatter.info("No records.");
            return Ok(());
        }
        let rows: Vec<Vec<String>> = records
            .iter()
            .map(|r| {
                vec![
                    r.path().as_str().to_string(),
                    r.status().to_string(),
                    r.local_hash().short().to_string(),
                    r.last_synced().format("%Y-%m-%d %H:%M").to_string(),
                ]
            })
            .collect();
        formatter.table(&["PATH", "STATUS", "HASH", "LAST SYNCED"], &rows);

        let pending = snapshot.records.iter().filter(|r| !r.is_synced()).count();
        if pending > 0 {
            formatter.info("");
            formatter.info(&format!("{} of {} records need attention", pending, snapshot.records.len()));
        }
        Ok(())
    }

    fn select<'a>(&self, snapshot: &'a RecordSnapshot) -> Vec<&'a SyncRecord> {
        snapshot
            .records
            .iter()
            .filter(|r| self.status.map_or(true, |s| r.status() == s))
            .collect()
    }
}
