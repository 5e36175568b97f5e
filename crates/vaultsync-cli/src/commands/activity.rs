//! Activity command - read the activity ledger from the state database

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::info;

use vaultsync_audit::{ActivityLedger, ReasonCode};
use vaultsync_core::config::Config;
use vaultsync_core::domain::ActivityLogEntry;

use super::{load_config, open_state};
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct ActivityCommand {
    /// Maximum number of entries to show
    #[arg(long, default_value = "50")]
    pub limit: usize,

    /// Only show failures
    #[arg(long)]
    pub errors: bool,
}

impl ActivityCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format);
        let config = load_config(config_path)?;

        let Some(entries) = self.load_entries(&config).await? else {
            formatter.error("No state database found. Run a sync first.");
            return Ok(());
        };
        info!(count = entries.len(), "Retrieved activity entries");

        if format.is_json() {
            let json: Vec<serde_json::Value> = entries
                .iter()
                .map(|entry| {
                    let reason = entry.error().and_then(ReasonCode::from_annotated);
                    serde_json::json!({
                        "id": entry.id(),
                        "timestamp": entry.timestamp().to_rfc3339(),
                        "action": entry.action().as_str(),
                        "path": entry.path(),
                        "detail": entry.detail(),
                        "error": entry.error(),
                        "reason": reason.map(|r| r.as_str()),
                    })
                })
                .collect();
            formatter.print_json(&serde_json::json!({
                "count": entries.len(),
                "entries": json,
            }));
            return Ok(());
        }

        if entries.is_empty() {
            formatter.info("No activity recorded yet.");
            return Ok(());
        }

        let rows: Vec<Vec<String>> = entries.iter().map(entry_row).collect();
        formatter.table(&["TIME", "ACTION", "PATH", "DETAIL"], &rows);
        Ok(())
    }

    /// Newest `limit` entries in id order, `None` when there is no database
    async fn load_entries(&self, config: &Config) -> Result<Option<Vec<ActivityLogEntry>>> {
        let Some(repo) = open_state(config).await? else {
            return Ok(None);
        };
        let mut ledger = ActivityLedger::new(Arc::new(repo));
        ledger.load().await;

        let entries = if self.errors {
            let failures: Vec<_> = ledger
                .entries()
                .into_iter()
                .filter(|e| e.is_error())
                .collect();
            let start = failures.len().saturating_sub(self.limit);
            failures[start..].to_vec()
        } else {
            ledger.recent(self.limit).to_vec()
        };
        Ok(Some(entries))
    }
}

fn entry_row(entry: &ActivityLogEntry) -> Vec<String> {
    let detail = match entry.error() {
        Some(error) => format!("failed: {}", error),
        None => entry.detail().to_string(),
    };
    vec![
        entry.timestamp().format("%Y-%m-%d %H:%M:%S").to_string(),
        entry.action().to_string(),
        entry.path().to_string(),
        detail,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultsync_cache::{DatabasePool, SqliteStateRepository};
    use vaultsync_core::domain::ActivityAction;

    async fn seeded_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.sync.state_db = dir.join("state.db");

        let pool = DatabasePool::new(&config.sync.state_db).await.unwrap();
        let repo = Arc::new(SqliteStateRepository::new(pool.pool().clone()));
        let mut ledger = ActivityLedger::new(repo);
        ledger.record(ActivityAction::Upload, "a.md", "created").await;
        ledger
            .record_failure(
                "b.md",
                ReasonCode::RetriesExhausted,
                "upload",
                "server unavailable",
            )
            .await;
        ledger.record(ActivityAction::Download, "c.md", "pulled").await;
        pool.close().await;
        config
    }

    #[tokio::test]
    async fn test_recent_entries_are_limited() {
        let dir = tempfile::tempdir().unwrap();
        let config = seeded_config(dir.path()).await;
        let cmd = ActivityCommand {
            limit: 2,
            errors: false,
        };

        let entries = cmd.load_entries(&config).await.unwrap().unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path()).collect();
        assert_eq!(paths, vec!["b.md", "c.md"]);
    }

    #[tokio::test]
    async fn test_errors_filter() {
        let dir = tempfile::tempdir().unwrap();
        let config = seeded_config(dir.path()).await;
        let cmd = ActivityCommand {
            limit: 50,
            errors: true,
        };

        let entries = cmd.load_entries(&config).await.unwrap().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].error().and_then(ReasonCode::from_annotated),
            Some(ReasonCode::RetriesExhausted)
        );
    }

    #[tokio::test]
    async fn test_no_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.sync.state_db = dir.path().join("missing.db");
        let cmd = ActivityCommand {
            limit: 10,
            errors: false,
        };
        assert!(cmd.load_entries(&config).await.unwrap().is_none());
    }

    #[test]
    fn test_failed_entry_row_shows_error() {
        let entry = ActivityLogEntry::new(
            7,
            chrono::Utc::now(),
            ActivityAction::Error,
            "x.md",
            "",
            Some("quota_exceeded: storage full".into()),
        );
        let row = entry_row(&entry);
        assert_eq!(row[1], "error");
        assert_eq!(row[3], "failed: quota_exceeded: storage full");
    }
}
