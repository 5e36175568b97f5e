//! Subcommand implementations

pub mod activity;
pub mod check;
pub mod config;
pub mod ignored;
pub mod markers;
pub mod records;

use std::path::Path;

use anyhow::{Context, Result};
use vaultsync_cache::{DatabasePool, SqliteStateRepository};
use vaultsync_core::config::Config;

/// Load the configuration at `path`, falling back to defaults when the file
/// does not exist
pub(crate) fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No configuration file, using defaults");
        return Ok(Config::default());
    }
    Config::load(path).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Open the device state database, `None` if no sync has run yet
pub(crate) async fn open_state(config: &Config) -> Result<Option<SqliteStateRepository>> {
    let db_path = &config.sync.state_db;
    if !db_path.exists() {
        return Ok(None);
    }
    let pool = DatabasePool::new(db_path)
        .await
        .context("Failed to open state database")?;
    Ok(Some(SqliteStateRepository::new(pool.pool().clone())))
}
