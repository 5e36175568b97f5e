//! SQLite implementation of [`IStateRepository`]
//!
//! The record snapshot is stored as one row per record plus a small
//! key/value table for the change-feed metadata. Saving a snapshot rewrites
//! both tables inside a single transaction so a crash never leaves a mix of
//! old and new records behind.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use vaultsync_core::domain::{
    ActivityAction, ActivityLogEntry, ContentHash, PageToken, RecordSnapshot, RecordStatus,
    RemoteId, SyncMeta, SyncRecord, VaultPath,
};
use vaultsync_core::ports::IStateRepository;

use crate::CacheError;

const META_PAGE_TOKEN: &str = "page_token";
const META_REMOTE_ROOT: &str = "remote_root_id";
const META_FOLDER_IDS: &str = "folder_ids";
const META_LAST_RESYNC: &str = "last_full_resync";
const META_LAST_CLEANUP: &str = "last_duplicate_cleanup";

/// State repository backed by a SQLite pool
pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of stored records, without loading them
    pub async fn record_count(&self) -> Result<u64, CacheError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sync_records")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    async fn load_meta(&self) -> Result<SyncMeta, CacheError> {
        let rows = sqlx::query("SELECT key, value FROM sync_meta")
            .fetch_all(&self.pool)
            .await?;

        let mut meta = SyncMeta::default();
        for row in &rows {
            let key: String = row.get("key");
            let value: String = row.get("value");
            match key.as_str() {
                META_PAGE_TOKEN => meta.page_token = Some(PageToken::new(value)?),
                META_REMOTE_ROOT => meta.remote_root_id = Some(RemoteId::new(value)?),
                META_FOLDER_IDS => {
                    meta.folder_ids = serde_json::from_str::<BTreeMap<String, RemoteId>>(&value)
                        .map_err(|e| {
                            CacheError::SerializationError(format!("folder ids: {}", e))
                        })?;
                }
                META_LAST_RESYNC => meta.last_full_resync = Some(parse_datetime(&value)?),
                META_LAST_CLEANUP => meta.last_duplicate_cleanup = Some(parse_datetime(&value)?),
                other => tracing::debug!(key = other, "Ignoring unknown meta key"),
            }
        }
        Ok(meta)
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CacheError::SerializationError(format!("timestamp '{}': {}", s, e)))
}

fn record_from_row(row: &SqliteRow) -> Result<SyncRecord, CacheError> {
    let path: String = row.get("path");
    let remote_id: String = row.get("remote_id");
    let local_hash: String = row.get("local_hash");
    let remote_hash: String = row.get("remote_hash");
    let last_synced: String = row.get("last_synced");
    let status: String = row.get("status");

    Ok(SyncRecord::from_parts(
        VaultPath::new(path)?,
        RemoteId::new(remote_id)?,
        ContentHash::new(local_hash)?,
        ContentHash::new(remote_hash)?,
        parse_datetime(&last_synced)?,
        status.parse::<RecordStatus>()?,
    )?)
}

fn activity_from_row(row: &SqliteRow) -> Result<ActivityLogEntry, CacheError> {
    let id: i64 = row.get("id");
    let timestamp: String = row.get("timestamp");
    let action: String = row.get("action");
    let path: String = row.get("path");
    let detail: String = row.get("detail");
    let error: Option<String> = row.get("error");

    Ok(ActivityLogEntry::new(
        id as u64,
        parse_datetime(&timestamp)?,
        action.parse::<ActivityAction>()?,
        path,
        detail,
        error,
    ))
}

fn meta_rows(meta: &SyncMeta) -> Result<Vec<(&'static str, String)>, CacheError> {
    let mut rows = Vec::new();
    if let Some(token) = &meta.page_token {
        rows.push((META_PAGE_TOKEN, token.as_str().to_string()));
    }
    if let Some(root) = &meta.remote_root_id {
        rows.push((META_REMOTE_ROOT, root.as_str().to_string()));
    }
    if !meta.folder_ids.is_empty() {
        let json = serde_json::to_string(&meta.folder_ids)
            .map_err(|e| CacheError::SerializationError(format!("folder ids: {}", e)))?;
        rows.push((META_FOLDER_IDS, json));
    }
    if let Some(at) = meta.last_full_resync {
        rows.push((META_LAST_RESYNC, at.to_rfc3339()));
    }
    if let Some(at) = meta.last_duplicate_cleanup {
        rows.push((META_LAST_CLEANUP, at.to_rfc3339()));
    }
    Ok(rows)
}

#[async_trait::async_trait]
impl IStateRepository for SqliteStateRepository {
    async fn load_snapshot(&self) -> anyhow::Result<RecordSnapshot> {
        let rows = sqlx::query("SELECT * FROM sync_records ORDER BY path ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(record_from_row(row)?);
        }
        let meta = self.load_meta().await?;

        tracing::debug!(records = records.len(), "Loaded record snapshot");
        Ok(RecordSnapshot { records, meta })
    }

    async fn save_snapshot(&self, snapshot: &RecordSnapshot) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sync_records")
            .execute(&mut *tx)
            .await?;
        for record in &snapshot.records {
            sqlx::query(
                "INSERT INTO sync_records \
                 (path, remote_id, local_hash, remote_hash, last_synced, status) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(record.path().as_str())
            .bind(record.remote_id().as_str())
            .bind(record.local_hash().as_str())
            .bind(record.remote_hash().as_str())
            .bind(record.last_synced().to_rfc3339())
            .bind(record.status().as_str())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM sync_meta").execute(&mut *tx).await?;
        for (key, value) in meta_rows(&snapshot.meta)? {
            sqlx::query("INSERT INTO sync_meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::trace!(records = snapshot.records.len(), "Saved record snapshot");
        Ok(())
    }

    async fn append_activity(&self, entry: &ActivityLogEntry) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO activity_log (id, timestamp, action, path, detail, error) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id() as i64)
        .bind(entry.timestamp().to_rfc3339())
        .bind(entry.action().as_str())
        .bind(entry.path())
        .bind(entry.detail())
        .bind(entry.error())
        .execute(&self.pool)
        .await?;

        tracing::trace!(id = entry.id(), action = %entry.action(), "Appended activity entry");
        Ok(())
    }

    async fn list_activity(&self, limit: Option<usize>) -> anyhow::Result<Vec<ActivityLogEntry>> {
        let rows = match limit {
            Some(n) => {
                sqlx::query(
                    "SELECT * FROM (SELECT * FROM activity_log ORDER BY id DESC LIMIT ?) \
                     ORDER BY id ASC",
                )
                .bind(n as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM activity_log ORDER BY id ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(activity_from_row(row)?);
        }
        Ok(entries)
    }
}
