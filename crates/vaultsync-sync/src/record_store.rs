//! SyncRecordStore - per-path sync state
//!
//! Records live in memory, keyed by canonical path with a reverse index by
//! remote id. Mutations only become durable when [`SyncRecordStore::save`]
//! writes the whole snapshot through the state repository. There is no
//! rollback: a caller that mutates a record before a remote call must undo
//! the mutation itself if the call fails.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::debug;

use vaultsync_core::domain::{
    PageToken, RecordSnapshot, RecordStatus, RemoteId, SyncMeta, SyncRecord, VaultPath,
};
use vaultsync_core::ports::IStateRepository;

pub struct SyncRecordStore {
    repo: Arc<dyn IStateRepository>,
    records: HashMap<VaultPath, SyncRecord>,
    by_remote: HashMap<RemoteId, VaultPath>,
    meta: SyncMeta,
    dirty: bool,
}

impl SyncRecordStore {
    /// An empty store; call [`load`](Self::load) to read persisted state
    pub fn new(repo: Arc<dyn IStateRepository>) -> Self {
        Self {
            repo,
            records: HashMap::new(),
            by_remote: HashMap::new(),
            meta: SyncMeta::default(),
            dirty: false,
        }
    }

    /// Replace the in-memory state with the persisted snapshot
    pub async fn load(&mut self) -> anyhow::Result<()> {
        let snapshot = self
            .repo
            .load_snapshot()
            .await
            .context("Failed to load record snapshot")?;

        self.records.clear();
        self.by_remote.clear();
        for record in snapshot.records {
            self.insert(record);
        }
        self.meta = snapshot.meta;
        self.dirty = false;

        debug!(records = self.records.len(), "Record store loaded");
        Ok(())
    }

    /// Persist every in-memory mutation
    pub async fn save(&mut self) -> anyhow::Result<()> {
        self.repo
            .save_snapshot(&self.snapshot())
            .await
            .context("Failed to save record snapshot")?;
        self.dirty = false;
        Ok(())
    }

    /// Save only when something changed since the last save
    pub async fn save_if_dirty(&mut self) -> anyhow::Result<()> {
        if self.dirty {
            self.save().await?;
        }
        Ok(())
    }

    pub fn get(&self, path: &VaultPath) -> Option<&SyncRecord> {
        self.records.get(path)
    }

    pub fn get_by_remote_id(&self, id: &RemoteId) -> Option<&SyncRecord> {
        self.by_remote.get(id).and_then(|path| self.records.get(path))
    }

    /// Insert or replace the record for its path
    ///
    /// A record already holding the same remote id under another path is
    /// dropped, so each remote file maps to at most one path.
    pub fn set(&mut self, record: SyncRecord) -> Option<SyncRecord> {
        if let Some(other) = self.by_remote.get(record.remote_id()).cloned() {
            if &other != record.path() {
                debug!(from = %other, to = %record.path(), "Remote id moved to a new path");
                self.records.remove(&other);
            }
        }
        self.dirty = true;
        self.insert(record)
    }

    fn insert(&mut self, record: SyncRecord) -> Option<SyncRecord> {
        let previous = self.records.insert(record.path().clone(), record.clone());
        if let Some(prev) = &previous {
            if prev.remote_id() != record.remote_id() {
                self.by_remote.remove(prev.remote_id());
            }
        }
        self.by_remote
            .insert(record.remote_id().clone(), record.path().clone());
        previous
    }

    pub fn delete(&mut self, path: &VaultPath) -> Option<SyncRecord> {
        let removed = self.records.remove(path)?;
        self.by_remote.remove(removed.remote_id());
        self.dirty = true;
        Some(removed)
    }

    /// Apply `f` to the record at `path` in place
    pub fn update<F>(&mut self, path: &VaultPath, f: F) -> bool
    where
        F: FnOnce(&mut SyncRecord),
    {
        match self.records.get_mut(path) {
            Some(record) => {
                let before = record.remote_id().clone();
                f(record);
                let after = record.remote_id().clone();
                if before != after {
                    self.by_remote.remove(&before);
                    self.by_remote.insert(after, path.clone());
                }
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Move a record to a new path
    pub fn relocate(&mut self, from: &VaultPath, to: VaultPath) -> bool {
        let Some(mut record) = self.delete(from) else {
            return false;
        };
        record.relocate(to);
        self.set(record);
        true
    }

    /// Forget every record and all change-feed metadata
    pub fn reset(&mut self) {
        self.records.clear();
        self.by_remote.clear();
        self.meta = SyncMeta::default();
        self.dirty = true;
    }

    /// All records sorted by path
    pub fn records(&self) -> Vec<SyncRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.path().cmp(b.path()));
        records
    }

    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            records: self.records(),
            meta: self.meta.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True if any record is flagged as conflicted
    pub fn has_conflicts(&self) -> bool {
        self.records
            .values()
            .any(|r| r.status() == RecordStatus::Conflict)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    pub fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    pub fn page_token(&self) -> Option<&PageToken> {
        self.meta.page_token.as_ref()
    }

    pub fn set_page_token(&mut self, token: Option<PageToken>) {
        self.meta.page_token = token;
        self.dirty = true;
    }

    pub fn remote_root_id(&self) -> Option<&RemoteId> {
        self.meta.remote_root_id.as_ref()
    }

    pub fn set_remote_root_id(&mut self, id: RemoteId) {
        self.meta.remote_root_id = Some(id);
        self.dirty = true;
    }

    /// Remote id of the folder at vault path `dir`
    pub fn folder_id(&self, dir: &str) -> Option<&RemoteId> {
        self.meta.folder_ids.get(dir)
    }

    pub fn set_folder_id(&mut self, dir: impl Into<String>, id: RemoteId) {
        self.meta.folder_ids.insert(dir.into(), id);
        self.dirty = true;
    }

    pub fn remove_folder_id(&mut self, dir: &str) {
        if self.meta.folder_ids.remove(dir).is_some() {
            self.dirty = true;
        }
    }

    /// Vault path of the folder with remote id `id`
    pub fn folder_path(&self, id: &RemoteId) -> Option<&str> {
        self.meta
            .folder_ids
            .iter()
            .find(|(_, folder)| *folder == id)
            .map(|(path, _)| path.as_str())
    }

    pub fn set_last_full_resync(&mut self, at: DateTime<Utc>) {
        self.meta.last_full_resync = Some(at);
        self.dirty = true;
    }

    pub fn set_last_duplicate_cleanup(&mut self, at: DateTime<Utc>) {
        self.meta.last_duplicate_cleanup = Some(at);
        self.dirty = true;
    }
}
