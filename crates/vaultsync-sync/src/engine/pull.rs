//! Pull phase: apply the remote change feed locally
//!
//! Each changed file is resolved to a vault path through the folder map.
//! Files whose local copy diverged since the last sync are not written;
//! they become pending conflicts for the resolve phase. The change-feed
//! cursor only advances when every file in the batch was handled.

use chrono::Utc;
use tracing::{debug, info, instrument, trace, warn};

use vaultsync_core::domain::{
    ActivityAction, ConflictInfo, ContentHash, QueueAction, RecordStatus, RemoteId,
    SyncQueueEntry, SyncRecord, VaultPath,
};
use vaultsync_core::ports::{NullProgress, RemoteFile};

use super::resolve::PendingConflict;
use super::{cycle_failure, reason_for, CycleReport, SyncEngine};
use crate::remote_tree::{apply_folder_changes, is_under, path_of, FolderChange};
use crate::retry::{classify, FailureKind};
use crate::SyncError;

/// What the local side looks like relative to a downloaded remote version
enum LocalSide {
    /// No local file
    Absent,
    /// Local file already holds the remote content
    Same,
    /// Local file unchanged since the last sync
    Untouched,
    /// Local file changed independently
    Diverged(ContentHash),
}

impl SyncEngine {
    #[instrument(skip(self, report))]
    pub(super) async fn pull_phase(
        &mut self,
        root: &RemoteId,
        report: &mut CycleReport,
    ) -> Result<(), SyncError> {
        let Some(cursor) = self.store.page_token().cloned() else {
            info!("No change-feed cursor, reconciling from a full listing");
            self.rescan(root, report, &NullProgress, None).await?;
            return Ok(());
        };

        let cursor_ref = &cursor;
        let page = self
            .call_remote("list_changed_files", |remote, token| async move {
                remote
                    .list_changed_files(&token, root, Some(cursor_ref))
                    .await
            })
            .await
            .map_err(cycle_failure)?;
        debug!(changes = page.files.len(), "Remote changes received");

        for change in apply_folder_changes(&mut self.store, root, &page.files) {
            match change {
                FolderChange::Moved { from, to } => {
                    self.apply_remote_folder_move(&from, &to, report).await
                }
                FolderChange::Removed { path } => {
                    self.apply_remote_folder_removal(&path, report).await
                }
                FolderChange::Added { .. } => {}
            }
        }

        let mut clean = true;
        for file in page.files.iter().filter(|f| !f.is_folder) {
            if let Err(err) = self.apply_remote_change(root, file, report).await {
                if classify(&err) == FailureKind::Unauthorized {
                    return Err(SyncError::AuthRequired);
                }
                clean = false;
                report.errors += 1;
                let path = path_of(&self.store, root, file)
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| file.name.clone());
                warn!(path = %path, error = %err, "Failed to apply remote change");
                self.ledger
                    .record_failure(&path, reason_for(&err), "pull failed", format!("{err:#}"))
                    .await;
            }
        }

        if clean {
            self.store.set_page_token(page.next_page_token);
        } else {
            warn!("Keeping the change-feed cursor so failed files are fetched again");
        }
        self.store.save().await.map_err(SyncError::Io)?;
        Ok(())
    }

    /// Apply one changed (non-folder) remote item
    async fn apply_remote_change(
        &mut self,
        root: &RemoteId,
        file: &RemoteFile,
        report: &mut CycleReport,
    ) -> anyhow::Result<()> {
        let existing = self.store.get_by_remote_id(&file.id).cloned();
        let target = if file.is_gone() {
            None
        } else {
            path_of(&self.store, root, file)
        };

        let Some(path) = target else {
            if let Some(record) = existing {
                self.apply_remote_delete(record, report).await?;
            }
            return Ok(());
        };

        if let Some(reason) = self.exclusions.reason(&path, Some(file.size)) {
            trace!(path = %path, reason = %reason, "Remote change excluded");
            if let Some(record) = existing {
                // moved out of the synced set
                info!(from = %record.path(), to = %path, "Tracked file moved into an excluded path");
                self.apply_remote_delete(record, report).await?;
            }
            return Ok(());
        }

        if let Some(record) = &existing {
            if record.path() != &path {
                self.apply_remote_move(record, &path, report).await?;
            }
        }

        let record = self.store.get(&path).cloned();
        if let Some(record) = &record {
            if record.remote_id() != &file.id {
                debug!(
                    path = %path,
                    id = %file.id,
                    "Second remote file for a tracked path, left for duplicate cleanup"
                );
                return Ok(());
            }
            if file.content_hash.as_ref() == Some(record.remote_hash()) {
                return Ok(());
            }
        }

        let id = &file.id;
        let data = self
            .call_remote("download_file", |remote, token| async move {
                remote.download_file(&token, id).await
            })
            .await?;
        let remote_hash = ContentHash::of_bytes(&data);
        if record
            .as_ref()
            .is_some_and(|r| r.remote_hash() == &remote_hash)
        {
            return Ok(());
        }

        match self.local_side(&path, record.as_ref(), &remote_hash).await? {
            LocalSide::Absent | LocalSide::Untouched => {
                if self.queue.remove(&path).is_some() {
                    info!(path = %path, "Remote edit restores a locally deleted file");
                }
                self.ports.local.write(&path, &data).await?;
                self.store.set(SyncRecord::synced(
                    path.clone(),
                    file.id.clone(),
                    remote_hash,
                    Utc::now(),
                ));
                self.ledger
                    .record(ActivityAction::Download, path.as_str(), "pulled remote change")
                    .await;
                report.pulled += 1;
            }
            LocalSide::Same => {
                self.queue.remove(&path);
                self.store.set(SyncRecord::synced(
                    path.clone(),
                    file.id.clone(),
                    remote_hash,
                    Utc::now(),
                ));
            }
            LocalSide::Diverged(local_hash) => {
                let local_modified = self
                    .ports
                    .local
                    .stat(&path)
                    .await?
                    .map(|e| e.modified)
                    .unwrap_or_else(Utc::now);
                info!(path = %path, "Local and remote both changed");
                self.conflicts.push(PendingConflict {
                    info: ConflictInfo {
                        path,
                        local_hash,
                        remote_hash,
                        base_hash: record.map(|r| r.remote_hash().clone()),
                        local_modified,
                        remote_modified: file.modified,
                        resolution: None,
                    },
                    remote_id: file.id.clone(),
                    remote: data,
                });
                report.conflicts += 1;
            }
        }
        Ok(())
    }

    async fn local_side(
        &self,
        path: &VaultPath,
        record: Option<&SyncRecord>,
        remote_hash: &ContentHash,
    ) -> anyhow::Result<LocalSide> {
        if self.ports.local.stat(path).await?.is_none() {
            return Ok(LocalSide::Absent);
        }
        let local_hash = self.ports.local.content_hash(path).await?;
        if &local_hash == remote_hash {
            return Ok(LocalSide::Same);
        }
        let untouched = record.is_some_and(|r| {
            r.local_hash() == &local_hash
                && r.status() == RecordStatus::Synced
                && !self.queue.contains(path)
        });
        Ok(if untouched {
            LocalSide::Untouched
        } else {
            LocalSide::Diverged(local_hash)
        })
    }

    /// The remote file was trashed, removed, or moved out of the vault
    ///
    /// A local copy with unpushed edits survives and is uploaded again.
    async fn apply_remote_delete(
        &mut self,
        record: SyncRecord,
        report: &mut CycleReport,
    ) -> anyhow::Result<()> {
        let path = record.path().clone();
        let pending = self.queue.remove(&path);

        let local_hash = match self.ports.local.stat(&path).await? {
            Some(_) => Some(self.ports.local.content_hash(&path).await?),
            None => None,
        };
        self.store.delete(&path);

        match local_hash {
            None => {
                debug!(path = %path, "Remote delete of a file already gone locally");
            }
            Some(hash)
                if hash != *record.local_hash()
                    || !record.is_synced()
                    || pending
                        .as_ref()
                        .is_some_and(|e| e.action != QueueAction::Delete) =>
            {
                info!(path = %path, "Remote delete of a locally edited file, keeping local copy");
                self.queue.enqueue(SyncQueueEntry::new(
                    QueueAction::Create,
                    path.clone(),
                    Some(hash),
                    Utc::now(),
                ));
                self.ledger
                    .record(
                        ActivityAction::Conflict,
                        path.as_str(),
                        "deleted remotely; local edits kept and uploaded again",
                    )
                    .await;
                report.conflicts += 1;
            }
            Some(_) => {
                self.ports.local.remove(&path).await?;
                self.ledger
                    .record(ActivityAction::Delete, path.as_str(), "deleted remotely")
                    .await;
                report.pulled += 1;
            }
        }
        Ok(())
    }

    /// The remote file now lives at `to`
    async fn apply_remote_move(
        &mut self,
        record: &SyncRecord,
        to: &VaultPath,
        report: &mut CycleReport,
    ) -> anyhow::Result<()> {
        let from = record.path();
        if self.ports.local.stat(to).await?.is_some() {
            warn!(from = %from, to = %to, "Remote move target exists locally, keeping both");
        } else if self.ports.local.stat(from).await?.is_some() {
            self.ports.local.rename(from, to).await?;
        }
        self.store.relocate(from, to.clone());
        self.queue.rekey(from, to);
        self.ledger
            .record(
                ActivityAction::Rename,
                to.as_str(),
                format!("moved remotely from {from}"),
            )
            .await;
        report.pulled += 1;
        Ok(())
    }

    async fn apply_remote_folder_move(&mut self, from: &str, to: &str, report: &mut CycleReport) {
        let moved: Vec<VaultPath> = self
            .store
            .records()
            .into_iter()
            .map(|r| r.path().clone())
            .filter(|p| is_under(p.as_str(), from))
            .collect();

        if let (Ok(src), Ok(dst)) = (VaultPath::new(from), VaultPath::new(to)) {
            if let Err(e) = self.ports.local.rename(&src, &dst).await {
                debug!(from, to, error = %e, "Local folder not renamed");
            }
        }

        for old in moved {
            let Ok(new) = VaultPath::new(format!("{to}{}", &old.as_str()[from.len()..])) else {
                continue;
            };
            self.store.relocate(&old, new.clone());
            self.queue.rekey(&old, &new);
        }
        self.ledger
            .record(
                ActivityAction::Rename,
                to,
                format!("folder moved remotely from {from}"),
            )
            .await;
        report.pulled += 1;
    }

    async fn apply_remote_folder_removal(&mut self, dir: &str, report: &mut CycleReport) {
        let removed: Vec<SyncRecord> = self
            .store
            .records()
            .into_iter()
            .filter(|r| is_under(r.path().as_str(), dir))
            .collect();
        debug!(dir, files = removed.len(), "Remote folder removed");

        for record in removed {
            let path = record.path().to_string();
            if let Err(err) = self.apply_remote_delete(record, report).await {
                report.errors += 1;
                self.ledger
                    .record_failure(
                        &path,
                        reason_for(&err),
                        "remote folder removal failed",
                        format!("{err:#}"),
                    )
                    .await;
            }
        }
    }
}
