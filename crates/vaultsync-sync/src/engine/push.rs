//! Push phase: drain the change queue to the remote store
//!
//! Entries are processed oldest first. Content is always read fresh from
//! disk, so a file edited after it was queued is uploaded at its latest
//! state. Records are saved after every entry.

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use vaultsync_audit::ReasonCode;
use vaultsync_core::domain::{
    ActivityAction, ContentHash, QueueAction, RecordStatus, RemoteId, SyncQueueEntry, SyncRecord,
    VaultPath,
};

use super::{CycleReport, SyncEngine};
use crate::retry::{classify, FailureKind};
use crate::SyncError;

/// Why a queue entry could not be pushed
enum PushFailure {
    /// Reading or hashing the local file failed
    Local(anyhow::Error),
    /// The remote store refused or could not be reached
    Remote(anyhow::Error),
}

type PushResult = Result<(), PushFailure>;

impl SyncEngine {
    #[instrument(skip(self, report))]
    pub(super) async fn push_phase(
        &mut self,
        root: &RemoteId,
        report: &mut CycleReport,
    ) -> Result<(), SyncError> {
        let entries = self.queue.drain();
        if entries.is_empty() {
            return Ok(());
        }
        debug!(entries = entries.len(), "Pushing queued changes");

        let mut remaining = entries.into_iter();
        while let Some(entry) = remaining.next() {
            if self.quota_paused
                && matches!(entry.action, QueueAction::Create | QueueAction::Update)
            {
                self.queue.requeue(entry);
                continue;
            }

            match self.push_entry(root, &entry, report).await {
                Ok(()) => {}
                Err(PushFailure::Local(err)) => {
                    warn!(path = %entry.path, error = %err, "Local failure while pushing");
                    let path = entry.path.clone();
                    if let Err(dropped) = self.queue.record_failure(entry) {
                        report.errors += 1;
                        self.ledger
                            .record_failure(
                                path.as_str(),
                                ReasonCode::LocalIo,
                                format!(
                                    "{} dropped after {} attempts",
                                    dropped.action, dropped.retry_count
                                ),
                                format!("{err:#}"),
                            )
                            .await;
                    }
                }
                Err(PushFailure::Remote(err)) => match classify(&err) {
                    FailureKind::Unauthorized => {
                        self.queue.requeue(entry);
                        for rest in remaining {
                            self.queue.requeue(rest);
                        }
                        self.store.save().await.map_err(SyncError::Io)?;
                        return Err(SyncError::AuthRequired);
                    }
                    FailureKind::Quota => {
                        self.enter_storage_full();
                        report.storage_full = true;
                        let path = entry.path.clone();
                        self.queue.requeue(entry);
                        self.ledger
                            .record_failure(
                                path.as_str(),
                                ReasonCode::QuotaExceeded,
                                "uploads paused until storage is freed",
                                format!("{err:#}"),
                            )
                            .await;
                    }
                    FailureKind::Transient => {
                        report.errors += 1;
                        warn!(
                            path = %entry.path,
                            error = %err,
                            "Retries exhausted, dropping change"
                        );
                        self.ledger
                            .record_failure(
                                entry.path.as_str(),
                                ReasonCode::RetriesExhausted,
                                format!(
                                    "{} dropped after {} attempts",
                                    entry.action, self.config.retry.max_attempts
                                ),
                                format!("{err:#}"),
                            )
                            .await;
                    }
                    FailureKind::NotFound | FailureKind::Permanent => {
                        report.errors += 1;
                        warn!(
                            path = %entry.path,
                            error = %err,
                            "Change rejected by the remote store"
                        );
                        self.ledger
                            .record_failure(
                                entry.path.as_str(),
                                ReasonCode::PermanentRejection,
                                format!("{} rejected", entry.action),
                                format!("{err:#}"),
                            )
                            .await;
                    }
                },
            }
            self.store.save().await.map_err(SyncError::Io)?;
        }
        Ok(())
    }

    async fn push_entry(
        &mut self,
        root: &RemoteId,
        entry: &SyncQueueEntry,
        report: &mut CycleReport,
    ) -> PushResult {
        match (entry.action, &entry.old_path) {
            (QueueAction::Create | QueueAction::Update, _) | (QueueAction::Rename, None) => {
                self.push_upload(root, &entry.path, report).await
            }
            (QueueAction::Delete, _) => self.push_delete(&entry.path, report).await,
            (QueueAction::Rename, Some(old)) => {
                self.push_rename(root, old, &entry.path, report).await
            }
        }
    }

    /// Upload the current content of `path`, creating the remote file if
    /// it is not tracked yet
    async fn push_upload(
        &mut self,
        root: &RemoteId,
        path: &VaultPath,
        report: &mut CycleReport,
    ) -> PushResult {
        let Some(entry) = self
            .ports
            .local
            .stat(path)
            .await
            .map_err(PushFailure::Local)?
        else {
            debug!(path = %path, "File vanished before upload");
            return Ok(());
        };
        if let Some(reason) = self.exclusions.reason(path, Some(entry.size)) {
            debug!(path = %path, reason = %reason, "Queued file is now excluded");
            return Ok(());
        }
        let data = self
            .ports
            .local
            .read(path)
            .await
            .map_err(PushFailure::Local)?;
        let hash = ContentHash::of_bytes(&data);
        let keep = self.config.sync.keep_revisions_forever;

        if let Some(record) = self.store.get(path).cloned() {
            if record.status() == RecordStatus::Conflict && record.local_hash() == &hash {
                debug!(path = %path, "Unresolved conflict, not pushing");
                return Ok(());
            }
            if record.remote_hash() == &hash {
                let id = record.remote_id().clone();
                self.store
                    .update(path, |r| r.mark_synced(id, hash, Utc::now()));
                return Ok(());
            }

            let id = record.remote_id();
            let bytes = data.as_slice();
            let updated = self
                .call_remote("update_file", |remote, token| async move {
                    remote.update_file(&token, id, bytes, keep).await
                })
                .await;
            match updated {
                Ok(meta) => {
                    self.store
                        .update(path, |r| r.mark_synced(meta.id, hash, Utc::now()));
                    self.ledger
                        .record(ActivityAction::Update, path.as_str(), "uploaded new content")
                        .await;
                    report.updated += 1;
                    return Ok(());
                }
                Err(err) if classify(&err) == FailureKind::NotFound => {
                    info!(path = %path, "Remote file vanished, uploading as new");
                    self.store.delete(path);
                }
                Err(err) => return Err(PushFailure::Remote(err)),
            }
        }

        let parent = self
            .ensure_folder(root, path)
            .await
            .map_err(PushFailure::Remote)?;
        let parent_ref = &parent;
        let name = path.file_name();
        let bytes = data.as_slice();
        let created = self
            .call_remote("create_file", |remote, token| async move {
                remote
                    .create_file(&token, parent_ref, name, bytes, keep)
                    .await
            })
            .await
            .map_err(PushFailure::Remote)?;

        self.store
            .set(SyncRecord::synced(path.clone(), created.id, hash, Utc::now()));
        self.ledger
            .record(ActivityAction::Upload, path.as_str(), "uploaded new file")
            .await;
        report.created += 1;
        Ok(())
    }

    async fn push_delete(&mut self, path: &VaultPath, report: &mut CycleReport) -> PushResult {
        let Some(record) = self.store.get(path).cloned() else {
            return Ok(());
        };
        if self
            .ports
            .local
            .stat(path)
            .await
            .map_err(PushFailure::Local)?
            .is_some()
        {
            debug!(path = %path, "File came back before its delete was pushed");
            return Ok(());
        }

        let id = record.remote_id();
        let trashed = self
            .call_remote("trash_file", |remote, token| async move {
                remote.trash_file(&token, id).await
            })
            .await;
        match trashed {
            Ok(()) => {}
            Err(err) if classify(&err) == FailureKind::NotFound => {
                debug!(path = %path, "Remote file already gone");
            }
            Err(err) => return Err(PushFailure::Remote(err)),
        }

        self.store.delete(path);
        self.ledger
            .record(ActivityAction::Delete, path.as_str(), "moved to remote trash")
            .await;
        report.deleted += 1;
        Ok(())
    }

    async fn push_rename(
        &mut self,
        root: &RemoteId,
        from: &VaultPath,
        to: &VaultPath,
        report: &mut CycleReport,
    ) -> PushResult {
        let Some(record) = self.store.get(from).cloned() else {
            return self.push_upload(root, to, report).await;
        };
        let Some(entry) = self
            .ports
            .local
            .stat(to)
            .await
            .map_err(PushFailure::Local)?
        else {
            return self.push_delete(from, report).await;
        };
        if self.exclusions.reason(to, Some(entry.size)).is_some() {
            return self.push_delete(from, report).await;
        }

        let new_parent = if from.parent() != to.parent() {
            Some(
                self.ensure_folder(root, to)
                    .await
                    .map_err(PushFailure::Remote)?,
            )
        } else {
            None
        };

        let id = record.remote_id();
        let name = to.file_name();
        let parent_ref = new_parent.as_ref();
        let renamed = self
            .call_remote("rename_file", |remote, token| async move {
                remote.rename_file(&token, id, name, parent_ref).await
            })
            .await;
        match renamed {
            Ok(_) => {}
            Err(err) if classify(&err) == FailureKind::NotFound => {
                info!(from = %from, to = %to, "Remote file vanished, uploading as new");
                self.store.delete(from);
                return self.push_upload(root, to, report).await;
            }
            Err(err) => return Err(PushFailure::Remote(err)),
        }

        self.store.relocate(from, to.clone());
        self.ledger
            .record(
                ActivityAction::Rename,
                to.as_str(),
                format!("renamed from {from}"),
            )
            .await;
        report.renamed += 1;

        let hash = self
            .ports
            .local
            .content_hash(to)
            .await
            .map_err(PushFailure::Local)?;
        if &hash != record.remote_hash() {
            return self.push_upload(root, to, report).await;
        }
        Ok(())
    }

    /// Remote folder id for the parent of `path`, creating missing folders
    async fn ensure_folder(
        &mut self,
        root: &RemoteId,
        path: &VaultPath,
    ) -> anyhow::Result<RemoteId> {
        let Some(dir) = path.parent() else {
            return Ok(root.clone());
        };

        let mut parent = root.clone();
        let mut current = String::new();
        for component in dir.components() {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(component);
            if let Some(id) = self.store.folder_id(&current) {
                parent = id.clone();
                continue;
            }

            let parent_ref = &parent;
            let folder = self
                .call_remote("create_folder", |remote, token| async move {
                    remote.create_folder(&token, parent_ref, component).await
                })
                .await?;
            debug!(dir = %current, id = %folder.id, "Remote folder created");
            self.store.set_folder_id(current.clone(), folder.id.clone());
            parent = folder.id;
        }
        Ok(parent)
    }
}
