//! Full re-sync: rebuild every record from a complete listing
//!
//! The plan compares a full remote listing with the hashed local tree.
//! [`SyncEngine::preview_full_resync`] only computes it;
//! [`SyncEngine::force_full_resync`] computes it, discards all records and
//! applies it step by step, saving after each step. Cancelling before the
//! reset leaves everything untouched.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use vaultsync_core::domain::{
    ActivityAction, ConflictInfo, ContentHash, PageToken, QueueAction, RemoteId, SyncQueueEntry,
    SyncRecord, SyncState, VaultPath,
};
use vaultsync_core::ports::{IProgressSink, LocalEntry, Notification, Progress, RemoteFile};

use super::cleanup::select_primary;
use super::resolve::PendingConflict;
use super::{cycle_failure, reason_for, CycleReport, SyncEngine};
use crate::remote_tree::{index_listing, RemoteListing};
use crate::retry::{classify, FailureKind};
use crate::SyncError;

/// What a full re-sync does with one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncAction {
    /// Only present locally
    Upload,
    /// Only present remotely
    Download,
    /// Present on both sides with different content
    Conflict,
    /// Present on both sides with equal content
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResyncStep {
    pub path: VaultPath,
    pub action: ResyncAction,
    /// Remote file the step binds to; the primary one for duplicates
    pub remote_id: Option<RemoteId>,
    pub local_hash: Option<ContentHash>,
    pub remote_hash: Option<ContentHash>,
}

/// Outcome counts plus the individual steps, sorted by path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResyncPlan {
    pub upload: usize,
    pub download: usize,
    pub conflict: usize,
    pub unchanged: usize,
    pub steps: Vec<ResyncStep>,
}

impl ResyncPlan {
    fn push(&mut self, step: ResyncStep) {
        match step.action {
            ResyncAction::Upload => self.upload += 1,
            ResyncAction::Download => self.download += 1,
            ResyncAction::Conflict => self.conflict += 1,
            ResyncAction::Unchanged => self.unchanged += 1,
        }
        self.steps.push(step);
    }

    pub fn total(&self) -> usize {
        self.steps.len()
    }
}

/// A plan together with the listing it was computed from
pub(super) struct Scan {
    pub plan: ResyncPlan,
    pub listing: RemoteListing,
    pub next_page_token: Option<PageToken>,
    local: HashMap<VaultPath, LocalEntry>,
}

impl Scan {
    fn remote_file(&self, step: &ResyncStep) -> Option<&RemoteFile> {
        let id = step.remote_id.as_ref()?;
        self.listing
            .files
            .get(&step.path)?
            .iter()
            .find(|f| &f.id == id)
    }
}

impl SyncEngine {
    /// Compute what a full re-sync would do without changing anything
    pub async fn preview_full_resync(&self) -> Result<ResyncPlan, SyncError> {
        let root = self.root_id()?;
        Ok(self.plan_full_resync(&root).await?.plan)
    }

    /// Discard every record and rebuild them from a full listing
    ///
    /// Local-only files are uploaded, remote-only files downloaded, and
    /// divergent files go through conflict resolution. Duplicate cleanup
    /// runs at the end.
    pub async fn force_full_resync(
        &mut self,
        progress: &dyn IProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ResyncPlan, SyncError> {
        if self.user_paused {
            return Err(SyncError::Paused);
        }
        let root = self.root_id()?;
        self.set_state(SyncState::Syncing);

        let mut report = CycleReport::default();
        match self.full_resync(&root, &mut report, progress, cancel).await {
            Ok(plan) => {
                let body = format!(
                    "{} uploaded, {} downloaded, {} conflicts, {} unchanged",
                    plan.upload, plan.download, plan.conflict, plan.unchanged
                );
                let notification = if report.storage_full || report.unresolved > 0 {
                    self.cycle_notification(&report)
                } else {
                    Notification::sync("Full re-sync complete", body)
                };
                self.conclude("Full re-sync", Ok(notification)).await;
                Ok(plan)
            }
            Err(err) => {
                warn!(error = %err, "Full re-sync failed");
                self.conclude("Full re-sync", Err(&err)).await;
                Err(err)
            }
        }
    }

    #[instrument(skip(self, report, progress, cancel))]
    async fn full_resync(
        &mut self,
        root: &RemoteId,
        report: &mut CycleReport,
        progress: &dyn IProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ResyncPlan, SyncError> {
        let scan = self.plan_full_resync(root).await?;
        if cancel.is_cancelled() {
            info!("Full re-sync cancelled before any change");
            return Err(SyncError::Cancelled);
        }

        info!(
            upload = scan.plan.upload,
            download = scan.plan.download,
            conflict = scan.plan.conflict,
            unchanged = scan.plan.unchanged,
            "Discarding sync records for a full re-sync"
        );
        self.store.reset();
        self.store.set_remote_root_id(root.clone());
        self.queue.clear();
        self.conflicts.clear();
        self.store.save().await.map_err(SyncError::Io)?;

        let plan = self.apply_scan(scan, report, progress, Some(cancel)).await?;
        self.resolve_phase(report).await?;
        self.push_phase(root, report).await?;

        self.store.set_last_full_resync(Utc::now());
        self.store.save().await.map_err(SyncError::Io)?;
        self.ledger
            .record(
                ActivityAction::Resync,
                "",
                format!(
                    "full re-sync: {} uploaded, {} downloaded, {} conflicts, {} unchanged",
                    plan.upload, plan.download, plan.conflict, plan.unchanged
                ),
            )
            .await;

        self.cleanup_pass(root, progress, cancel).await?;
        Ok(plan)
    }

    /// Reconcile from a full listing, keeping existing records as hints
    pub(super) async fn rescan(
        &mut self,
        root: &RemoteId,
        report: &mut CycleReport,
        progress: &dyn IProgressSink,
        cancel: Option<&CancellationToken>,
    ) -> Result<ResyncPlan, SyncError> {
        let scan = self.plan_full_resync(root).await?;
        self.apply_scan(scan, report, progress, cancel).await
    }

    /// Compare a full listing with the hashed local tree
    ///
    /// Synced records that exist when planning act as hints: a path whose
    /// local hash still matches its record downloads, one whose remote hash
    /// still matches uploads. Only paths without such a record become
    /// conflicts, so a forced re-sync is not fully stateless. A remote file
    /// that cannot be hashed while planning is planned as a conflict and
    /// compared again when its step downloads it.
    pub(super) async fn plan_full_resync(&self, root: &RemoteId) -> Result<Scan, SyncError> {
        let page = self
            .call_remote("list_changed_files", |remote, token| async move {
                remote.list_changed_files(&token, root, None).await
            })
            .await
            .map_err(cycle_failure)?;
        let next_page_token = page.next_page_token;
        let listing = index_listing(root, page.files);

        let local: HashMap<VaultPath, LocalEntry> = self
            .ports
            .local
            .list()
            .await
            .map_err(SyncError::Io)?
            .into_iter()
            .filter(|e| self.exclusions.is_included(&e.path, Some(e.size)))
            .map(|e| (e.path.clone(), e))
            .collect();
        let local_hashes = self.hash_local(local.keys().cloned().collect()).await;

        let mut paths: BTreeSet<VaultPath> = local.keys().cloned().collect();
        for (path, files) in &listing.files {
            let size = files.first().map(|f| f.size);
            if self.exclusions.is_included(path, size) {
                paths.insert(path.clone());
            }
        }

        let mut plan = ResyncPlan::default();
        for path in paths {
            let remote = listing.files.get(&path).and_then(|files| {
                let record_id = self.store.get(&path).map(|r| r.remote_id());
                select_primary(files, record_id).map(|i| &files[i])
            });
            let local_hash = local_hashes.get(&path).cloned();
            if local.contains_key(&path) && local_hash.is_none() {
                warn!(path = %path, "Skipping file that could not be hashed");
                continue;
            }

            let (action, remote_hash) = match (&local_hash, remote) {
                (Some(_), None) => (ResyncAction::Upload, None),
                (None, Some(file)) => (ResyncAction::Download, file.content_hash.clone()),
                (Some(local_hash), Some(file)) => {
                    let remote_hash = match &file.content_hash {
                        Some(hash) => hash.clone(),
                        None => match self.remote_hash_of(file).await {
                            Ok(hash) => hash,
                            Err(err) => match classify(&err) {
                                FailureKind::Unauthorized | FailureKind::Transient => {
                                    return Err(cycle_failure(err));
                                }
                                _ => {
                                    // compared again once the step downloads it
                                    warn!(path = %path, error = %err, "Could not hash remote file");
                                    plan.push(ResyncStep {
                                        path,
                                        action: ResyncAction::Conflict,
                                        remote_id: Some(file.id.clone()),
                                        local_hash: Some(local_hash.clone()),
                                        remote_hash: None,
                                    });
                                    continue;
                                }
                            },
                        },
                    };
                    let record = self.store.get(&path).filter(|r| r.is_synced());
                    let action = if &remote_hash == local_hash {
                        ResyncAction::Unchanged
                    } else if record.is_some_and(|r| r.local_hash() == local_hash) {
                        // only the remote side moved on
                        ResyncAction::Download
                    } else if record.is_some_and(|r| r.remote_hash() == &remote_hash) {
                        ResyncAction::Upload
                    } else {
                        ResyncAction::Conflict
                    };
                    (action, Some(remote_hash))
                }
                (None, None) => continue,
            };
            plan.push(ResyncStep {
                path,
                action,
                remote_id: remote.map(|f| f.id.clone()),
                local_hash,
                remote_hash,
            });
        }

        debug!(
            steps = plan.total(),
            remote_files = listing.file_count(),
            "Full re-sync planned"
        );
        Ok(Scan {
            plan,
            listing,
            next_page_token,
            local,
        })
    }

    /// Hash of a remote file whose listing did not report one
    async fn remote_hash_of(&self, file: &RemoteFile) -> anyhow::Result<ContentHash> {
        let id = &file.id;
        let data = self
            .call_remote("download_file", |remote, token| async move {
                remote.download_file(&token, id).await
            })
            .await?;
        Ok(ContentHash::of_bytes(&data))
    }

    /// Hash local files with bounded concurrency; failures are left out
    async fn hash_local(&self, paths: Vec<VaultPath>) -> HashMap<VaultPath, ContentHash> {
        let limit = self.config.sync.max_concurrency.max(1);
        let local = self.ports.local.clone();
        let results: Vec<(VaultPath, anyhow::Result<ContentHash>)> = stream::iter(paths)
            .map(|path| {
                let local = local.clone();
                async move {
                    let hash = local.content_hash(&path).await;
                    (path, hash)
                }
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|(path, hash)| match hash {
                Ok(hash) => Some((path, hash)),
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to hash local file");
                    None
                }
            })
            .collect()
    }

    /// Apply every step of `scan`, saving and reporting progress after each
    async fn apply_scan(
        &mut self,
        scan: Scan,
        report: &mut CycleReport,
        progress: &dyn IProgressSink,
        cancel: Option<&CancellationToken>,
    ) -> Result<ResyncPlan, SyncError> {
        for (dir, id) in &scan.listing.folders {
            self.store.set_folder_id(dir.clone(), id.clone());
        }

        let total = scan.plan.total();
        let mut clean = true;
        for (done, step) in scan.plan.steps.iter().enumerate() {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                info!(done, total, "Full re-sync cancelled");
                self.store.save().await.map_err(SyncError::Io)?;
                return Err(SyncError::Cancelled);
            }
            if let Err(err) = self.apply_step(&scan, step, report).await {
                if classify(&err) == FailureKind::Unauthorized {
                    return Err(SyncError::AuthRequired);
                }
                clean = false;
                report.errors += 1;
                warn!(path = %step.path, error = %err, "Full re-sync step failed");
                self.ledger
                    .record_failure(
                        step.path.as_str(),
                        reason_for(&err),
                        "full re-sync step failed",
                        format!("{err:#}"),
                    )
                    .await;
            }
            self.store.save().await.map_err(SyncError::Io)?;
            progress.on_progress(&Progress {
                operation: "full_resync".into(),
                done: done + 1,
                total: Some(total),
                path: Some(step.path.to_string()),
            });
        }

        if clean {
            self.store.set_page_token(scan.next_page_token.clone());
        } else {
            warn!("Leaving the change-feed cursor unset so failed files are listed again");
        }
        self.store.save().await.map_err(SyncError::Io)?;
        Ok(scan.plan)
    }

    async fn apply_step(
        &mut self,
        scan: &Scan,
        step: &ResyncStep,
        report: &mut CycleReport,
    ) -> anyhow::Result<()> {
        let path = &step.path;
        match step.action {
            ResyncAction::Upload => {
                if let (None, Some(id), Some(remote_hash), Some(local_hash)) = (
                    self.store.get(path),
                    &step.remote_id,
                    &step.remote_hash,
                    &step.local_hash,
                ) {
                    let mut record =
                        SyncRecord::synced(path.clone(), id.clone(), remote_hash.clone(), Utc::now());
                    record.note_local_change(local_hash.clone());
                    self.store.set(record);
                }
                let action = if self.store.get(path).is_some() {
                    QueueAction::Update
                } else {
                    QueueAction::Create
                };
                self.queue.enqueue(SyncQueueEntry::new(
                    action,
                    path.clone(),
                    step.local_hash.clone(),
                    Utc::now(),
                ));
            }
            ResyncAction::Unchanged => {
                if let (Some(id), Some(hash)) = (&step.remote_id, &step.local_hash) {
                    self.store.set(SyncRecord::synced(
                        path.clone(),
                        id.clone(),
                        hash.clone(),
                        Utc::now(),
                    ));
                }
            }
            ResyncAction::Download | ResyncAction::Conflict => {
                let Some(file) = scan.remote_file(step) else {
                    return Ok(());
                };
                let id = &file.id;
                let data = self
                    .call_remote("download_file", |remote, token| async move {
                        remote.download_file(&token, id).await
                    })
                    .await?;
                let remote_hash = ContentHash::of_bytes(&data);

                if step.remote_hash.is_none() && step.local_hash.as_ref() == Some(&remote_hash) {
                    self.store.set(SyncRecord::synced(
                        path.clone(),
                        file.id.clone(),
                        remote_hash,
                        Utc::now(),
                    ));
                    return Ok(());
                }
                if step.action == ResyncAction::Download {
                    self.ports.local.write(path, &data).await?;
                    self.store.set(SyncRecord::synced(
                        path.clone(),
                        file.id.clone(),
                        remote_hash,
                        Utc::now(),
                    ));
                    self.ledger
                        .record(
                            ActivityAction::Download,
                            path.as_str(),
                            "downloaded during full re-sync",
                        )
                        .await;
                    report.pulled += 1;
                } else if let Some(local_hash) = step.local_hash.clone() {
                    let local_modified = scan
                        .local
                        .get(path)
                        .map(|e| e.modified)
                        .unwrap_or_else(Utc::now);
                    self.conflicts.push(PendingConflict {
                        info: ConflictInfo {
                            path: path.clone(),
                            local_hash,
                            remote_hash,
                            base_hash: self.store.get(path).map(|r| r.remote_hash().clone()),
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
        }
        Ok(())
    }
}
