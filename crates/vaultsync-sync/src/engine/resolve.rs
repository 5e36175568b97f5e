//! Resolve phase: settle conflicts found by the pull phase
//!
//! Text files get a three-way merge when the last agreed version can be
//! recovered from the remote revision history, and a two-way merge
//! otherwise. A local file with unbalanced conflict markers is never merged
//! or overwritten; it stays in conflict until fixed by hand.

use chrono::Utc;
use tracing::{debug, info, warn};

use vaultsync_audit::ReasonCode;
use vaultsync_conflict::markers::analyze;
use vaultsync_conflict::{ConflictInput, ResolutionOutcome};
use vaultsync_core::domain::{
    is_mergeable_text, ActivityAction, ConflictInfo, ConflictResolution, ContentHash,
    QueueAction, RemoteId, SyncQueueEntry, SyncRecord, VariantKind, VaultPath,
};

use super::{reason_for, CycleReport, SyncEngine};
use crate::retry::{classify, FailureKind};
use crate::SyncError;

/// Revisions without a reported hash that are downloaded to find the base
const MAX_UNHASHED_REVISIONS: usize = 3;

/// A divergence waiting for the resolve phase
#[derive(Debug, Clone)]
pub(super) struct PendingConflict {
    pub info: ConflictInfo,
    pub remote_id: RemoteId,
    pub remote: Vec<u8>,
}

impl SyncEngine {
    #[tracing::instrument(skip(self, report))]
    pub(super) async fn resolve_phase(&mut self, report: &mut CycleReport) -> Result<(), SyncError> {
        let pending = std::mem::take(&mut self.conflicts);
        if pending.is_empty() {
            return Ok(());
        }
        self.last_conflicts.clear();

        for conflict in pending {
            let path = conflict.info.path.clone();
            match self.resolve_one(conflict, report).await {
                Ok(info) => self.last_conflicts.push(info),
                Err(err) => {
                    if classify(&err) == FailureKind::Unauthorized {
                        return Err(SyncError::AuthRequired);
                    }
                    report.errors += 1;
                    warn!(path = %path, error = %err, "Failed to resolve conflict");
                    self.ledger
                        .record_failure(
                            path.as_str(),
                            reason_for(&err),
                            "conflict resolution failed",
                            format!("{err:#}"),
                        )
                        .await;
                }
            }
        }
        self.store.save().await.map_err(SyncError::Io)?;
        Ok(())
    }

    async fn resolve_one(
        &mut self,
        conflict: PendingConflict,
        report: &mut CycleReport,
    ) -> anyhow::Result<ConflictInfo> {
        let PendingConflict {
            mut info,
            remote_id,
            remote,
        } = conflict;
        let path = info.path.clone();
        let remote_hash = ContentHash::of_bytes(&remote);

        let local = match self.ports.local.stat(&path).await? {
            Some(_) => self.ports.local.read(&path).await?,
            None => {
                debug!(path = %path, "Local copy vanished before resolution, taking remote");
                self.ports.local.write(&path, &remote).await?;
                self.settle_record(&path, &remote_id, remote_hash.clone(), remote_hash);
                self.queue.remove(&path);
                info.resolution = Some(ConflictResolution::KeptRemote);
                return Ok(info);
            }
        };
        let local_hash = ContentHash::of_bytes(&local);
        info.local_hash = local_hash.clone();

        let text = is_mergeable_text(&path);
        if text {
            if let Ok(local_text) = std::str::from_utf8(&local) {
                let analysis = analyze(local_text);
                if analysis.has_unbalanced_markers {
                    warn!(path = %path, "Unbalanced conflict markers, leaving file untouched");
                    self.flag_conflict(&path, &remote_id, local_hash, remote_hash);
                    self.ledger
                        .record_failure(
                            path.as_str(),
                            ReasonCode::MalformedMarkers,
                            "conflict left for manual resolution",
                            format!(
                                "unbalanced conflict markers near line {}",
                                analysis.first_marker_line.unwrap_or(0)
                            ),
                        )
                        .await;
                    report.unresolved += 1;
                    return Ok(info);
                }
            }
        }

        let base = if text {
            self.recover_base(&path, &remote_id).await
        } else {
            None
        };
        let outcome = self.resolver.resolve(&ConflictInput {
            path: &path,
            local: &local,
            remote: &remote,
            base: base.as_deref(),
            local_modified: info.local_modified,
            remote_modified: info.remote_modified,
        })?;

        let mut copy_path = None;
        let detail = match &outcome {
            ResolutionOutcome::KeepRemote => {
                if local_hash != remote_hash {
                    self.ports.local.write(&path, &remote).await?;
                }
                self.settle_record(&path, &remote_id, remote_hash.clone(), remote_hash);
                self.queue.remove(&path);
                report.pulled += 1;
                "kept remote version".to_string()
            }
            ResolutionOutcome::KeepLocal => {
                self.settle_record(&path, &remote_id, local_hash.clone(), remote_hash);
                self.requeue_update(&path, local_hash);
                "kept local version".to_string()
            }
            ResolutionOutcome::Merged(result) if !result.has_conflicts => {
                let merged = result.content.as_bytes();
                self.ports.local.write(&path, merged).await?;
                let merged_hash = ContentHash::of_bytes(merged);
                self.settle_record(&path, &remote_id, merged_hash.clone(), remote_hash.clone());
                if merged_hash != remote_hash {
                    self.requeue_update(&path, merged_hash);
                } else {
                    self.queue.remove(&path);
                }
                format!(
                    "merged cleanly ({})",
                    if base.is_some() { "three-way" } else { "two-way" }
                )
            }
            ResolutionOutcome::Merged(result) => {
                let merged = result.content.as_bytes();
                self.ports.local.write(&path, merged).await?;
                self.flag_conflict(&path, &remote_id, ContentHash::of_bytes(merged), remote_hash);
                report.unresolved += 1;
                format!(
                    "merged with {} conflict block(s), needs manual resolution",
                    result.conflict_count
                )
            }
            ResolutionOutcome::ConflictCopy => {
                let copy = self
                    .free_variant_path(&path, VariantKind::ConflictCopy)
                    .await?;
                self.ports.local.write(&copy, &remote).await?;
                self.settle_record(&path, &remote_id, local_hash.clone(), remote_hash);
                self.requeue_update(&path, local_hash);
                let detail = format!("remote version saved as {copy}");
                copy_path = Some(copy);
                detail
            }
        };

        info!(path = %path, detail = %detail, "Conflict settled");
        self.ledger
            .record(ActivityAction::Conflict, path.as_str(), detail)
            .await;
        info.resolution = outcome.resolution(copy_path);
        Ok(info)
    }

    /// Last agreed content of `path`, fetched from the revision history
    async fn recover_base(&self, path: &VaultPath, remote_id: &RemoteId) -> Option<Vec<u8>> {
        let base_hash = self.store.get(path)?.remote_hash().clone();
        let revisions = match self
            .call_remote("list_revisions", |remote, token| async move {
                remote.list_revisions(&token, remote_id).await
            })
            .await
        {
            Ok(revisions) => revisions,
            Err(e) => {
                debug!(path = %path, error = %e, "Revision history unavailable");
                return None;
            }
        };

        let hashed = revisions
            .iter()
            .rev()
            .filter(|r| r.content_hash.as_ref() == Some(&base_hash));
        let unhashed = revisions
            .iter()
            .rev()
            .filter(|r| r.content_hash.is_none())
            .take(MAX_UNHASHED_REVISIONS);

        for revision in hashed.chain(unhashed) {
            let revision_id = revision.id.as_str();
            let data = self
                .call_remote("download_revision", |remote, token| async move {
                    remote
                        .download_revision(&token, remote_id, revision_id)
                        .await
                })
                .await;
            match data {
                Ok(data) if ContentHash::of_bytes(&data) == base_hash => {
                    debug!(path = %path, revision = revision_id, "Merge base recovered");
                    return Some(data);
                }
                Ok(_) => {}
                Err(e) => debug!(
                    path = %path,
                    revision = revision_id,
                    error = %e,
                    "Revision download failed"
                ),
            }
        }
        debug!(path = %path, "No revision matches the last synced content");
        None
    }

    /// Record both hashes; synced when they agree, pending push otherwise
    fn settle_record(
        &mut self,
        path: &VaultPath,
        remote_id: &RemoteId,
        local_hash: ContentHash,
        remote_hash: ContentHash,
    ) {
        let mut record =
            SyncRecord::synced(path.clone(), remote_id.clone(), remote_hash, Utc::now());
        record.note_local_change(local_hash);
        self.store.set(record);
    }

    /// Flag `path` as conflicted; nothing is pushed until it is fixed
    fn flag_conflict(
        &mut self,
        path: &VaultPath,
        remote_id: &RemoteId,
        local_hash: ContentHash,
        remote_hash: ContentHash,
    ) {
        let mut record = SyncRecord::synced(
            path.clone(),
            remote_id.clone(),
            remote_hash.clone(),
            Utc::now(),
        );
        record.mark_conflict(local_hash, remote_hash);
        self.store.set(record);
        self.queue.remove(path);
    }

    fn requeue_update(&mut self, path: &VaultPath, hash: ContentHash) {
        self.queue.remove(path);
        self.queue.enqueue(SyncQueueEntry::new(
            QueueAction::Update,
            path.clone(),
            Some(hash),
            Utc::now(),
        ));
    }
}
