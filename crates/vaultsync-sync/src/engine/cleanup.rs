//! Duplicate and variant cleanup
//!
//! Two kinds of artifacts pile up over time: local variant files (conflict
//! and shadow copies) and remote duplicates (several remote files resolving
//! to the same vault path, usually from interrupted uploads on different
//! devices). Cleanup folds them back into the canonical file:
//!
//! - identical content is removed
//! - divergent text is merged into the canonical file
//! - divergent binary content is kept side by side as a conflict copy
//!
//! Runs on a timer from the run loop and at the end of a full re-sync.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use vaultsync_audit::ReasonCode;
use vaultsync_conflict::markers::analyze;
use vaultsync_conflict::merge_two_way;
use vaultsync_core::domain::variant::{canonical_path, parse_variant};
use vaultsync_core::domain::{
    is_mergeable_text, ActivityAction, ContentHash, QueueAction, RemoteId, SyncQueueEntry,
    SyncRecord, SyncState, VariantKind, VaultPath,
};
use vaultsync_core::ports::{IProgressSink, Notification, Progress, RemoteFile};

use super::{cycle_failure, reason_for, SyncEngine};
use crate::remote_tree::index_listing;
use crate::SyncError;

/// What a cleanup pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Identical local variants deleted
    pub removed: usize,
    /// Divergent text merged into the canonical file
    pub merged: usize,
    /// Variants renamed to a missing canonical path
    pub promoted: usize,
    /// Divergent binary content kept side by side
    pub kept: usize,
    /// Remote duplicates moved to the trash
    pub trashed: usize,
    pub errors: usize,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.removed + self.merged + self.promoted + self.kept + self.trashed + self.errors == 0
    }
}

enum VariantOutcome {
    Removed,
    Merged,
    Promoted,
    Kept,
}

/// Index of the remote file that survives among same-path duplicates
///
/// Preference order: the file the record already points at, then the most
/// recently modified, then the lowest id.
pub fn select_primary(candidates: &[RemoteFile], record_id: Option<&RemoteId>) -> Option<usize> {
    if let Some(id) = record_id {
        if let Some(index) = candidates.iter().position(|f| &f.id == id) {
            return Some(index);
        }
    }
    candidates
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| b.id.cmp(&a.id))
        })
        .map(|(index, _)| index)
}

impl SyncEngine {
    /// Fold local variants and remote duplicates into their canonical files
    pub async fn clean_duplicate_artifacts(
        &mut self,
        progress: &dyn IProgressSink,
        cancel: &CancellationToken,
    ) -> Result<CleanupReport, SyncError> {
        if self.user_paused {
            return Err(SyncError::Paused);
        }
        let root = self.root_id()?;
        self.set_state(SyncState::Syncing);

        match self.cleanup_pass(&root, progress, cancel).await {
            Ok(report) => {
                let notification = if report.errors > 0 {
                    Notification::error(
                        "Duplicate cleanup finished with errors",
                        format!("{} file(s) could not be cleaned up", report.errors),
                    )
                } else {
                    Notification::sync(
                        "Duplicate cleanup complete",
                        format!(
                            "{} removed, {} merged, {} promoted, {} kept, {} trashed remotely",
                            report.removed,
                            report.merged,
                            report.promoted,
                            report.kept,
                            report.trashed
                        ),
                    )
                };
                self.conclude("Duplicate cleanup", Ok(notification)).await;
                Ok(report)
            }
            Err(err) => {
                warn!(error = %err, "Duplicate cleanup failed");
                self.conclude("Duplicate cleanup", Err(&err)).await;
                Err(err)
            }
        }
    }

    #[instrument(skip(self, progress, cancel))]
    pub(super) async fn cleanup_pass(
        &mut self,
        root: &RemoteId,
        progress: &dyn IProgressSink,
        cancel: &CancellationToken,
    ) -> Result<CleanupReport, SyncError> {
        let mut report = CleanupReport::default();

        let variants: Vec<(VaultPath, VaultPath)> = self
            .ports
            .local
            .list()
            .await
            .map_err(SyncError::Io)?
            .into_iter()
            .filter_map(|e| parse_variant(&e.path).map(|v| (e.path, v.canonical)))
            .collect();

        let page = self
            .call_remote("list_changed_files", |remote, token| async move {
                remote.list_changed_files(&token, root, None).await
            })
            .await
            .map_err(cycle_failure)?;
        let listing = index_listing(root, page.files);
        let mut groups: BTreeMap<VaultPath, Vec<RemoteFile>> = BTreeMap::new();
        for (path, files) in listing.files {
            groups.entry(canonical_path(&path)).or_default().extend(files);
        }
        groups.retain(|_, files| files.len() > 1);

        let total = variants.len() + groups.len();
        let mut done = 0;
        debug!(variants = variants.len(), duplicates = groups.len(), "Cleanup planned");

        for (variant, canonical) in variants {
            if cancel.is_cancelled() {
                self.store.save().await.map_err(SyncError::Io)?;
                return Err(SyncError::Cancelled);
            }
            if self.exclusions.is_included(&canonical, None) {
                match self.fold_local_variant(&variant, &canonical).await {
                    Ok(VariantOutcome::Removed) => report.removed += 1,
                    Ok(VariantOutcome::Merged) => report.merged += 1,
                    Ok(VariantOutcome::Promoted) => report.promoted += 1,
                    Ok(VariantOutcome::Kept) => report.kept += 1,
                    Err(err) => {
                        report.errors += 1;
                        warn!(path = %variant, error = %err, "Failed to clean up variant");
                        self.ledger
                            .record_failure(
                                variant.as_str(),
                                reason_for(&err),
                                "variant cleanup failed",
                                format!("{err:#}"),
                            )
                            .await;
                    }
                }
            }
            done += 1;
            self.store.save().await.map_err(SyncError::Io)?;
            Self::cleanup_progress(progress, done, total, &variant);
        }

        for (canonical, files) in groups {
            if cancel.is_cancelled() {
                self.store.save().await.map_err(SyncError::Io)?;
                return Err(SyncError::Cancelled);
            }
            if self.exclusions.is_included(&canonical, None) {
                if let Err(err) = self
                    .fold_remote_duplicates(&canonical, files, &mut report)
                    .await
                {
                    report.errors += 1;
                    warn!(
                        path = %canonical,
                        error = %err,
                        "Failed to clean up remote duplicates"
                    );
                    self.ledger
                        .record_failure(
                            canonical.as_str(),
                            reason_for(&err),
                            "remote duplicate cleanup failed",
                            format!("{err:#}"),
                        )
                        .await;
                }
            }
            done += 1;
            self.store.save().await.map_err(SyncError::Io)?;
            Self::cleanup_progress(progress, done, total, &canonical);
        }

        self.store.set_last_duplicate_cleanup(Utc::now());
        self.store.save().await.map_err(SyncError::Io)?;
        if !report.is_empty() {
            info!(
                removed = report.removed,
                merged = report.merged,
                promoted = report.promoted,
                kept = report.kept,
                trashed = report.trashed,
                errors = report.errors,
                "Duplicate cleanup finished"
            );
        }
        Ok(report)
    }

    fn cleanup_progress(
        progress: &dyn IProgressSink,
        done: usize,
        total: usize,
        path: &VaultPath,
    ) {
        progress.on_progress(&Progress {
            operation: "duplicate_cleanup".into(),
            done,
            total: Some(total),
            path: Some(path.to_string()),
        });
    }

    async fn fold_local_variant(
        &mut self,
        variant: &VaultPath,
        canonical: &VaultPath,
    ) -> anyhow::Result<VariantOutcome> {
        let local = self.ports.local.clone();

        if local.stat(canonical).await?.is_none() {
            local.rename(variant, canonical).await?;
            let hash = local.content_hash(canonical).await?;
            self.queue_local_content(canonical, hash);
            self.ledger
                .record(
                    ActivityAction::Cleanup,
                    canonical.as_str(),
                    format!("promoted {variant} to the canonical name"),
                )
                .await;
            return Ok(VariantOutcome::Promoted);
        }

        let variant_bytes = local.read(variant).await?;
        let canonical_bytes = local.read(canonical).await?;
        if variant_bytes == canonical_bytes {
            local.remove(variant).await?;
            self.ledger
                .record(
                    ActivityAction::Cleanup,
                    variant.as_str(),
                    "removed copy identical to the canonical file",
                )
                .await;
            return Ok(VariantOutcome::Removed);
        }

        let texts = is_mergeable_text(canonical)
            .then(|| {
                Some((
                    std::str::from_utf8(&canonical_bytes).ok()?,
                    std::str::from_utf8(&variant_bytes).ok()?,
                ))
            })
            .flatten();
        let Some((canonical_text, variant_text)) = texts else {
            debug!(path = %variant, "Divergent binary copy kept");
            return Ok(VariantOutcome::Kept);
        };

        let analysis = analyze(canonical_text);
        if analysis.has_unbalanced_markers {
            self.ledger
                .record_failure(
                    canonical.as_str(),
                    ReasonCode::MalformedMarkers,
                    format!("{variant} not merged"),
                    format!(
                        "unbalanced conflict markers near line {}",
                        analysis.first_marker_line.unwrap_or(0)
                    ),
                )
                .await;
            return Ok(VariantOutcome::Kept);
        }

        let merged = merge_two_way(canonical_text, variant_text);
        local.write(canonical, merged.content.as_bytes()).await?;
        local.remove(variant).await?;
        let hash = ContentHash::of_bytes(merged.content.as_bytes());

        if merged.has_conflicts && self.store.get(canonical).is_some() {
            self.store.update(canonical, |r| {
                let remote = r.remote_hash().clone();
                r.mark_conflict(hash, remote)
            });
            self.queue.remove(canonical);
        } else {
            self.queue_local_content(canonical, hash);
        }
        self.ledger
            .record(
                ActivityAction::Cleanup,
                canonical.as_str(),
                format!(
                    "merged {variant} into the canonical file ({} conflict block(s))",
                    merged.conflict_count
                ),
            )
            .await;
        Ok(VariantOutcome::Merged)
    }

    /// Keep one remote file for `canonical` and fold the others into it
    async fn fold_remote_duplicates(
        &mut self,
        canonical: &VaultPath,
        files: Vec<RemoteFile>,
        report: &mut CleanupReport,
    ) -> anyhow::Result<()> {
        let record_id = self.store.get(canonical).map(|r| r.remote_id().clone());
        let named: Vec<RemoteFile> = files
            .iter()
            .filter(|f| f.name == canonical.file_name())
            .cloned()
            .collect();
        let Some(primary) = select_primary(&named, record_id.as_ref()).map(|i| named[i].clone())
        else {
            debug!(path = %canonical, "No remote file under the canonical name, leaving duplicates");
            return Ok(());
        };
        let primary_bytes = self.download(&primary.id).await?;
        let primary_hash = ContentHash::of_bytes(&primary_bytes);

        let local_matches_primary = match self.ports.local.stat(canonical).await? {
            None => true,
            Some(_) => self.ports.local.content_hash(canonical).await? == primary_hash,
        };
        let text = is_mergeable_text(canonical) && std::str::from_utf8(&primary_bytes).is_ok();

        let mut content = primary_bytes;
        let mut conflicts = 0;
        for duplicate in files.iter().filter(|f| f.id != primary.id) {
            let same_hash = duplicate.content_hash.as_ref() == Some(&primary_hash);
            let bytes = if same_hash {
                None
            } else {
                Some(self.download(&duplicate.id).await?)
            };

            if let Some(bytes) = bytes.filter(|b| ContentHash::of_bytes(b) != primary_hash) {
                let merged = match (text, std::str::from_utf8(&bytes)) {
                    (true, Ok(other)) => std::str::from_utf8(&content)
                        .ok()
                        .map(|current| merge_two_way(current, other)),
                    _ => None,
                };
                match merged {
                    Some(_) if !local_matches_primary => {
                        debug!(path = %canonical, "Local edits pending, duplicate left for later");
                        continue;
                    }
                    Some(merged) => {
                        conflicts += merged.conflict_count;
                        content = merged.content.into_bytes();
                        report.merged += 1;
                    }
                    None => {
                        let copy = self
                            .free_variant_path(canonical, VariantKind::ConflictCopy)
                            .await?;
                        self.ports.local.write(&copy, &bytes).await?;
                        report.kept += 1;
                        self.ledger
                            .record(
                                ActivityAction::Cleanup,
                                copy.as_str(),
                                format!("remote duplicate {} kept as a local copy", duplicate.id),
                            )
                            .await;
                    }
                }
            }

            self.trash(&duplicate.id).await?;
            let stale = self
                .store
                .get_by_remote_id(&duplicate.id)
                .map(|r| r.path().clone());
            if let Some(path) = stale {
                self.store.delete(&path);
            }
            report.trashed += 1;
            self.ledger
                .record(
                    ActivityAction::Cleanup,
                    canonical.as_str(),
                    format!("trashed remote duplicate {}", duplicate.id),
                )
                .await;
        }

        let merged_hash = ContentHash::of_bytes(&content);
        if merged_hash != primary_hash {
            self.ports.local.write(canonical, &content).await?;
            let mut record =
                SyncRecord::synced(canonical.clone(), primary.id.clone(), primary_hash, Utc::now());
            if conflicts > 0 {
                let remote = record.remote_hash().clone();
                record.mark_conflict(merged_hash, remote);
                self.store.set(record);
                self.queue.remove(canonical);
            } else {
                record.note_local_change(merged_hash.clone());
                self.store.set(record);
                self.queue.enqueue(SyncQueueEntry::new(
                    QueueAction::Update,
                    canonical.clone(),
                    Some(merged_hash),
                    Utc::now(),
                ));
            }
        } else if local_matches_primary && record_id.as_ref() != Some(&primary.id) {
            if self.ports.local.stat(canonical).await?.is_none() {
                self.ports.local.write(canonical, &content).await?;
            }
            self.store.set(SyncRecord::synced(
                canonical.clone(),
                primary.id.clone(),
                primary_hash,
                Utc::now(),
            ));
        }
        Ok(())
    }

    /// Queue the local content of `path` for upload
    fn queue_local_content(&mut self, path: &VaultPath, hash: ContentHash) {
        let action = if self.store.get(path).is_some() {
            let noted = hash.clone();
            self.store.update(path, |r| r.note_local_change(noted));
            QueueAction::Update
        } else {
            QueueAction::Create
        };
        self.queue
            .enqueue(SyncQueueEntry::new(action, path.clone(), Some(hash), Utc::now()));
    }

    async fn download(&self, id: &RemoteId) -> anyhow::Result<Vec<u8>> {
        self.call_remote("download_file", |remote, token| async move {
            remote.download_file(&token, id).await
        })
        .await
    }

    async fn trash(&self, id: &RemoteId) -> anyhow::Result<()> {
        self.call_remote("trash_file", |remote, token| async move {
            remote.trash_file(&token, id).await
        })
        .await
    }
}
