//! ActivityLedger - append-only audit trail
//!
//! Every entry gets the next id in sequence and is kept in memory for fast
//! snapshots. Entries are also written through `IStateRepository`; a failed
//! write is logged with `tracing::warn!` and the entry stays in memory, so
//! ledger persistence can never break a sync cycle.

use std::sync::Arc;

use chrono::Utc;
use vaultsync_core::{
    domain::{ActivityAction, ActivityLogEntry},
    ports::IStateRepository,
};

use crate::reason::ReasonCode;

/// Append-only activity log owned by the sync engine
pub struct ActivityLedger {
    repo: Option<Arc<dyn IStateRepository>>,
    entries: Vec<ActivityLogEntry>,
    next_id: u64,
}

impl ActivityLedger {
    /// Ledger persisted through `repo`
    pub fn new(repo: Arc<dyn IStateRepository>) -> Self {
        Self {
            repo: Some(repo),
            entries: Vec::new(),
            next_id: 1,
        }
    }

    /// Ledger that only lives in memory
    pub fn in_memory() -> Self {
        Self {
            repo: None,
            entries: Vec::new(),
            next_id: 1,
        }
    }

    /// Load previously persisted entries so ids keep increasing across runs
    ///
    /// A load failure is logged and the ledger starts empty.
    pub async fn load(&mut self) {
        let Some(repo) = &self.repo else {
            return;
        };
        match repo.list_activity(None).await {
            Ok(entries) => {
                self.next_id = entries.iter().map(|e| e.id()).max().unwrap_or(0) + 1;
                tracing::debug!(
                    count = entries.len(),
                    next_id = self.next_id,
                    "Loaded activity ledger"
                );
                self.entries = entries;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load activity ledger");
            }
        }
    }

    /// Append an entry and return its id
    pub async fn append(
        &mut self,
        action: ActivityAction,
        path: &str,
        detail: impl Into<String>,
        error: Option<String>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let entry = ActivityLogEntry::new(id, Utc::now(), action, path, detail, error);
        if let Some(repo) = &self.repo {
            if let Err(e) = repo.append_activity(&entry).await {
                tracing::warn!(id, path, error = %e, "Failed to persist activity entry");
            }
        }
        self.entries.push(entry);
        id
    }

    /// Append a successful action
    pub async fn record(
        &mut self,
        action: ActivityAction,
        path: &str,
        detail: impl Into<String>,
    ) -> u64 {
        self.append(action, path, detail, None).await
    }

    /// Append an `error` entry tagged with a reason code
    pub async fn record_failure(
        &mut self,
        path: &str,
        reason: ReasonCode,
        detail: impl Into<String>,
        error: impl std::fmt::Display,
    ) -> u64 {
        self.append(
            ActivityAction::Error,
            path,
            detail,
            Some(reason.annotate(error)),
        )
        .await
    }

    /// Snapshot of every entry in id order
    pub fn entries(&self) -> Vec<ActivityLogEntry> {
        self.entries.clone()
    }

    /// The most recent `limit` entries
    pub fn recent(&self, limit: usize) -> &[ActivityLogEntry] {
        let start = self.entries.len().saturating_sub(limit);
        &self.entries[start..]
    }

    /// Entries appended after `id`
    pub fn since(&self, id: u64) -> &[ActivityLogEntry] {
        let start = self.entries.partition_point(|e| e.id() <= id);
        &self.entries[start..]
    }

    /// Id of the newest entry, 0 when empty
    pub fn last_id(&self) -> u64 {
        self.next_id - 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
