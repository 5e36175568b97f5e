//! Pending local changes
//!
//! [`ChangeQueue`] holds at most one entry per path. A new action for a
//! path that already has an entry is folded into it, so the push phase only
//! sees the net effect of a burst of edits.
//!
//! [`QuiescenceScheduler`] sits in front of the queue. Every raw watcher
//! event (re)starts a per-path timer; only when a path stays quiet for the
//! whole quiescence interval is its latest event forwarded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use vaultsync_core::domain::{LocalChange, QueueAction, SyncQueueEntry, VaultPath};

/// Default number of times a failed entry is put back before it is dropped
pub const DEFAULT_RETRY_CEILING: u32 = 3;

// ============================================================================
// ChangeQueue
// ============================================================================

/// Coalescing queue of local actions awaiting push
#[derive(Debug, Clone)]
pub struct ChangeQueue {
    entries: HashMap<VaultPath, SyncQueueEntry>,
    retry_ceiling: u32,
}

impl Default for ChangeQueue {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_CEILING)
    }
}

impl ChangeQueue {
    pub fn new(retry_ceiling: u32) -> Self {
        Self {
            entries: HashMap::new(),
            retry_ceiling,
        }
    }

    /// Add an action, folding it into any pending entry for the same path
    pub fn enqueue(&mut self, entry: SyncQueueEntry) {
        if entry.action == QueueAction::Rename {
            self.enqueue_rename(entry);
            return;
        }

        let merged = match self.entries.remove(&entry.path) {
            None => Some(entry),
            Some(prev) => Self::fold(prev, entry),
        };
        match merged {
            Some(e) => {
                trace!(path = %e.path, action = %e.action, "Queued local change");
                self.entries.insert(e.path.clone(), e);
            }
            None => trace!("Queued changes cancelled out"),
        }
    }

    /// Combine a pending entry with a newer non-rename action on its path
    fn fold(prev: SyncQueueEntry, next: SyncQueueEntry) -> Option<SyncQueueEntry> {
        use QueueAction::*;

        let retry_count = prev.retry_count;
        let merged = match (prev.action, next.action) {
            // Never uploaded, so nothing remote to delete
            (Create, Delete) => return None,
            (Create, Create | Update) => SyncQueueEntry {
                action: Create,
                ..next
            },
            (Update | Delete, Create | Update) => SyncQueueEntry {
                action: Update,
                ..next
            },
            (Update | Delete, Delete) => next,
            // The remote file still sits at the old path
            (Rename, Delete) => SyncQueueEntry {
                path: prev.old_path.clone().unwrap_or(prev.path),
                old_path: None,
                ..next
            },
            (Rename, Create | Update) => SyncQueueEntry {
                local_hash: next.local_hash,
                timestamp: next.timestamp,
                ..prev
            },
            (_, Rename) => next,
        };
        Some(SyncQueueEntry {
            retry_count,
            ..merged
        })
    }

    fn enqueue_rename(&mut self, entry: SyncQueueEntry) {
        let Some(old) = entry.old_path.clone() else {
            warn!(path = %entry.path, "Rename without a source path");
            return;
        };

        let entry = match self.entries.remove(&old) {
            // Not uploaded yet: upload under the new name instead
            Some(prev) if prev.action == QueueAction::Create => SyncQueueEntry {
                action: QueueAction::Create,
                old_path: None,
                ..entry
            },
            // Chain of renames collapses to one move from the original path
            Some(prev) if prev.action == QueueAction::Rename => SyncQueueEntry {
                old_path: prev.old_path,
                ..entry
            },
            // A pending delete at the source is superseded by the move
            _ => entry,
        };

        let key = entry.path.clone();
        self.entries.insert(key, entry);
    }

    /// Take every entry, oldest first
    pub fn drain(&mut self) -> Vec<SyncQueueEntry> {
        let mut entries: Vec<_> = self.entries.drain().map(|(_, e)| e).collect();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.path.cmp(&b.path)));
        entries
    }

    /// Put back an entry that will be tried again unchanged
    ///
    /// A newer entry queued for the same path in the meantime wins.
    pub fn requeue(&mut self, entry: SyncQueueEntry) {
        self.entries.entry(entry.path.clone()).or_insert(entry);
    }

    /// Count a failure and put the entry back
    ///
    /// Returns the entry back as `Err` once it has failed more times than
    /// the retry ceiling; the caller is expected to log it and move on.
    pub fn record_failure(&mut self, mut entry: SyncQueueEntry) -> Result<(), SyncQueueEntry> {
        entry.retry_count += 1;
        if entry.retry_count > self.retry_ceiling {
            debug!(path = %entry.path, retries = entry.retry_count, "Dropping queue entry");
            return Err(entry);
        }
        self.requeue(entry);
        Ok(())
    }

    pub fn get(&self, path: &VaultPath) -> Option<&SyncQueueEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &VaultPath) -> bool {
        self.entries.contains_key(path)
    }

    pub fn remove(&mut self, path: &VaultPath) -> Option<SyncQueueEntry> {
        self.entries.remove(path)
    }

    /// Move a pending entry to a new path, keeping its action
    pub fn rekey(&mut self, from: &VaultPath, to: &VaultPath) {
        if let Some(mut entry) = self.entries.remove(from) {
            entry.path = to.clone();
            self.entries.insert(to.clone(), entry);
        }
    }

    /// Snapshot in drain order
    pub fn snapshot(&self) -> Vec<SyncQueueEntry> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.path.cmp(&b.path)));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ============================================================================
// QuiescenceScheduler
// ============================================================================

/// Per-path debounce of raw local change events
///
/// Cloning shares the timers, so the scheduler can be handed to whatever
/// task receives watcher events while the engine keeps the receiver.
#[derive(Clone)]
pub struct QuiescenceScheduler {
    delay: Duration,
    timers: Arc<Mutex<HashMap<VaultPath, JoinHandle<()>>>>,
    tx: mpsc::UnboundedSender<LocalChange>,
}

impl QuiescenceScheduler {
    /// A scheduler and the receiver of settled changes
    pub fn new(delay: Duration) -> (Self, mpsc::UnboundedReceiver<LocalChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            delay,
            timers: Arc::new(Mutex::new(HashMap::new())),
            tx,
        };
        (scheduler, rx)
    }

    /// (Re)start the timer for the change's path
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&self, change: LocalChange) {
        let Ok(mut timers) = self.timers.lock() else {
            warn!("Quiescence timers poisoned, forwarding change immediately");
            let _ = self.tx.send(change);
            return;
        };
        timers.retain(|_, handle| !handle.is_finished());

        if let LocalChange::Renamed { from, .. } = &change {
            if let Some(pending) = timers.remove(from) {
                pending.abort();
            }
        }

        let key = change.key().clone();
        if let Some(pending) = timers.remove(&key) {
            trace!(path = %key, "Rescheduling quiescence timer");
            pending.abort();
        }

        let tx = self.tx.clone();
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(change).is_err() {
                debug!("Settled change dropped, engine is gone");
            }
        });
        timers.insert(key, handle);
    }

    /// Number of paths still waiting to settle
    pub fn pending(&self) -> usize {
        self.timers
            .lock()
            .map(|timers| timers.values().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    /// Abort every pending timer
    pub fn cancel_all(&self) {
        if let Ok(mut timers) = self.timers.lock() {
            for (_, handle) in timers.drain() {
                handle.abort();
            }
        }
    }
}
