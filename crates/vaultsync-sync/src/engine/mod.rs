//! SyncEngine - orchestrates vault synchronization
//!
//! The engine owns the record store, the change queue and the activity
//! ledger, and drives every remote call through the injected ports. A sync
//! cycle runs three phases in order:
//!
//! 1. **Pull** ([`pull`]): apply the remote change feed; divergent files
//!    become pending conflicts.
//! 2. **Resolve** ([`resolve`]): settle pending conflicts with the
//!    configured strategies.
//! 3. **Push** ([`push`]): drain the change queue to the remote store.
//!
//! Full re-sync ([`resync`]) and duplicate cleanup ([`cleanup`]) are
//! separate long-running operations that report progress and honour a
//! cancellation token.
//!
//! ## Concurrency
//!
//! All methods take `&mut self`; at most one cycle runs at a time. The
//! long-lived loop in [`SyncEngine::run`] serializes triggers arriving
//! through [`EngineHandle`] and the quiescence scheduler. Local changes that
//! settle while a cycle is in flight are folded into the same cycle.

mod cleanup;
mod handle;
mod pull;
mod push;
mod resolve;
mod resync;

pub use cleanup::{select_primary, CleanupReport};
pub use handle::EngineHandle;
pub use resync::{ResyncAction, ResyncPlan, ResyncStep};

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vaultsync_audit::{ActivityLedger, ReasonCode};
use vaultsync_conflict::{ConflictNamer, ConflictResolver};
use vaultsync_core::config::{Config, SelectiveSyncSettings};
use vaultsync_core::domain::{
    ActivityAction, ActivityLogEntry, ConflictInfo, ExclusionReason, LocalChange, PauseReason,
    QueueAction, RecordStatus, RemoteId, SyncQueueEntry, SyncRecord, SyncState, VariantKind,
    VaultPath,
};
use vaultsync_core::ports::{
    ILocalStore, INotificationSink, IRemoteStore, IStateRepository, ITokenProvider, Notification,
    NullProgress, RemoteError,
};

use crate::exclusion::ExclusionEngine;
use crate::queue::{ChangeQueue, QuiescenceScheduler};
use crate::record_store::SyncRecordStore;
use crate::remote_tree::index_listing;
use crate::retry::{classify, is_transient_error, remote_error, with_retry, FailureKind};
use crate::SyncError;

use self::resolve::PendingConflict;

/// Shortest pull interval the run loop accepts
const MIN_PULL_INTERVAL: Duration = Duration::from_secs(1);

/// External collaborators of the engine
#[derive(Clone)]
pub struct EnginePorts {
    pub remote: Arc<dyn IRemoteStore>,
    pub local: Arc<dyn ILocalStore>,
    pub tokens: Arc<dyn ITokenProvider>,
    pub state: Arc<dyn IStateRepository>,
    pub notifier: Arc<dyn INotificationSink>,
}

/// Counters for one sync cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Remote changes written locally
    pub pulled: usize,
    /// New files uploaded
    pub created: usize,
    /// Existing remote files updated
    pub updated: usize,
    /// Remote renames and moves
    pub renamed: usize,
    /// Remote files trashed
    pub deleted: usize,
    /// Divergences detected
    pub conflicts: usize,
    /// Conflicts left with markers or malformed content
    pub unresolved: usize,
    /// Per-file failures recorded in the ledger
    pub errors: usize,
    /// Uploads were paused because remote storage is full
    pub storage_full: bool,
}

impl CycleReport {
    /// Files pushed in any way
    pub fn pushed(&self) -> usize {
        self.created + self.updated + self.renamed + self.deleted
    }

    /// Nothing moved in either direction
    pub fn is_quiet(&self) -> bool {
        self.pulled == 0 && self.pushed() == 0 && self.conflicts == 0 && self.errors == 0
    }

    fn summary(&self) -> String {
        format!(
            "{} pulled, {} uploaded, {} updated, {} renamed, {} deleted",
            self.pulled, self.created, self.updated, self.renamed, self.deleted
        )
    }
}

/// Where an excluded file lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoredLocation {
    Local,
    Remote,
    Both,
}

/// A file that exists but does not take part in sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IgnoredFile {
    pub path: VaultPath,
    pub location: IgnoredLocation,
    pub reason: ExclusionReason,
}

/// Requests sent to the run loop through [`EngineHandle`]
#[derive(Debug)]
pub(crate) enum EngineCommand {
    Sync,
    PullNow,
    PushNow,
    Pause,
    Resume,
    AcknowledgeQuota(oneshot::Sender<Result<(), SyncError>>),
    ApplySelective(SelectiveSyncSettings),
    Shutdown,
}

/// Map a failure that aborts a whole cycle onto a [`SyncError`]
fn cycle_failure(err: anyhow::Error) -> SyncError {
    match classify(&err) {
        FailureKind::Unauthorized => SyncError::AuthRequired,
        FailureKind::Transient => SyncError::Offline(format!("{err:#}")),
        _ => match err.downcast::<RemoteError>() {
            Ok(remote) => SyncError::Remote(remote),
            Err(err) => SyncError::Io(err),
        },
    }
}

/// Ledger reason code for a per-file failure
fn reason_for(err: &anyhow::Error) -> ReasonCode {
    match classify(err) {
        FailureKind::Transient => ReasonCode::RetriesExhausted,
        FailureKind::Unauthorized => ReasonCode::AuthRequired,
        FailureKind::Quota => ReasonCode::QuotaExceeded,
        FailureKind::NotFound => ReasonCode::RemoteMissing,
        FailureKind::Permanent if remote_error(err).is_some() => ReasonCode::PermanentRejection,
        FailureKind::Permanent => ReasonCode::LocalIo,
    }
}

/// A token provider failure is an auth problem unless it looks like the
/// network is down
fn token_failure(err: anyhow::Error) -> anyhow::Error {
    if is_transient_error(&err) {
        err
    } else {
        anyhow::Error::new(RemoteError::Unauthorized).context(format!("{err:#}"))
    }
}

pub struct SyncEngine {
    config: Config,
    ports: EnginePorts,
    exclusions: ExclusionEngine,
    resolver: ConflictResolver,
    store: SyncRecordStore,
    queue: ChangeQueue,
    ledger: ActivityLedger,

    state: SyncState,
    state_tx: watch::Sender<SyncState>,
    user_paused: bool,
    quota_paused: bool,
    /// A trigger arrived while a cycle was running
    pending: bool,

    conflicts: Vec<PendingConflict>,
    last_conflicts: Vec<ConflictInfo>,

    command_tx: mpsc::UnboundedSender<EngineCommand>,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
    deferred: VecDeque<EngineCommand>,
    scheduler: QuiescenceScheduler,
    settled: mpsc::UnboundedReceiver<LocalChange>,
}

impl SyncEngine {
    /// Load persisted state and build an engine
    ///
    /// When the configured remote folder differs from the one the records
    /// were built against, every record is discarded.
    pub async fn start(config: Config, ports: EnginePorts) -> Result<Self, SyncError> {
        let mut store = SyncRecordStore::new(ports.state.clone());
        store.load().await.map_err(SyncError::Io)?;

        if let Some(configured) = &config.sync.remote_folder_id {
            let configured = RemoteId::new(configured.clone())?;
            match store.remote_root_id() {
                Some(current) if current == &configured => {}
                Some(current) => {
                    info!(
                        from = %current,
                        to = %configured,
                        "Remote folder changed, discarding sync records"
                    );
                    store.reset();
                    store.set_remote_root_id(configured);
                    store.save().await.map_err(SyncError::Io)?;
                }
                None => store.set_remote_root_id(configured),
            }
        }

        let mut ledger = ActivityLedger::new(ports.state.clone());
        ledger.load().await;

        let (scheduler, settled) =
            QuiescenceScheduler::new(Duration::from_millis(config.sync.quiescence_ms));
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SyncState::Idle);

        info!(
            vault = %config.sync.vault_root.display(),
            records = store.len(),
            "Sync engine started"
        );

        Ok(Self {
            exclusions: ExclusionEngine::new(
                config.selective.clone(),
                config.sync.config_dir.clone(),
            ),
            resolver: ConflictResolver::new(&config.conflicts),
            queue: ChangeQueue::default(),
            config,
            ports,
            store,
            ledger,
            state: SyncState::Idle,
            state_tx,
            user_paused: false,
            quota_paused: false,
            pending: false,
            conflicts: Vec::new(),
            last_conflicts: Vec::new(),
            command_tx,
            commands,
            deferred: VecDeque::new(),
            scheduler,
            settled,
        })
    }

    /// A cloneable handle for triggering work from other tasks
    pub fn handle(&self) -> EngineHandle {
        EngineHandle::new(
            self.command_tx.clone(),
            self.scheduler.clone(),
            self.state_tx.subscribe(),
        )
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn records(&self) -> Vec<SyncRecord> {
        self.store.records()
    }

    pub fn record(&self, path: &VaultPath) -> Option<&SyncRecord> {
        self.store.get(path)
    }

    pub fn queue_snapshot(&self) -> Vec<SyncQueueEntry> {
        self.queue.snapshot()
    }

    pub fn activity_entries(&self) -> Vec<ActivityLogEntry> {
        self.ledger.entries()
    }

    /// Conflicts settled by the most recent resolve phase
    pub fn last_conflicts(&self) -> &[ConflictInfo] {
        &self.last_conflicts
    }

    pub fn exclusions(&self) -> &ExclusionEngine {
        &self.exclusions
    }

    pub fn is_storage_paused(&self) -> bool {
        self.quota_paused
    }

    // ========================================================================
    // State and notifications
    // ========================================================================

    fn set_state(&mut self, state: SyncState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Sync state changed");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    /// State to rest in once an operation has finished
    fn settled_state(&self) -> SyncState {
        if self.user_paused {
            SyncState::Paused(PauseReason::User)
        } else if self.quota_paused {
            SyncState::Paused(PauseReason::StorageFull)
        } else if self.store.has_conflicts() {
            SyncState::Conflict
        } else {
            SyncState::Idle
        }
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.ports.notifier.notify(&notification).await {
            warn!(title = %notification.title, error = %e, "Failed to deliver notification");
        }
    }

    fn failure_notification(operation: &str, err: &SyncError) -> Notification {
        match err {
            SyncError::Offline(detail) => {
                Notification::offline("Remote store unreachable", detail.clone())
            }
            SyncError::AuthRequired => Notification::error(
                "Sign-in required",
                "The remote store rejected the access token. Sign in again to resume sync.",
            ),
            SyncError::Cancelled => {
                Notification::sync(format!("{operation} cancelled"), "Completed steps were kept")
            }
            SyncError::Paused => Notification::sync("Sync paused", "Resume sync to continue"),
            other => Notification::error(format!("{operation} failed"), other.to_string()),
        }
    }

    /// Settle state and send the single notification for an operation
    async fn conclude(&mut self, operation: &str, outcome: Result<Notification, &SyncError>) {
        if let Err(e) = self.store.save_if_dirty().await {
            warn!(error = %e, "Failed to save records");
        }
        let state = match &outcome {
            Ok(_) => self.settled_state(),
            Err(SyncError::Offline(_)) => SyncState::Offline,
            Err(
                SyncError::AuthRequired
                | SyncError::Remote(_)
                | SyncError::Io(_)
                | SyncError::Domain(_)
                | SyncError::NoRemoteFolder,
            ) => SyncState::Error,
            Err(SyncError::Paused | SyncError::Cancelled | SyncError::StorageStillFull { .. }) => {
                self.settled_state()
            }
        };
        self.set_state(state);
        let notification = match outcome {
            Ok(success) => success,
            Err(err) => Self::failure_notification(operation, err),
        };
        self.notify(notification).await;
    }

    fn cycle_notification(&self, report: &CycleReport) -> Notification {
        if report.storage_full {
            Notification::quota(
                "Remote storage full",
                "Uploads are paused until storage is freed and the pause is acknowledged",
            )
        } else if report.unresolved > 0 {
            Notification::conflict(
                "Conflicts need attention",
                format!("{} file(s) contain conflict markers", report.unresolved),
            )
        } else if report.errors > 0 {
            Notification::error(
                "Sync finished with errors",
                format!("{} file(s) failed; see the activity log", report.errors),
            )
        } else {
            Notification::sync("Sync complete", report.summary())
        }
    }

    // ========================================================================
    // Remote calls
    // ========================================================================

    fn root_id(&self) -> Result<RemoteId, SyncError> {
        self.store
            .remote_root_id()
            .cloned()
            .ok_or(SyncError::NoRemoteFolder)
    }

    /// Run a remote call with retry, refreshing the token once on 401
    async fn call_remote<T, F, Fut>(&self, operation: &str, f: F) -> anyhow::Result<T>
    where
        F: Fn(Arc<dyn IRemoteStore>, String) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let token = self
            .ports
            .tokens
            .get_access_token()
            .await
            .map_err(token_failure)?;
        let first = with_retry(&self.config.retry, operation, || {
            f(self.ports.remote.clone(), token.clone())
        })
        .await;

        match first {
            Err(err) if classify(&err) == FailureKind::Unauthorized => {
                warn!(operation, "Access token rejected, refreshing once");
                let fresh = self
                    .ports
                    .tokens
                    .refresh_after_unauthorized()
                    .await
                    .map_err(token_failure)?;
                with_retry(&self.config.retry, operation, || {
                    f(self.ports.remote.clone(), fresh.clone())
                })
                .await
            }
            other => other,
        }
    }

    /// A conflict-copy path that exists neither locally nor in the store
    async fn free_variant_path(
        &self,
        path: &VaultPath,
        kind: VariantKind,
    ) -> anyhow::Result<VaultPath> {
        let mut taken = HashSet::new();
        loop {
            let candidate =
                ConflictNamer::generate_unique(path, kind, Utc::now(), |p| taken.contains(p))?;
            if self.ports.local.stat(&candidate).await?.is_none()
                && self.store.get(&candidate).is_none()
            {
                return Ok(candidate);
            }
            taken.insert(candidate);
        }
    }

    // ========================================================================
    // Sync cycles
    // ========================================================================

    /// Pull, resolve and push
    pub async fn run_sync(&mut self) -> Result<CycleReport, SyncError> {
        self.run_cycle(true).await
    }

    /// Pull and resolve without pushing
    pub async fn run_pull_now(&mut self) -> Result<CycleReport, SyncError> {
        self.run_cycle(false).await
    }

    /// Push the queue; a pull always runs first so pushes never overwrite
    /// unseen remote changes
    pub async fn run_push_now(&mut self) -> Result<CycleReport, SyncError> {
        self.run_cycle(true).await
    }

    #[tracing::instrument(skip(self))]
    async fn run_cycle(&mut self, push: bool) -> Result<CycleReport, SyncError> {
        if self.user_paused {
            debug!("Sync requested while paused");
            return Err(SyncError::Paused);
        }
        let root = match self.root_id() {
            Ok(root) => root,
            Err(err) => {
                self.conclude("Sync", Err(&err)).await;
                return Err(err);
            }
        };

        let mut report = CycleReport::default();
        let result = self.cycle_loop(&root, push, &mut report).await;
        match result {
            Ok(()) => {
                let requests = self.ports.remote.get_rate_limit_snapshot();
                info!(
                    pulled = report.pulled,
                    pushed = report.pushed(),
                    conflicts = report.conflicts,
                    errors = report.errors,
                    requests_last_minute = requests.requests_last_minute,
                    throttled_total = requests.throttled_total,
                    "Sync cycle complete"
                );
                let notification = self.cycle_notification(&report);
                self.conclude("Sync", Ok(notification)).await;
                Ok(report)
            }
            Err(err) => {
                warn!(error = %err, "Sync cycle failed");
                self.conclude("Sync", Err(&err)).await;
                Err(err)
            }
        }
    }

    async fn cycle_loop(
        &mut self,
        root: &RemoteId,
        push: bool,
        report: &mut CycleReport,
    ) -> Result<(), SyncError> {
        loop {
            self.pending = false;
            self.set_state(SyncState::Syncing);

            self.pull_phase(root, report).await?;
            self.absorb_settled().await;
            self.resolve_phase(report).await?;
            if push {
                self.push_phase(root, report).await?;
            }

            if self.absorb_settled().await > 0 && push {
                self.pending = true;
            }
            if !self.pending {
                return Ok(());
            }
            debug!("Changes arrived mid-cycle, running again");
            self.set_state(SyncState::Pending);
        }
    }

    /// Fold settled local changes and queued triggers into the running cycle
    async fn absorb_settled(&mut self) -> usize {
        let mut absorbed = 0;
        while let Ok(change) = self.settled.try_recv() {
            self.handle_local_change(change).await;
            absorbed += 1;
        }
        while let Ok(command) = self.commands.try_recv() {
            match command {
                EngineCommand::Sync | EngineCommand::PullNow | EngineCommand::PushNow => {
                    self.pending = true
                }
                other => self.deferred.push_back(other),
            }
        }
        absorbed
    }

    // ========================================================================
    // Pause and quota
    // ========================================================================

    pub async fn pause_sync(&mut self) {
        if self.user_paused {
            return;
        }
        self.user_paused = true;
        self.set_state(SyncState::Paused(PauseReason::User));
        self.ledger
            .record(ActivityAction::Pause, "", "sync paused by user")
            .await;
        info!("Sync paused");
    }

    pub async fn resume_sync(&mut self) {
        if !self.user_paused {
            return;
        }
        self.user_paused = false;
        let state = self.settled_state();
        self.set_state(state);
        self.ledger
            .record(ActivityAction::Pause, "", "sync resumed by user")
            .await;
        info!(state = %state, "Sync resumed");
    }

    fn enter_storage_full(&mut self) {
        if !self.quota_paused {
            warn!("Remote storage full, pausing uploads");
            self.quota_paused = true;
        }
        if !self.user_paused {
            self.set_state(SyncState::Paused(PauseReason::StorageFull));
        }
    }

    /// Clear a storage-full pause after checking the quota again
    pub async fn acknowledge_storage_quota_pause(&mut self) -> Result<(), SyncError> {
        if !self.quota_paused {
            return Ok(());
        }
        let quota = self
            .call_remote("get_storage_quota", |remote, token| async move {
                remote.get_storage_quota(&token).await
            })
            .await
            .map_err(cycle_failure)?;

        if let Some(limit) = quota.limit {
            if quota.used >= limit {
                info!(used = quota.used, limit, "Remote storage still full");
                return Err(SyncError::StorageStillFull {
                    used: quota.used,
                    limit,
                });
            }
        }

        self.quota_paused = false;
        let state = self.settled_state();
        self.set_state(state);
        self.ledger
            .record(ActivityAction::Pause, "", "storage pause acknowledged")
            .await;
        info!(used = quota.used, limit = ?quota.limit, "Storage pause cleared");
        Ok(())
    }

    // ========================================================================
    // Local changes
    // ========================================================================

    /// Turn a settled local change into queue entries
    pub async fn handle_local_change(&mut self, change: LocalChange) {
        let now = Utc::now();
        match change {
            LocalChange::Created(path) | LocalChange::Modified(path) => {
                self.note_local_write(path, now).await
            }
            LocalChange::Deleted(path) => self.note_local_delete(path, now),
            LocalChange::Renamed { from, to } => self.note_local_rename(from, to, now).await,
        }
    }

    async fn note_local_write(&mut self, path: VaultPath, now: chrono::DateTime<Utc>) {
        let entry = match self.ports.local.stat(&path).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return self.note_local_delete(path, now),
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to stat changed file");
                return;
            }
        };
        if let Some(reason) = self.exclusions.reason(&path, Some(entry.size)) {
            debug!(path = %path, reason = %reason, "Ignoring excluded change");
            return;
        }
        let hash = match self.ports.local.content_hash(&path).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to hash changed file");
                return;
            }
        };

        let action = match self.store.get(&path) {
            Some(record) if record.local_hash() == &hash && !self.queue.contains(&path) => {
                debug!(path = %path, "Content unchanged, nothing to push");
                return;
            }
            Some(record) if record.status() == RecordStatus::Conflict => {
                if self.still_has_markers(&path).await {
                    let remote = record.remote_hash().clone();
                    self.store.update(&path, |r| r.mark_conflict(hash, remote));
                    debug!(path = %path, "Conflict markers still present, holding push");
                    return;
                }
                QueueAction::Update
            }
            Some(_) => QueueAction::Update,
            None => QueueAction::Create,
        };

        if action == QueueAction::Update {
            let noted = hash.clone();
            self.store.update(&path, |r| r.note_local_change(noted));
        }
        debug!(path = %path, action = %action, "Local change queued");
        self.queue
            .enqueue(SyncQueueEntry::new(action, path, Some(hash), now));
    }

    async fn still_has_markers(&self, path: &VaultPath) -> bool {
        match self.ports.local.read(path).await {
            Ok(bytes) => std::str::from_utf8(&bytes)
                .map(|text| vaultsync_conflict::markers::analyze(text).has_conflict_markers)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    fn note_local_delete(&mut self, path: VaultPath, now: chrono::DateTime<Utc>) {
        if self.store.get(&path).is_some() || self.queue.contains(&path) {
            debug!(path = %path, "Local delete queued");
            self.queue
                .enqueue(SyncQueueEntry::new(QueueAction::Delete, path, None, now));
        }
    }

    async fn note_local_rename(
        &mut self,
        from: VaultPath,
        to: VaultPath,
        now: chrono::DateTime<Utc>,
    ) {
        let size = match self.ports.local.stat(&to).await {
            Ok(Some(entry)) => entry.size,
            Ok(None) => return self.note_local_delete(from, now),
            Err(e) => {
                warn!(path = %to, error = %e, "Failed to stat renamed file");
                return;
            }
        };
        let tracked = self.store.get(&from).is_some() || self.queue.contains(&from);

        if self.exclusions.reason(&to, Some(size)).is_some() {
            debug!(from = %from, to = %to, "Renamed into an excluded path");
            self.note_local_delete(from, now);
        } else if !tracked {
            self.note_local_write(to, now).await;
        } else {
            let hash = self.ports.local.content_hash(&to).await.ok();
            debug!(from = %from, to = %to, "Local rename queued");
            self.queue.enqueue(SyncQueueEntry::rename(from, to, hash, now));
        }
    }

    // ========================================================================
    // Selective sync
    // ========================================================================

    /// Swap the selective-sync settings and queue files that became included
    ///
    /// Returns the number of files queued. Files that became excluded are
    /// left alone on both sides.
    pub async fn apply_selective_settings(
        &mut self,
        settings: SelectiveSyncSettings,
    ) -> Result<usize, SyncError> {
        let entries = self.ports.local.list().await.map_err(SyncError::Io)?;
        let before: Vec<bool> = entries
            .iter()
            .map(|e| self.exclusions.is_included(&e.path, Some(e.size)))
            .collect();

        self.exclusions.replace_settings(settings.clone());
        self.config.selective = settings;

        let now = Utc::now();
        let mut queued = 0;
        for (entry, was_included) in entries.into_iter().zip(before) {
            if was_included || !self.exclusions.is_included(&entry.path, Some(entry.size)) {
                continue;
            }
            let hash = match self.ports.local.content_hash(&entry.path).await {
                Ok(hash) => hash,
                Err(e) => {
                    warn!(path = %entry.path, error = %e, "Failed to hash newly included file");
                    continue;
                }
            };
            let action = match self.store.get(&entry.path) {
                Some(record) if record.local_hash() == &hash && record.is_synced() => continue,
                Some(_) => QueueAction::Update,
                None => QueueAction::Create,
            };
            self.queue
                .enqueue(SyncQueueEntry::new(action, entry.path, Some(hash), now));
            queued += 1;
        }

        info!(queued, "Selective sync settings applied");
        Ok(queued)
    }

    /// Every existing file that exclusion rules keep out of sync
    pub async fn list_sync_ignored_files(&self) -> Result<Vec<IgnoredFile>, SyncError> {
        let root = self.root_id()?;
        let mut ignored: BTreeMap<VaultPath, IgnoredFile> = list_local_ignored(
            self.ports.local.as_ref(),
            &self.exclusions,
        )
        .await
        .map_err(SyncError::Io)?
        .into_iter()
        .map(|f| (f.path.clone(), f))
        .collect();

        let root_ref = &root;
        let page = self
            .call_remote("list_changed_files", |remote, token| async move {
                remote.list_changed_files(&token, root_ref, None).await
            })
            .await
            .map_err(cycle_failure)?;

        for (path, files) in index_listing(&root, page.files).files {
            let size = files.first().map(|f| f.size);
            let Some(reason) = self.exclusions.reason(&path, size) else {
                continue;
            };
            match ignored.get_mut(&path) {
                Some(existing) => existing.location = IgnoredLocation::Both,
                None => {
                    ignored.insert(
                        path.clone(),
                        IgnoredFile {
                            path,
                            location: IgnoredLocation::Remote,
                            reason,
                        },
                    );
                }
            }
        }
        Ok(ignored.into_values().collect())
    }

    // ========================================================================
    // Run loop
    // ========================================================================

    /// Serve triggers until `cancel` fires or a shutdown is requested
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), SyncError> {
        let pull_every =
            Duration::from_secs(self.config.sync.pull_interval_secs).max(MIN_PULL_INTERVAL);
        let cleanup_every =
            Duration::from_secs(self.config.sync.duplicate_cleanup_interval_secs.max(1));
        let mut pull_timer = tokio::time::interval(pull_every);
        let mut cleanup_timer = tokio::time::interval(cleanup_every);
        pull_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        cleanup_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately
        pull_timer.tick().await;
        cleanup_timer.tick().await;

        info!(pull_secs = pull_every.as_secs(), "Sync loop running");
        Self::log_outcome("startup sync", self.run_sync().await);

        loop {
            let keep_going = tokio::select! {
                _ = cancel.cancelled() => false,
                Some(command) = self.commands.recv() => self.handle_command(command).await,
                Some(change) = self.settled.recv() => {
                    self.handle_local_change(change).await;
                    while let Ok(change) = self.settled.try_recv() {
                        self.handle_local_change(change).await;
                    }
                    if !self.user_paused {
                        Self::log_outcome("push", self.run_push_now().await);
                    }
                    true
                }
                _ = pull_timer.tick() => {
                    if !self.user_paused {
                        Self::log_outcome("scheduled pull", self.run_sync().await);
                    }
                    true
                }
                _ = cleanup_timer.tick() => {
                    if !self.user_paused {
                        let outcome = self
                            .clean_duplicate_artifacts(&NullProgress, &cancel)
                            .await;
                        Self::log_outcome("duplicate cleanup", outcome);
                    }
                    true
                }
            };
            if !keep_going || !self.drain_deferred().await {
                break;
            }
        }

        self.scheduler.cancel_all();
        self.store.save().await.map_err(SyncError::Io)?;
        info!("Sync loop stopped");
        Ok(())
    }

    async fn drain_deferred(&mut self) -> bool {
        while let Some(command) = self.deferred.pop_front() {
            if !self.handle_command(command).await {
                return false;
            }
        }
        true
    }

    async fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Sync => Self::log_outcome("sync", self.run_sync().await),
            EngineCommand::PullNow => Self::log_outcome("pull", self.run_pull_now().await),
            EngineCommand::PushNow => Self::log_outcome("push", self.run_push_now().await),
            EngineCommand::Pause => self.pause_sync().await,
            EngineCommand::Resume => {
                self.resume_sync().await;
                Self::log_outcome("sync", self.run_sync().await);
            }
            EngineCommand::AcknowledgeQuota(reply) => {
                let result = self.acknowledge_storage_quota_pause().await;
                let cleared = result.is_ok();
                let _ = reply.send(result);
                if cleared && !self.user_paused {
                    Self::log_outcome("sync", self.run_sync().await);
                }
            }
            EngineCommand::ApplySelective(settings) => {
                match self.apply_selective_settings(settings).await {
                    Ok(queued) if queued > 0 && !self.user_paused => {
                        Self::log_outcome("sync", self.run_sync().await)
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Failed to apply selective sync settings"),
                }
            }
            EngineCommand::Shutdown => return false,
        }
        true
    }

    fn log_outcome<T>(operation: &str, outcome: Result<T, SyncError>) {
        match outcome {
            Ok(_) => {}
            Err(SyncError::Paused) => debug!(operation, "Skipped while paused"),
            Err(e) => warn!(operation, error = %e, "Operation failed"),
        }
    }
}

/// Local files kept out of sync by `exclusions`
pub async fn list_local_ignored(
    local: &dyn ILocalStore,
    exclusions: &ExclusionEngine,
) -> anyhow::Result<Vec<IgnoredFile>> {
    Ok(local
        .list()
        .await?
        .into_iter()
        .filter_map(|entry| {
            exclusions
                .reason(&entry.path, Some(entry.size))
                .map(|reason| IgnoredFile {
                    path: entry.path,
                    location: IgnoredLocation::Local,
                    reason,
                })
        })
        .collect())
}
