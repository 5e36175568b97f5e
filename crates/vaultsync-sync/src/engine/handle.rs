//! EngineHandle - a cloneable remote control for a running engine

use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use vaultsync_core::config::SelectiveSyncSettings;
use vaultsync_core::domain::{LocalChange, SyncState};

use super::EngineCommand;
use crate::queue::QuiescenceScheduler;
use crate::SyncError;

/// Sends triggers to [`SyncEngine::run`](super::SyncEngine::run)
///
/// All trigger methods are fire-and-forget: they return immediately and
/// the run loop serializes the work. Sending to an engine that has stopped
/// is a no-op.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    scheduler: QuiescenceScheduler,
    state: watch::Receiver<SyncState>,
}

impl EngineHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<EngineCommand>,
        scheduler: QuiescenceScheduler,
        state: watch::Receiver<SyncState>,
    ) -> Self {
        Self {
            commands,
            scheduler,
            state,
        }
    }

    fn send(&self, command: EngineCommand) {
        if self.commands.send(command).is_err() {
            debug!("Engine stopped, command dropped");
        }
    }

    pub fn request_sync(&self) {
        self.send(EngineCommand::Sync);
    }

    pub fn pull_now(&self) {
        self.send(EngineCommand::PullNow);
    }

    pub fn push_now(&self) {
        self.send(EngineCommand::PushNow);
    }

    /// Report a raw local change; it reaches the engine once the path has
    /// been quiet for the configured delay
    pub fn local_change(&self, change: LocalChange) {
        self.scheduler.schedule(change);
    }

    pub fn pause(&self) {
        self.send(EngineCommand::Pause);
    }

    pub fn resume(&self) {
        self.send(EngineCommand::Resume);
    }

    /// Ask the engine to lift a storage-full pause and wait for the answer
    pub async fn acknowledge_quota(&self) -> Result<(), SyncError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(EngineCommand::AcknowledgeQuota(reply))
            .map_err(|_| SyncError::Cancelled)?;
        answer.await.unwrap_or(Err(SyncError::Cancelled))
    }

    pub fn apply_selective(&self, settings: SelectiveSyncSettings) {
        self.send(EngineCommand::ApplySelective(settings));
    }

    pub fn shutdown(&self) {
        self.send(EngineCommand::Shutdown);
    }

    /// Latest published state
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use vaultsync_core::domain::VaultPath;

    use super::*;

    fn handle() -> (
        EngineHandle,
        mpsc::UnboundedReceiver<EngineCommand>,
        mpsc::UnboundedReceiver<LocalChange>,
        watch::Sender<SyncState>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (scheduler, settled) = QuiescenceScheduler::new(Duration::from_millis(50));
        let (state_tx, state_rx) = watch::channel(SyncState::Idle);
        (EngineHandle::new(tx, scheduler, state_rx), rx, settled, state_tx)
    }

    #[tokio::test]
    async fn test_commands_reach_the_loop() {
        let (handle, mut rx, _settled, _state) = handle();
        handle.request_sync();
        handle.pause();
        handle.shutdown();

        assert!(matches!(rx.recv().await, Some(EngineCommand::Sync)));
        assert!(matches!(rx.recv().await, Some(EngineCommand::Pause)));
        assert!(matches!(rx.recv().await, Some(EngineCommand::Shutdown)));
    }

    #[tokio::test]
    async fn test_acknowledge_quota_waits_for_reply() {
        let (handle, mut rx, _settled, _state) = handle();
        let loop_task = tokio::spawn(async move {
            if let Some(EngineCommand::AcknowledgeQuota(reply)) = rx.recv().await {
                let _ = reply.send(Err(SyncError::StorageStillFull { used: 10, limit: 10 }));
            }
        });

        let result = handle.acknowledge_quota().await;
        assert!(matches!(result, Err(SyncError::StorageStillFull { .. })));
        loop_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_engine_cancels_acknowledgement() {
        let (handle, rx, _settled, _state) = handle();
        drop(rx);
        handle.pull_now();
        assert!(matches!(
            handle.acknowledge_quota().await,
            Err(SyncError::Cancelled)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_changes_are_debounced() {
        let (handle, _rx, mut settled, _state) = handle();
        let path = VaultPath::new("notes/a.md").unwrap();
        handle.local_change(LocalChange::Modified(path.clone()));
        handle.local_change(LocalChange::Modified(path.clone()));

        let change = settled.recv().await.unwrap();
        assert_eq!(change, LocalChange::Modified(path));
        assert!(settled.try_recv().is_err());
    }

    #[test]
    fn test_state_follows_publisher() {
        let (handle, _rx, _settled, state) = handle();
        assert_eq!(handle.state(), SyncState::Idle);
        state.send_replace(SyncState::Syncing);
        assert_eq!(handle.state(), SyncState::Syncing);
    }
}
