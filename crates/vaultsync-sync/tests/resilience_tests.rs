//! Integration tests: retries, auth refresh, storage quota and offline mode

mod common;

use std::sync::atomic::Ordering;

use common::{p, FakeTokens, Harness};
use vaultsync_audit::ReasonCode;
use vaultsync_core::domain::{ActivityAction, LocalChange, PauseReason, SyncState};
use vaultsync_core::ports::RemoteError;
use vaultsync_sync::SyncError;

fn server_error() -> RemoteError {
    RemoteError::Server {
        status: 503,
        message: "unavailable".into(),
    }
}

fn failure_reasons(engine: &vaultsync_sync::SyncEngine) -> Vec<ReasonCode> {
    engine
        .activity_entries()
        .iter()
        .filter(|e| e.action() == ActivityAction::Error)
        .filter_map(|e| e.error().and_then(ReasonCode::from_annotated))
        .collect()
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = Harness::new().await;
    h.write("a.md", "alpha\n");
    h.remote.fail("create_file", server_error(), 2);
    let mut engine = h.engine().await;

    let report = engine.run_sync().await.unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(h.remote.calls("create_file"), 3);
}

#[tokio::test]
async fn test_exhausted_retries_drop_the_change() {
    let h = Harness::new().await;
    h.write("a.md", "alpha\n");
    h.write("b.md", "beta\n");
    h.remote.fail("create_file", server_error(), 3);
    let mut engine = h.engine().await;

    let report = engine.run_sync().await.unwrap();

    // the first upload burns every attempt, the second one goes through
    assert_eq!(report.errors, 1);
    assert_eq!(report.created, 1);
    assert_eq!(h.remote.live_file_count(), 1);
    assert!(engine.queue_snapshot().is_empty());
    assert_eq!(failure_reasons(&engine), vec![ReasonCode::RetriesExhausted]);
    assert_eq!(h.notifier.last().unwrap().category, "error");
}

#[tokio::test]
async fn test_permanent_rejection_is_not_retried() {
    let h = Harness::new().await;
    h.write("a.md", "alpha\n");
    h.remote.fail(
        "create_file",
        RemoteError::Validation {
            status: 400,
            message: "invalid name".into(),
        },
        1,
    );
    let mut engine = h.engine().await;

    let report = engine.run_sync().await.unwrap();

    assert_eq!(report.errors, 1);
    assert_eq!(h.remote.calls("create_file"), 1);
    assert_eq!(failure_reasons(&engine), vec![ReasonCode::PermanentRejection]);
}

#[tokio::test]
async fn test_expired_token_is_refreshed_once() {
    let h = Harness::with_tokens(FakeTokens::expired()).await;
    h.write("a.md", "alpha\n");
    let mut engine = h.engine().await;

    let report = engine.run_sync().await.unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(h.tokens.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(h.remote.unauthorized_count(), 1);
}

#[tokio::test]
async fn test_rejected_refresh_requires_sign_in() {
    let h = Harness::with_tokens(FakeTokens::revoked()).await;
    h.write("a.md", "alpha\n");
    let mut engine = h.engine().await;

    let err = engine.run_sync().await.unwrap_err();

    assert!(matches!(err, SyncError::AuthRequired));
    assert_eq!(h.tokens.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(h.remote.unauthorized_count(), 2);
    assert_eq!(engine.state(), SyncState::Error);
    assert_eq!(h.notifier.last().unwrap().title, "Sign-in required");
}

#[tokio::test]
async fn test_unreachable_remote_goes_offline() {
    let h = Harness::new().await;
    h.remote
        .fail("list_changed_files", RemoteError::Network("connection reset".into()), 3);
    let mut engine = h.engine().await;

    let err = engine.run_sync().await.unwrap_err();

    assert!(matches!(err, SyncError::Offline(_)));
    assert_eq!(engine.state(), SyncState::Offline);
    assert_eq!(h.notifier.last().unwrap().category, "offline");

    // the next cycle recovers on its own
    engine.run_sync().await.unwrap();
    assert_eq!(engine.state(), SyncState::Idle);
}

#[tokio::test]
async fn test_failed_download_keeps_the_cursor() {
    let h = Harness::new().await;
    let id = h.remote.put("a.md", b"v1\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    h.remote.edit(&id, b"v2\n");
    h.remote.fail("download_file", server_error(), 3);
    let report = engine.run_sync().await.unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(h.read("a.md").as_deref(), Some("v1\n"));

    // the same change is offered again and applied this time
    let report = engine.run_sync().await.unwrap();
    assert_eq!(report.pulled, 1);
    assert_eq!(h.read("a.md").as_deref(), Some("v2\n"));
}

#[tokio::test]
async fn test_full_storage_pauses_uploads_until_acknowledged() {
    let h = Harness::new().await;
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    h.remote.set_storage_full(true);
    h.write("big.md", "does not fit\n");
    engine
        .handle_local_change(LocalChange::Created(p("big.md")))
        .await;
    let report = engine.run_sync().await.unwrap();

    assert!(report.storage_full);
    assert!(engine.is_storage_paused());
    assert_eq!(engine.state(), SyncState::Paused(PauseReason::StorageFull));
    assert_eq!(engine.queue_snapshot().len(), 1);
    assert_eq!(h.notifier.last().unwrap().category, "quota");
    assert_eq!(failure_reasons(&engine), vec![ReasonCode::QuotaExceeded]);

    // uploads stay parked while paused, without hitting the remote
    let calls = h.remote.calls("create_file");
    engine.run_sync().await.unwrap();
    assert_eq!(h.remote.calls("create_file"), calls);

    let err = engine.acknowledge_storage_quota_pause().await.unwrap_err();
    assert!(matches!(err, SyncError::StorageStillFull { .. }));
    assert!(engine.is_storage_paused());

    h.remote.set_storage_full(false);
    engine.acknowledge_storage_quota_pause().await.unwrap();
    assert!(!engine.is_storage_paused());
    assert_eq!(engine.state(), SyncState::Idle);

    let report = engine.run_sync().await.unwrap();
    assert_eq!(report.created, 1);
    assert!(h.remote.content("big.md").is_some());
}

#[tokio::test]
async fn test_user_pause_blocks_cycles() {
    let h = Harness::new().await;
    let mut engine = h.engine().await;

    engine.pause_sync().await;
    assert_eq!(engine.state(), SyncState::Paused(PauseReason::User));
    assert!(matches!(engine.run_sync().await, Err(SyncError::Paused)));
    assert_eq!(h.remote.calls("list_changed_files"), 0);

    engine.resume_sync().await;
    assert_eq!(engine.state(), SyncState::Idle);
    engine.run_sync().await.unwrap();
}

#[tokio::test]
async fn test_unhashable_remote_file_does_not_abort_the_rescan() {
    let h = Harness::new().await;
    h.remote.hide_hashes();
    h.write("both.md", "same\n");
    h.remote.put("both.md", b"same\n");
    h.remote.put("other.md", b"other\n");
    h.remote.fail(
        "download_file",
        RemoteError::NotFound("both.md".into()),
        1,
    );
    let mut engine = h.engine().await;

    let report = engine.run_sync().await.unwrap();

    assert_eq!(report.errors, 0);
    assert_eq!(h.read("other.md").as_deref(), Some("other\n"));
    assert!(engine.record(&p("other.md")).unwrap().is_synced());
    // compared again when its step downloads it
    assert!(engine.record(&p("both.md")).unwrap().is_synced());
    assert_eq!(h.read("both.md").as_deref(), Some("same\n"));
    assert!(h.files_containing("conflicted copy").is_empty());
    assert_eq!(h.remote.live_file_count(), 2);
}

#[tokio::test]
async fn test_remote_file_missing_during_rescan_is_recorded_per_file() {
    let h = Harness::new().await;
    h.remote.hide_hashes();
    h.write("both.md", "local\n");
    h.remote.put("both.md", b"remote\n");
    h.remote.put("other.md", b"other\n");
    h.remote.fail(
        "download_file",
        RemoteError::NotFound("both.md".into()),
        2,
    );
    let mut engine = h.engine().await;

    let report = engine.run_sync().await.unwrap();

    assert_eq!(report.errors, 1);
    assert_eq!(h.read("other.md").as_deref(), Some("other\n"));
    assert_eq!(h.read("both.md").as_deref(), Some("local\n"));
    assert_eq!(failure_reasons(&engine), vec![ReasonCode::RemoteMissing]);
    assert!(engine.record(&p("both.md")).is_none());

    // no cursor was kept, so the next cycle lists everything again
    let report = engine.run_sync().await.unwrap();
    assert_eq!(report.errors, 0);
    assert_eq!(report.conflicts, 1);
    assert!(engine.record(&p("both.md")).is_some());
}

#[tokio::test]
async fn test_network_failure_while_hashing_remote_aborts_the_cycle() {
    let h = Harness::new().await;
    h.remote.hide_hashes();
    h.write("both.md", "local\n");
    h.remote.put("both.md", b"remote\n");
    h.remote.fail("download_file", RemoteError::Network("down".into()), 3);
    let mut engine = h.engine().await;

    let result = engine.run_sync().await;

    assert!(matches!(result, Err(SyncError::Offline(_))));
}
