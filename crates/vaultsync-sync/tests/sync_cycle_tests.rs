//! Integration tests: pull / resolve / push cycles
//!
//! Each test runs the engine against a real vault directory, an in-memory
//! SQLite state store and the in-memory remote from `common`.

mod common;

use std::time::Duration;

use common::{p, Harness};
use vaultsync_audit::ReasonCode;
use vaultsync_core::domain::{ActivityAction, ContentHash, LocalChange, RecordStatus, SyncState};

#[tokio::test]
async fn test_initial_sync_uploads_and_downloads() {
    let h = Harness::new().await;
    h.write("notes/local.md", "from this device\n");
    h.remote.put("remote.md", b"from elsewhere\n");
    let mut engine = h.engine().await;

    let report = engine.run_sync().await.unwrap();

    assert_eq!(report.pulled, 1);
    assert_eq!(report.created, 1);
    assert_eq!(h.read("remote.md").as_deref(), Some("from elsewhere\n"));
    assert_eq!(
        h.remote.content_str("notes/local.md").as_deref(),
        Some("from this device\n")
    );
    assert_eq!(engine.records().len(), 2);
    assert!(engine.records().iter().all(|r| r.is_synced()));
    assert_eq!(engine.state(), SyncState::Idle);
    assert_eq!(h.notifier.last().unwrap().category, "sync");
}

#[tokio::test]
async fn test_second_cycle_is_quiet() {
    let h = Harness::new().await;
    h.write("a.md", "alpha\n");
    h.remote.put("b.md", b"beta\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    // the change feed now returns our own upload; it must not bounce back
    let report = engine.run_sync().await.unwrap();
    assert!(report.is_quiet(), "unexpected work: {report:?}");
    assert_eq!(h.remote.calls("download_file"), 1);
}

#[tokio::test]
async fn test_remote_edit_is_pulled() {
    let h = Harness::new().await;
    let id = h.remote.put("daily/today.md", b"draft\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    h.remote.edit(&id, b"final\n");
    let report = engine.run_sync().await.unwrap();

    assert_eq!(report.pulled, 1);
    assert_eq!(h.read("daily/today.md").as_deref(), Some("final\n"));
    let record = engine.record(&p("daily/today.md")).unwrap();
    assert!(record.is_synced());
    assert_eq!(record.remote_id(), &id);
}

#[tokio::test]
async fn test_local_edit_is_pushed() {
    let h = Harness::new().await;
    h.write("a.md", "one\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    h.write("a.md", "two\n");
    engine
        .handle_local_change(LocalChange::Modified(p("a.md")))
        .await;
    assert_eq!(engine.queue_snapshot().len(), 1);

    let report = engine.run_sync().await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(h.remote.content_str("a.md").as_deref(), Some("two\n"));
    assert!(engine.queue_snapshot().is_empty());
}

#[tokio::test]
async fn test_unchanged_save_is_not_queued() {
    let h = Harness::new().await;
    h.write("a.md", "same\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    engine
        .handle_local_change(LocalChange::Modified(p("a.md")))
        .await;
    assert!(engine.queue_snapshot().is_empty());
}

#[tokio::test]
async fn test_non_overlapping_edits_merge_cleanly() {
    let h = Harness::new().await;
    let id = h.remote.put("note.md", b"one\ntwo\nthree\nfour\nfive\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    h.write("note.md", "ONE\ntwo\nthree\nfour\nfive\n");
    h.remote.edit(&id, b"one\ntwo\nthree\nfour\nFIVE\n");

    let report = engine.run_sync().await.unwrap();

    let merged = "ONE\ntwo\nthree\nfour\nFIVE\n";
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.unresolved, 0);
    assert_eq!(h.read("note.md").as_deref(), Some(merged));
    assert_eq!(h.remote.content_str("note.md").as_deref(), Some(merged));
    assert!(engine.record(&p("note.md")).unwrap().is_synced());
    assert!(h.remote.calls("download_revision") >= 1);
    assert_eq!(engine.state(), SyncState::Idle);
}

#[tokio::test]
async fn test_overlapping_edits_leave_markers_until_fixed() {
    let h = Harness::new().await;
    let id = h.remote.put("note.md", b"one\ntwo\nthree\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    h.write("note.md", "one\nlocal two\nthree\n");
    h.remote.edit(&id, b"one\nremote two\nthree\n");
    let report = engine.run_sync().await.unwrap();

    assert_eq!(report.unresolved, 1);
    let content = h.read("note.md").unwrap();
    assert!(content.contains("<<<<<<<"));
    assert!(content.contains("local two"));
    assert!(content.contains("remote two"));
    assert_eq!(
        engine.record(&p("note.md")).unwrap().status(),
        RecordStatus::Conflict
    );
    assert_eq!(engine.state(), SyncState::Conflict);
    assert_eq!(h.notifier.last().unwrap().category, "conflict");
    // the marked-up file never reaches the remote
    assert_eq!(
        h.remote.content_str("note.md").as_deref(),
        Some("one\nremote two\nthree\n")
    );

    // saving with the markers still in place keeps the push on hold
    engine
        .handle_local_change(LocalChange::Modified(p("note.md")))
        .await;
    assert!(engine.queue_snapshot().is_empty());

    h.write("note.md", "one\nboth twos\nthree\n");
    engine
        .handle_local_change(LocalChange::Modified(p("note.md")))
        .await;
    let report = engine.run_sync().await.unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(
        h.remote.content_str("note.md").as_deref(),
        Some("one\nboth twos\nthree\n")
    );
    assert_eq!(engine.state(), SyncState::Idle);
}

#[tokio::test]
async fn test_unbalanced_markers_survive_another_remote_edit() {
    let h = Harness::new().await;
    let id = h.remote.put("note.md", b"one\ntwo\nthree\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    h.write("note.md", "one\nlocal two\nthree\n");
    h.remote.edit(&id, b"one\nremote two\nthree\n");
    engine.run_sync().await.unwrap();
    assert_eq!(
        engine.record(&p("note.md")).unwrap().status(),
        RecordStatus::Conflict
    );

    // half-fixed by hand: the block is opened but never closed
    let broken = "one\n<<<<<<< local\nlocal two\nthree\n";
    h.write("note.md", broken);
    h.remote.edit(&id, b"one\nremote two again\nthree\n");
    let report = engine.run_sync().await.unwrap();

    assert_eq!(report.unresolved, 1);
    assert_eq!(report.updated, 0);
    assert_eq!(h.read("note.md").as_deref(), Some(broken));
    assert_eq!(
        engine.record(&p("note.md")).unwrap().status(),
        RecordStatus::Conflict
    );
    assert_eq!(
        h.remote.content_str("note.md").as_deref(),
        Some("one\nremote two again\nthree\n")
    );
    let malformed = engine
        .activity_entries()
        .iter()
        .filter(|e| e.action() == ActivityAction::Error)
        .filter_map(|e| e.error().and_then(ReasonCode::from_annotated))
        .filter(|r| *r == ReasonCode::MalformedMarkers)
        .count();
    assert_eq!(malformed, 1);
}

#[tokio::test]
async fn test_local_delete_loses_to_remote_edit() {
    let h = Harness::new().await;
    let id = h.remote.put("a.md", b"v1\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    h.delete("a.md");
    engine
        .handle_local_change(LocalChange::Deleted(p("a.md")))
        .await;
    h.remote.edit(&id, b"v2\n");

    engine.run_sync().await.unwrap();

    assert_eq!(h.read("a.md").as_deref(), Some("v2\n"));
    assert!(!h.remote.is_trashed(&id));
    assert!(engine.queue_snapshot().is_empty());
}

#[tokio::test]
async fn test_remote_delete_keeps_local_edits() {
    let h = Harness::new().await;
    let id = h.remote.put("a.md", b"v1\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    h.write("a.md", "edited here\n");
    engine
        .handle_local_change(LocalChange::Modified(p("a.md")))
        .await;
    h.remote.remove(&id);

    let report = engine.run_sync().await.unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(h.read("a.md").as_deref(), Some("edited here\n"));
    let ids = h.remote.ids_at("a.md");
    assert_eq!(ids.len(), 1);
    assert_ne!(ids[0], id);
    assert_eq!(h.remote.content_str("a.md").as_deref(), Some("edited here\n"));
}

#[tokio::test]
async fn test_remote_delete_removes_untouched_file() {
    let h = Harness::new().await;
    let id = h.remote.put("a.md", b"v1\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    h.remote.remove(&id);
    engine.run_sync().await.unwrap();

    assert!(!h.exists("a.md"));
    assert!(engine.record(&p("a.md")).is_none());
}

#[tokio::test]
async fn test_local_delete_is_pushed() {
    let h = Harness::new().await;
    let id = h.remote.put("a.md", b"v1\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    h.delete("a.md");
    engine
        .handle_local_change(LocalChange::Deleted(p("a.md")))
        .await;
    let report = engine.run_sync().await.unwrap();

    assert_eq!(report.deleted, 1);
    assert!(h.remote.is_trashed(&id));
    assert!(engine.record(&p("a.md")).is_none());
}

#[tokio::test]
async fn test_local_rename_moves_remote_file() {
    let h = Harness::new().await;
    h.write("inbox/idea.md", "idea\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();
    let id = h.remote.ids_at("inbox/idea.md")[0].clone();

    std::fs::create_dir_all(h.root().join("projects")).unwrap();
    std::fs::rename(
        h.root().join("inbox/idea.md"),
        h.root().join("projects/idea.md"),
    )
    .unwrap();
    engine
        .handle_local_change(LocalChange::Renamed {
            from: p("inbox/idea.md"),
            to: p("projects/idea.md"),
        })
        .await;
    let report = engine.run_sync().await.unwrap();

    assert_eq!(report.renamed, 1);
    assert_eq!(report.created, 0);
    assert_eq!(h.remote.ids_at("projects/idea.md"), vec![id.clone()]);
    assert!(h.remote.ids_at("inbox/idea.md").is_empty());
    assert_eq!(engine.record(&p("projects/idea.md")).unwrap().remote_id(), &id);
}

#[tokio::test]
async fn test_remote_move_is_applied_locally() {
    let h = Harness::new().await;
    let id = h.remote.put("a.md", b"content\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    h.remote.move_to(&id, "archive/a.md");
    engine.run_sync().await.unwrap();

    assert!(!h.exists("a.md"));
    assert_eq!(h.read("archive/a.md").as_deref(), Some("content\n"));
    assert!(engine.record(&p("archive/a.md")).is_some());
}

#[tokio::test]
async fn test_edit_during_pull_is_pushed_in_the_same_cycle() {
    let h = Harness::new().await;
    h.write("a.md", "first\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();
    let listings = h.remote.calls("list_changed_files");

    let handle = engine.handle();
    let file = h.root().join("a.md");
    h.remote.on_next_list(
        move || {
            std::fs::write(&file, "edited while pulling\n").unwrap();
            handle.local_change(LocalChange::Modified(p("a.md")));
        },
        Duration::from_millis(150),
    );
    let report = engine.run_sync().await.unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(h.remote.calls("list_changed_files"), listings + 1);
    assert_eq!(
        h.remote.content_str("a.md").as_deref(),
        Some("edited while pulling\n")
    );
    let record = engine.record(&p("a.md")).unwrap();
    assert_eq!(
        record.local_hash(),
        &ContentHash::of_bytes(b"edited while pulling\n")
    );
    assert_eq!(record.status(), RecordStatus::Synced);
    assert!(engine.queue_snapshot().is_empty());
}

#[tokio::test]
async fn test_change_settled_while_idle_is_pushed_by_next_sync() {
    let h = Harness::new().await;
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    h.write("late.md", "written while idle\n");
    engine
        .handle()
        .local_change(LocalChange::Created(p("late.md")));
    tokio::time::sleep(Duration::from_millis(150)).await;

    let report = engine.run_sync().await.unwrap();
    assert_eq!(report.created, 1);
    assert!(h.remote.content("late.md").is_some());
}

#[tokio::test]
async fn test_excluded_paths_never_sync() {
    let h = Harness::new().await;
    h.write(".trash/old.md", "gone\n");
    h.write(".DS_Store", "junk");
    h.write("a (conflicted copy 2026-01-01 000000).md", "copy\n");
    h.write("kept.md", "kept\n");
    let mut engine = h.engine().await;

    let report = engine.run_sync().await.unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(h.remote.live_file_count(), 1);
}

#[tokio::test]
async fn test_records_survive_restart() {
    let h = Harness::new().await;
    h.write("a.md", "alpha\n");
    {
        let mut engine = h.engine().await;
        engine.run_sync().await.unwrap();
    }

    let mut engine = h.engine().await;
    assert_eq!(engine.records().len(), 1);
    let report = engine.run_sync().await.unwrap();
    assert!(report.is_quiet());
    assert_eq!(h.remote.calls("create_file"), 1);
}

#[tokio::test]
async fn test_changed_remote_folder_discards_records() {
    let mut h = Harness::new().await;
    h.write("a.md", "alpha\n");
    {
        let mut engine = h.engine().await;
        engine.run_sync().await.unwrap();
    }

    h.config.sync.remote_folder_id = Some("another-root".into());
    let engine = h.engine().await;
    assert!(engine.records().is_empty());
}

#[tokio::test]
async fn test_activity_ledger_tracks_cycle() {
    let h = Harness::new().await;
    h.write("a.md", "alpha\n");
    h.remote.put("b.md", b"beta\n");
    let mut engine = h.engine().await;
    engine.run_sync().await.unwrap();

    let actions: Vec<ActivityAction> = engine
        .activity_entries()
        .iter()
        .map(|e| e.action())
        .collect();
    assert!(actions.contains(&ActivityAction::Upload));
    assert!(actions.contains(&ActivityAction::Download));

    // entries are persisted, so a restarted engine sees them too
    let restarted = h.engine().await;
    assert_eq!(restarted.activity_entries().len(), actions.len());
}
