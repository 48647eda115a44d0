//! Integrity checking and watch-bridge flows against a real temp tree.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use pretty_assertions::assert_eq;
use tabsync_core::{
    Format, Ledger, LedgerEntry, LedgerStore, Problem, TableConfig, WatchBridge, WatchEvent,
    WatchOutcome, run_check,
};
use tabsync_fs::LocalTree;
use tabsync_test_utils::MemoryRemote;
use tempfile::TempDir;
use tokio::sync::{Mutex, mpsc};

fn widget_config() -> TableConfig {
    TableConfig {
        name_field: vec!["name".into()],
        formats: vec![Format {
            file_name: ":name-script-:sys_id.js".into(),
            content_field: "script".into(),
        }],
    }
}

fn entry(file_name: &str) -> LedgerEntry {
    LedgerEntry {
        content_field: "script".into(),
        file_name: file_name.into(),
    }
}

#[tokio::test]
async fn check_removes_duplicates_and_reports_tree_drift() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("records");
    std::fs::create_dir_all(root.join("sp_widget")).unwrap();

    let mut ledger = Ledger::new(&root);
    ledger.set_table_config("sp_widget", widget_config());
    // the same binding recorded twice: the extra copy is auto-removable
    ledger.append_entry("sp_widget", entry("clock-script-abc.js"));
    ledger.append_entry("sp_widget", entry("clock-script-abc.js"));
    // entry without a file
    ledger.append_entry("sp_widget", entry("gone-script-def.js"));

    // file on disk the ledger does not know
    std::fs::write(root.join("sp_widget/clock-script-abc.js"), "x").unwrap();
    std::fs::write(root.join("sp_widget/stray-script-zzz.js"), "y").unwrap();
    // directory without any table config
    std::fs::create_dir_all(root.join("sys_script")).unwrap();

    let store = LedgerStore::new(dir.path());
    let tree = LocalTree::new();
    let outcome = run_check(&mut ledger, &tree, &store).await.unwrap();

    assert_eq!(outcome.problems.len(), 1);
    let Problem::DuplicateFiles { sys_id, file_names, .. } = &outcome.problems[0] else {
        panic!("expected a duplicate-files problem");
    };
    assert_eq!(sys_id, "abc");
    assert_eq!(file_names.len(), 2);

    // the later of the two identical entries was dropped
    assert_eq!(outcome.removed["sp_widget"], vec!["clock-script-abc.js"]);
    assert_eq!(
        ledger
            .entries("sp_widget")
            .iter()
            .map(|e| e.file_name.as_str())
            .collect::<Vec<_>>(),
        vec!["clock-script-abc.js", "gone-script-def.js"]
    );

    assert_eq!(
        outcome.missing.missing_files,
        vec![PathBuf::from("sp_widget/gone-script-def.js")]
    );
    assert_eq!(
        outcome.missing.missing_ledger_entries,
        vec![PathBuf::from("sp_widget/stray-script-zzz.js")]
    );
    assert_eq!(
        outcome.missing.missing_table_configs,
        vec![PathBuf::from("sys_script")]
    );
    assert_eq!(
        outcome.missing.missing_ledger_tables,
        vec![PathBuf::from("sys_script")]
    );

    // the trimmed ledger was persisted
    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.entries("sp_widget").len(), 2);
}

#[tokio::test]
async fn watch_session_pushes_changes_and_drops_deleted_entries() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("records");
    std::fs::create_dir_all(root.join("sp_widget")).unwrap();

    let mut ledger = Ledger::new(&root);
    ledger.set_table_config("sp_widget", widget_config());
    ledger.append_entry("sp_widget", entry("clock-script-abc.js"));
    ledger.append_entry("sp_widget", entry("timer-script-def.js"));

    let changed = root.join("sp_widget/clock-script-abc.js");
    let deleted = root.join("sp_widget/timer-script-def.js");
    std::fs::write(&changed, "tick();").unwrap();

    let remote = Arc::new(MemoryRemote::new());
    remote.insert_record(
        "sp_widget",
        "abc",
        &[
            ("name", "clock"),
            ("script", "old();"),
            ("sys_updated_on", "2020-01-01 00:00:00"),
        ],
    );

    let store = LedgerStore::new(dir.path());
    let ledger = Arc::new(Mutex::new(ledger));
    let mut bridge = WatchBridge::new(
        remote.clone(),
        Arc::new(LocalTree::new()),
        ledger.clone(),
        store.clone(),
    );

    let (tx, rx) = mpsc::channel(8);
    tx.send(WatchEvent::Ready).await.unwrap();
    tx.send(WatchEvent::Change {
        path: changed.clone(),
        modified: Utc::now(),
    })
    .await
    .unwrap();
    tx.send(WatchEvent::Unlink {
        path: deleted.clone(),
    })
    .await
    .unwrap();
    drop(tx);

    bridge.run(rx).await;

    // the change became a single-field push
    let updates = remote.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].sys_id, "abc");
    assert_eq!(updates[0].fields["script"], "tick();");

    // the unlink removed its entry and persisted the ledger
    let entries: Vec<String> = ledger
        .lock()
        .await
        .entries("sp_widget")
        .iter()
        .map(|e| e.file_name.clone())
        .collect();
    assert_eq!(entries, vec!["clock-script-abc.js".to_string()]);
    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.entries("sp_widget").len(), 1);
}

#[tokio::test]
async fn watch_events_for_unknown_files_leave_state_alone() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("records");
    std::fs::create_dir_all(root.join("sp_widget")).unwrap();

    let mut ledger = Ledger::new(&root);
    ledger.set_table_config("sp_widget", widget_config());
    ledger.append_entry("sp_widget", entry("clock-script-abc.js"));

    let remote = Arc::new(MemoryRemote::new());
    let store = LedgerStore::new(dir.path());
    let ledger = Arc::new(Mutex::new(ledger));
    let mut bridge = WatchBridge::new(
        remote.clone(),
        Arc::new(LocalTree::new()),
        ledger.clone(),
        store,
    );

    let outcome = bridge
        .handle_event(WatchEvent::Unlink {
            path: root.join("sp_widget/unknown-script-zzz.js"),
        })
        .await
        .unwrap();

    assert_eq!(
        outcome,
        WatchOutcome::Unchanged {
            path: root.join("sp_widget/unknown-script-zzz.js"),
        }
    );
    assert!(remote.updates().is_empty());
    assert_eq!(ledger.lock().await.entries("sp_widget").len(), 1);
}
