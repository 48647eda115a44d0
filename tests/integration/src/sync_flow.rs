//! End-to-end sync flow over a temp tree and an in-memory remote
//!
//! Exercises the orchestrator through its public surface: recreating
//! missing files, pushing newer local content, idempotence, and failure
//! isolation between tables.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use tabsync_core::{
    Format, Ledger, LedgerEntry, LedgerStore, SyncOrchestrator, TableConfig,
    parse_remote_timestamp,
};
use tabsync_fs::{FileTree, LocalTree};
use tabsync_test_utils::MemoryRemote;
use tempfile::TempDir;
use tokio::sync::Mutex;

struct Harness {
    _dir: TempDir,
    root: PathBuf,
    remote: Arc<MemoryRemote>,
    tree: Arc<LocalTree>,
    ledger: Arc<Mutex<Ledger>>,
    store: LedgerStore,
    orchestrator: SyncOrchestrator,
}

fn widget_config() -> TableConfig {
    TableConfig {
        name_field: vec!["name".into()],
        formats: vec![Format {
            file_name: ":name-script-:sys_id.js".into(),
            content_field: "script".into(),
        }],
    }
}

/// One tracked table with one entry whose file does not exist yet.
fn harness() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let dir = TempDir::new().unwrap();
    let root = dir.path().join("records");
    std::fs::create_dir_all(root.join("sp_widget")).unwrap();

    let mut ledger = Ledger::new(&root);
    ledger.set_table_config("sp_widget", widget_config());
    ledger.append_entry(
        "sp_widget",
        LedgerEntry {
            content_field: "script".into(),
            file_name: "clock-script-abc.js".into(),
        },
    );

    let remote = Arc::new(MemoryRemote::new());
    remote.insert_record(
        "sp_widget",
        "abc",
        &[
            ("name", "clock"),
            ("script", "function clock() {\n  tick();\n}"),
            ("sys_updated_on", "2020-01-01 00:00:00"),
        ],
    );

    let ledger = Arc::new(Mutex::new(ledger));
    let store = LedgerStore::new(dir.path());
    let tree = Arc::new(LocalTree::new());
    let orchestrator = SyncOrchestrator::new(
        remote.clone(),
        tree.clone(),
        ledger.clone(),
        store.clone(),
    );

    Harness {
        _dir: dir,
        root,
        remote,
        tree,
        ledger,
        store,
        orchestrator,
    }
}

fn tracked_path(h: &Harness) -> PathBuf {
    h.root.join("sp_widget").join("clock-script-abc.js")
}

#[tokio::test]
async fn missing_file_is_recreated_normalized_and_stamped() {
    let h = harness();
    // remote content with CRLF line endings
    h.remote.insert_record(
        "sp_widget",
        "abc",
        &[("script", "function clock() {\r\n  tick();\r\n}")],
    );

    let report = h.orchestrator.sync_all().await;
    assert!(report.is_success());

    // content written with line endings normalized
    let path = tracked_path(&h);
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "function clock() {\n  tick();\n}"
    );

    // mtime stamped to the record's update instant
    let stat = h.tree.stat(&path).await.unwrap();
    assert_eq!(
        stat.modified,
        parse_remote_timestamp("2020-01-01 00:00:00").unwrap()
    );

    // ledger unchanged (entry already existed) and persisted
    assert_eq!(h.ledger.lock().await.entries("sp_widget").len(), 1);
    let saved = h.store.load().unwrap().unwrap();
    assert_eq!(saved.entries("sp_widget").len(), 1);

    // nothing was pushed
    assert!(h.remote.updates().is_empty());
}

#[tokio::test]
async fn newer_local_content_is_pushed() {
    let h = harness();
    let path = tracked_path(&h);
    h.tree.write(&path, "function clock() { tock(); }").await.unwrap();
    h.tree
        .set_modified(&path, Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap())
        .await
        .unwrap();

    let report = h.orchestrator.sync_all().await;
    assert!(report.is_success());

    let updates = h.remote.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].table, "sp_widget");
    assert_eq!(updates[0].sys_id, "abc");
    assert_eq!(updates[0].fields["script"], "function clock() { tock(); }");
    assert!(!updates[0].fields.contains_key("sys_id"));

    // the local file was not rewritten
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "function clock() { tock(); }"
    );
    assert_eq!(
        h.remote.field("sp_widget", "abc", "script").as_deref(),
        Some("function clock() { tock(); }")
    );
}

#[tokio::test]
async fn second_sync_is_a_noop() {
    let h = harness();

    let first = h.orchestrator.sync_all().await;
    assert!(first.is_success());

    let second = h.orchestrator.sync_all().await;
    assert!(second.is_noop(), "second pass should change nothing");
    assert!(h.remote.updates().is_empty());
}

#[tokio::test]
async fn one_failing_table_does_not_stop_the_others() {
    let h = harness();
    {
        let mut ledger = h.ledger.lock().await;
        ledger.set_table_config(
            "sys_script",
            TableConfig {
                name_field: vec!["name".into()],
                formats: vec![Format {
                    file_name: ":name-script-:sys_id.js".into(),
                    content_field: "script".into(),
                }],
            },
        );
        // entry whose record the remote does not know
        ledger.append_entry(
            "sys_script",
            LedgerEntry {
                content_field: "script".into(),
                file_name: "ghost-script-zzz.js".into(),
            },
        );
    }
    std::fs::create_dir_all(h.root.join("sys_script")).unwrap();

    let report = h.orchestrator.sync_all().await;

    assert!(report.tables["sp_widget"].is_ok());
    assert!(report.tables["sys_script"].is_err());
    assert!(!report.is_success());

    // the healthy table still produced its file
    assert!(tracked_path(&h).exists());
}

#[tokio::test]
async fn pull_all_rewrites_files_from_the_remote() {
    let h = harness();
    let path = tracked_path(&h);

    // stale local edit that pull overwrites unconditionally
    h.tree.write(&path, "local drift").await.unwrap();

    let report = h.orchestrator.pull_all().await;
    assert!(report.is_success());
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "function clock() {\n  tick();\n}"
    );
}

#[tokio::test]
async fn push_all_sends_every_bound_field() {
    let h = harness();
    let path = tracked_path(&h);
    h.tree.write(&path, "pushed content").await.unwrap();

    let report = h.orchestrator.push_all().await;
    assert!(report.is_success());

    let updates = h.remote.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].fields["script"], "pushed content");
}
