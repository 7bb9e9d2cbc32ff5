mod common;

use std::path::PathBuf;
use std::sync::Arc;

use assert_fs::prelude::*;
use assert_matches::assert_matches;
use async_trait::async_trait;
use common::{directory_with, Call, Failures, RecordingStore, HELLO_WORLD_SHA256};
use ifilesentry::scanner::{ChangeAction, PlannedChange};
use ifilesentry::error::Result;
use ifilesentry::{RemoteFileRecord, RemoteStore, Scanner, SyncError, Transaction, WatchTarget};

fn target(dir: &assert_fs::TempDir, exclude: &[&str]) -> WatchTarget {
    WatchTarget::new(
        dir.path(),
        exclude.iter().map(|p| p.to_string()).collect(),
    )
}

fn scanner(store: &RecordingStore) -> Scanner {
    Scanner::new(Arc::new(store.clone()))
}

#[tokio::test]
async fn test_empty_remote_creates_every_file_in_one_transaction() {
    let dir = directory_with(&[
        ("a.tcl", b"when HTTP_REQUEST {}"),
        ("b.html", b"<html></html>"),
        ("c.json", b"{}"),
    ]);
    let store = RecordingStore::new();

    let report = scanner(&store).scan(&target(&dir, &[])).await.unwrap();

    assert_eq!(report.created, vec!["a.tcl", "b.html", "c.json"]);
    assert!(report.updated.is_empty());
    assert!(report.committed);
    assert_eq!(store.transactions(), 1);
    assert_eq!(store.commits(), 1);
    assert!(store
        .mutations()
        .iter()
        .all(|c| matches!(c, Call::Create { tx: 1, .. })));
    assert_eq!(store.mutations().len(), 3);
}

#[tokio::test]
async fn test_exclusion_and_size_scenario() {
    let dir = directory_with(&[("a.txt", b"0123456789"), ("a.tmp", b"12345")]);
    let store = RecordingStore::new();

    scanner(&store).scan(&target(&dir, &["*.tmp"])).await.unwrap();

    assert_eq!(
        store.journal(),
        vec![
            Call::List,
            Call::Begin(1),
            Call::Create {
                tx: 1,
                name: "a.txt".to_string(),
                content: b"0123456789".to_vec(),
                size: 10,
            },
            Call::Commit(1),
        ]
    );
}

#[tokio::test]
async fn test_matching_checksums_commit_nothing() {
    let dir = directory_with(&[("hello.txt", b"hello world")]);
    let descriptor = format!("sha256:{}", HELLO_WORLD_SHA256);
    let store = RecordingStore::with_records(&[("hello.txt", descriptor.as_str())]);

    let report = scanner(&store).scan(&target(&dir, &[])).await.unwrap();

    assert_eq!(report.unchanged, vec!["hello.txt"]);
    assert!(!report.committed);
    assert!(store.mutations().is_empty());
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn test_changed_checksum_updates() {
    let dir = directory_with(&[("hello.txt", b"hello world!")]);
    let descriptor = format!("SHA256:{}", HELLO_WORLD_SHA256);
    let store = RecordingStore::with_records(&[("hello.txt", descriptor.as_str())]);

    let report = scanner(&store).scan(&target(&dir, &[])).await.unwrap();

    assert_eq!(report.updated, vec!["hello.txt"]);
    assert_matches!(
        store.mutations().as_slice(),
        [Call::Update { name, size: 12, .. }] if name == "hello.txt"
    );
    assert_eq!(store.commits(), 1);
}

#[tokio::test]
async fn test_unsupported_algorithm_aborts_without_commit() {
    let dir = directory_with(&[("a.tcl", b"first"), ("b.tcl", b"second")]);
    let store = RecordingStore::with_records(&[("b.tcl", "crc32:deadbeef")]);

    let err = scanner(&store).scan(&target(&dir, &[])).await.unwrap_err();

    assert_matches!(err, SyncError::UnsupportedAlgorithm { ref algorithm, .. } if algorithm == "crc32");
    // a.tcl was already scheduled in the abandoned transaction
    assert_eq!(store.mutations().len(), 1);
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn test_zero_byte_files_are_never_synced() {
    let dir = directory_with(&[("empty.tcl", b""), ("full.tcl", b"x")]);
    let store = RecordingStore::with_records(&[("empty.tcl", "sha256:00")]);

    let report = scanner(&store).scan(&target(&dir, &[])).await.unwrap();

    assert_eq!(report.created, vec!["full.tcl"]);
    assert!(!store.mutations().iter().any(|c| matches!(
        c,
        Call::Create { name, .. } | Call::Update { name, .. } if name == "empty.tcl"
    )));
}

#[tokio::test]
async fn test_remote_only_records_are_kept() {
    let dir = directory_with(&[("local.tcl", b"x")]);
    let store = RecordingStore::with_records(&[("remote-only.tcl", "sha256:00")]);

    scanner(&store).scan(&target(&dir, &[])).await.unwrap();

    assert!(!store
        .journal()
        .iter()
        .any(|c| matches!(c, Call::Delete { .. })));
}

#[tokio::test]
async fn test_subdirectories_are_skipped() {
    let dir = directory_with(&[("top.tcl", b"x")]);
    dir.child("nested/inner.tcl").write_str("y").unwrap();
    let store = RecordingStore::new();

    let report = scanner(&store).scan(&target(&dir, &[])).await.unwrap();

    assert_eq!(report.created, vec!["top.tcl"]);
}

#[tokio::test]
async fn test_remote_list_failure_opens_no_transaction() {
    let dir = directory_with(&[("a.tcl", b"x")]);
    let store = RecordingStore::new();
    store.fail(Failures {
        list: true,
        ..Default::default()
    });

    let err = scanner(&store).scan(&target(&dir, &[])).await.unwrap_err();

    assert_matches!(err, SyncError::RemoteList(_));
    assert_eq!(store.transactions(), 0);
}

#[tokio::test]
async fn test_missing_directory_is_a_read_error() {
    let dir = assert_fs::TempDir::new().unwrap();
    let missing = WatchTarget::new(dir.path().join("missing"), Vec::new());
    let store = RecordingStore::new();

    let err = scanner(&store).scan(&missing).await.unwrap_err();

    assert_matches!(err, SyncError::DirectoryRead { .. });
    assert_eq!(store.transactions(), 0);
}

#[tokio::test]
async fn test_transaction_open_failure() {
    let dir = directory_with(&[("a.tcl", b"x")]);
    let store = RecordingStore::new();
    store.fail(Failures {
        begin: true,
        ..Default::default()
    });

    let err = scanner(&store).scan(&target(&dir, &[])).await.unwrap_err();

    assert_matches!(err, SyncError::TransactionOpen(_));
    assert!(store.mutations().is_empty());
}

#[tokio::test]
async fn test_upload_failure_aborts_scan() {
    let dir = directory_with(&[("a.tcl", b"x"), ("b.tcl", b"y"), ("c.tcl", b"z")]);
    let store = RecordingStore::new();
    store.fail(Failures {
        upload_of: Some("b.tcl".to_string()),
        ..Default::default()
    });

    let err = scanner(&store).scan(&target(&dir, &[])).await.unwrap_err();

    assert_matches!(err, SyncError::Upload { ref name, .. } if name == "b.tcl");
    assert_eq!(store.mutations().len(), 1);
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn test_commit_failure_is_reported() {
    let dir = directory_with(&[("a.tcl", b"x")]);
    let store = RecordingStore::new();
    store.fail(Failures {
        commit_number: Some(1),
        ..Default::default()
    });

    let err = scanner(&store).scan(&target(&dir, &[])).await.unwrap_err();

    assert_matches!(err, SyncError::Commit(_));
}

#[tokio::test]
async fn test_plan_does_not_touch_the_store() {
    let dir = directory_with(&[("hello.txt", b"hello world"), ("new.tcl", b"x"), ("skip.tmp", b"y")]);
    let descriptor = format!("sha256:{}", "0".repeat(64));
    let store = RecordingStore::with_records(&[("hello.txt", descriptor.as_str())]);

    let changes = scanner(&store)
        .plan(&target(&dir, &["*.tmp"]))
        .await
        .unwrap();

    assert_eq!(
        changes,
        vec![
            PlannedChange {
                name: "hello.txt".to_string(),
                action: ChangeAction::Update,
            },
            PlannedChange {
                name: "new.tcl".to_string(),
                action: ChangeAction::Create,
            },
        ]
    );
    assert_eq!(store.journal(), vec![Call::List]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_dangling_symlink_does_not_abort_scan() {
    let dir = directory_with(&[("a.tcl", b"when HTTP_REQUEST {}")]);
    std::os::unix::fs::symlink("/nonexistent/target", dir.path().join(".#a.tcl")).unwrap();
    let store = RecordingStore::new();

    let report = scanner(&store).scan(&target(&dir, &[])).await.unwrap();

    assert_eq!(report.created, vec!["a.tcl"]);
    assert_eq!(store.commits(), 1);
}

#[tokio::test]
async fn test_last_duplicate_remote_record_wins() {
    let dir = directory_with(&[("hello.txt", b"hello world")]);
    let current = format!("sha256:{}", HELLO_WORLD_SHA256);

    let stale_last = RecordingStore::with_records(&[
        ("hello.txt", current.as_str()),
        ("hello.txt", "sha256:00"),
    ]);
    let report = scanner(&stale_last).scan(&target(&dir, &[])).await.unwrap();
    assert_eq!(report.updated, vec!["hello.txt"]);
    assert_eq!(stale_last.commits(), 1);

    let current_last = RecordingStore::with_records(&[
        ("hello.txt", "sha256:00"),
        ("hello.txt", current.as_str()),
    ]);
    let report = scanner(&current_last).scan(&target(&dir, &[])).await.unwrap();
    assert_eq!(report.unchanged, vec!["hello.txt"]);
    assert!(current_last.mutations().is_empty());
}

/// Appends to a file when a transaction opens, after the directory was listed
struct GrowingStore {
    inner: RecordingStore,
    file: PathBuf,
}

#[async_trait]
impl RemoteStore for GrowingStore {
    async fn list_records(&self) -> Result<Vec<RemoteFileRecord>> {
        self.inner.list_records().await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        std::fs::write(&self.file, b"0123456789 and more").unwrap();
        self.inner.begin_transaction().await
    }
}

#[tokio::test]
async fn test_upload_size_matches_content_read() {
    let dir = directory_with(&[("a.txt", b"0123456789")]);
    let recording = RecordingStore::new();
    let store = GrowingStore {
        inner: recording.clone(),
        file: dir.path().join("a.txt"),
    };

    Scanner::new(Arc::new(store))
        .scan(&target(&dir, &[]))
        .await
        .unwrap();

    assert_matches!(
        recording.mutations().as_slice(),
        [Call::Create { content, size: 19, .. }] if content.len() == 19
    );
}
