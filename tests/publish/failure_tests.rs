use std::sync::Arc;

use bucket_publish::error::{Operation, SyncError};
use bucket_publish::fs::memory::MemoryStore;
use bucket_publish::sync::engine::{ErrorPolicy, PublishEngine, SyncOptions};

use crate::common::{build_dir, options, run};

#[tokio::test]
async fn test_missing_build_dir_touches_nothing() {
    let dir = build_dir(&[]);
    let store = Arc::new(MemoryStore::new());
    store.insert("a.txt", b"x");

    let err = PublishEngine::new(store.clone(), SyncOptions::new(dir.path().join("missing")))
        .run()
        .await
        .unwrap_err();

    assert!(err.is_configuration());
    assert_eq!(store.list_calls(), 0);
    assert_eq!(store.keys(), vec!["a.txt"]);
}

#[tokio::test]
async fn test_listing_failure_aborts_before_writes() {
    let dir = build_dir(&[("a.txt", b"hi")]);
    let store = Arc::new(MemoryStore::new());
    store.fail_listing("InvalidAccessKeyId");

    let err = PublishEngine::new(store.clone(), options(dir.path()))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Connectivity { .. }));
    assert!(store.puts().is_empty());
    assert!(store.deletes().is_empty());
}

#[tokio::test]
async fn test_failed_upload_keeps_remote_copy() {
    let dir = build_dir(&[("a.txt", b"new"), ("b.txt", b"fine")]);
    let store = Arc::new(MemoryStore::new());
    store.insert("a.txt", b"old");
    store.insert("stale.txt", b"x");
    store.fail_put("a.txt");

    let summary = run(&store, options(dir.path())).await;

    assert!(!summary.is_success());
    assert_eq!(summary.failures.len(), 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.key, "a.txt");
    assert_eq!(failure.operation, Operation::Put);
    assert_eq!(failure.attempts, 1);

    // The failed key was still matched, so it is not treated as stale.
    assert_eq!(store.deletes(), vec!["stale.txt"]);
    assert_eq!(store.get("a.txt").unwrap().data, b"old");
    assert_eq!(summary.uploaded, 1);
}

#[tokio::test]
async fn test_failed_delete_is_reported() {
    let dir = build_dir(&[("a.txt", b"hi")]);
    let store = Arc::new(MemoryStore::new());
    store.insert("stale.txt", b"x");
    store.fail_delete("stale.txt");

    let summary = run(&store, options(dir.path())).await;

    assert_eq!(summary.deleted, 0);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].operation, Operation::Delete);
    assert_eq!(store.keys(), vec!["a.txt", "stale.txt"]);
}

#[tokio::test]
async fn test_transient_put_failure_is_retried() {
    let dir = build_dir(&[("a.txt", b"hi")]);
    let store = Arc::new(MemoryStore::new());
    store.flaky_put("a.txt", 2);

    let summary = run(&store, options(dir.path())).await;

    assert!(summary.is_success());
    assert_eq!(summary.uploaded, 1);
    assert_eq!(store.puts(), vec!["a.txt"]);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let dir = build_dir(&[("a.txt", b"hi")]);
    let store = Arc::new(MemoryStore::new());
    store.flaky_put("a.txt", 10);

    let summary = run(&store, options(dir.path())).await;

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].attempts, 3);
    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn test_fail_fast_returns_first_error() {
    let dir = build_dir(&[("a.txt", b"hi")]);
    let store = Arc::new(MemoryStore::new());
    store.insert("stale.txt", b"x");
    store.fail_put("a.txt");

    let mut opts = options(dir.path());
    opts.error_policy = ErrorPolicy::FailFast;
    let err = PublishEngine::new(store.clone(), opts).run().await.unwrap_err();

    match err {
        SyncError::Transfer { op, key, .. } => {
            assert_eq!(op, Operation::Put);
            assert_eq!(key, "a.txt");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(store.deletes().is_empty());
}

#[tokio::test]
async fn test_vanished_stale_key_counts_as_deleted() {
    let dir = build_dir(&[("a.txt", b"hi")]);
    let store = Arc::new(MemoryStore::new());
    store.insert("stale.txt", b"x");
    store.vanish_before_delete("stale.txt");

    let summary = run(&store, options(dir.path())).await;

    assert!(summary.is_success());
    assert_eq!(summary.deleted, 1);
    assert_eq!(store.keys(), vec!["a.txt"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_local_file_keeps_remote_copy() {
    let dir = build_dir(&[("a.txt", b"hi")]);
    std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("link.txt")).unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert("link.txt", b"published earlier");

    let summary = run(&store, options(dir.path())).await;

    assert_eq!(summary.deleted, 0);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].key, "link.txt");
    assert_eq!(summary.failures[0].operation, Operation::Put);
    assert!(store.deletes().is_empty());
    assert_eq!(store.get("link.txt").unwrap().data, b"published earlier");
}
