use std::io::Read;
use std::sync::Arc;

use bucket_publish::fs::backend::AccessPolicy;
use bucket_publish::fs::memory::MemoryStore;
use bucket_publish::sync::compression::ContentEncoder;
use bucket_publish::sync::engine::SyncAction;
use bucket_publish::sync::exclude::ExcludePatterns;
use bucket_publish::sync::hash::{fingerprint, matches};
use flate2::read::GzDecoder;

use crate::common::{build_dir, options, run, write};

#[tokio::test]
async fn test_mixed_create_update_unchanged_delete() {
    let dir = build_dir(&[("a.txt", b"hi"), ("b.txt", b"new"), ("c.txt", b"same")]);
    let store = Arc::new(MemoryStore::new());
    store.insert("b.txt", b"old");
    store.insert("c.txt", b"same");
    store.insert("stale.txt", b"gone");

    let summary = run(&store, options(dir.path())).await;

    assert_eq!(summary.uploaded, 2);
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.unchanged, 1);
    assert!(summary.is_success());
    assert_eq!(summary.keys_with(SyncAction::Create), vec!["a.txt"]);
    assert_eq!(summary.keys_with(SyncAction::Update), vec!["b.txt"]);
    assert_eq!(summary.keys_with(SyncAction::Unchanged), vec!["c.txt"]);
    assert_eq!(summary.keys_with(SyncAction::Delete), vec!["stale.txt"]);

    let mut puts = store.puts();
    puts.sort();
    assert_eq!(puts, vec!["a.txt", "b.txt"]);
    assert_eq!(store.deletes(), vec!["stale.txt"]);
    assert_eq!(store.keys(), vec!["a.txt", "b.txt", "c.txt"]);
    assert_eq!(store.get("b.txt").unwrap().data, b"new");
}

#[tokio::test]
async fn test_empty_bucket_is_mirrored() {
    let dir = build_dir(&[
        ("index.html", b"<html></html>"),
        ("css/site.css", b"body{}"),
        ("img/logo.png", b"\x89PNG"),
    ]);
    let store = Arc::new(MemoryStore::new());

    let summary = run(&store, options(dir.path())).await;

    assert_eq!(summary.uploaded, 3);
    assert_eq!(summary.deleted, 0);
    assert_eq!(store.keys(), vec!["css/site.css", "img/logo.png", "index.html"]);

    for (key, contents) in [
        ("index.html", &b"<html></html>"[..]),
        ("css/site.css", &b"body{}"[..]),
        ("img/logo.png", &b"\x89PNG"[..]),
    ] {
        let object = store.get(key).unwrap();
        assert!(matches(&fingerprint(contents), &object.etag), "{key}");
    }

    let object = store.get("index.html").unwrap();
    assert_eq!(object.headers.content_type.as_deref(), Some("text/html"));
    assert_eq!(object.headers.access_policy, AccessPolicy::PublicRead);
    assert!(object.headers.content_encoding.is_none());
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let dir = build_dir(&[("a.txt", b"hi"), ("style.css", b"body { color: red }")]);
    let store = Arc::new(MemoryStore::new());
    let mut opts = options(dir.path());
    opts.encoder = ContentEncoder::new(true);

    run(&store, opts.clone()).await;
    store.reset_calls();
    let summary = run(&store, opts).await;

    assert_eq!(summary.uploaded, 0);
    assert_eq!(summary.deleted, 0);
    assert_eq!(summary.unchanged, 2);
    assert!(store.puts().is_empty());
    assert!(store.deletes().is_empty());
}

#[tokio::test]
async fn test_force_uploads_everything_and_deletes_nothing() {
    let dir = build_dir(&[("a.txt", b"hi"), ("b.txt", b"there")]);
    let store = Arc::new(MemoryStore::new());
    run(&store, options(dir.path())).await;
    store.reset_calls();

    let mut opts = options(dir.path());
    opts.force = true;
    let summary = run(&store, opts).await;

    assert_eq!(summary.uploaded, 2);
    assert_eq!(summary.deleted, 0);
    assert_eq!(summary.keys_with(SyncAction::ForceUpdate), vec!["a.txt", "b.txt"]);
    assert_eq!(store.puts().len(), 2);
}

#[tokio::test]
async fn test_gzip_only_for_text_types() {
    let css = b"body { margin: 0; padding: 0; } body { margin: 0; padding: 0; }";
    let dir = build_dir(&[("style.css", css), ("image.png", b"\x89PNG\r\n")]);
    let store = Arc::new(MemoryStore::new());
    let mut opts = options(dir.path());
    opts.encoder = ContentEncoder::new(true);

    let summary = run(&store, opts).await;
    assert_eq!(summary.uploaded, 2);

    let style = store.get("style.css").unwrap();
    assert_eq!(style.headers.content_type.as_deref(), Some("text/css"));
    assert_eq!(
        style.headers.content_encoding.map(|e| e.as_str()),
        Some("gzip")
    );
    let mut decoded = Vec::new();
    GzDecoder::new(style.data.as_slice())
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, css);

    let image = store.get("image.png").unwrap();
    assert_eq!(image.headers.content_type.as_deref(), Some("image/png"));
    assert!(image.headers.content_encoding.is_none());
    assert_eq!(image.data, b"\x89PNG\r\n");
}

#[tokio::test]
async fn test_gzip_disabled_uploads_raw_bytes() {
    let dir = build_dir(&[("style.css", b"body{}")]);
    let store = Arc::new(MemoryStore::new());

    run(&store, options(dir.path())).await;

    let style = store.get("style.css").unwrap();
    assert_eq!(style.data, b"body{}");
    assert!(style.headers.content_encoding.is_none());
}

#[tokio::test]
async fn test_uncompressed_remote_copy_matches_when_gzip_enabled() {
    let dir = build_dir(&[("style.css", b"body{}")]);
    let store = Arc::new(MemoryStore::new());
    store.insert("style.css", b"body{}");
    let mut opts = options(dir.path());
    opts.encoder = ContentEncoder::new(true);

    let summary = run(&store, opts).await;

    assert_eq!(summary.uploaded, 0);
    assert_eq!(summary.keys_with(SyncAction::Unchanged), vec!["style.css"]);
    assert!(store.puts().is_empty());
}

#[tokio::test]
async fn test_changed_css_is_reuploaded_when_gzip_enabled() {
    let dir = build_dir(&[("style.css", b"body{color:red}")]);
    let store = Arc::new(MemoryStore::new());
    store.insert("style.css", b"body{}");
    let mut opts = options(dir.path());
    opts.encoder = ContentEncoder::new(true);

    let summary = run(&store, opts).await;
    assert_eq!(summary.keys_with(SyncAction::Update), vec!["style.css"]);
}

#[tokio::test]
async fn test_directory_marker_keys_are_deleted() {
    let dir = build_dir(&[("docs/index.html", b"<p>")]);
    let store = Arc::new(MemoryStore::new());
    store.insert("docs/", b"");

    let summary = run(&store, options(dir.path())).await;

    assert_eq!(summary.deleted, 1);
    assert_eq!(store.deletes(), vec!["docs/"]);
    assert_eq!(store.keys(), vec!["docs/index.html"]);
}

#[tokio::test]
async fn test_each_stale_key_deleted_once() {
    let dir = build_dir(&[("keep.txt", b"k")]);
    let store = Arc::new(MemoryStore::new());
    for key in ["a", "b/c", "d/e/f", "keep.txt"] {
        store.insert(key, b"x");
    }

    let mut opts = options(dir.path());
    opts.concurrency = 4;
    run(&store, opts).await;

    let mut deletes = store.deletes();
    deletes.sort();
    assert_eq!(deletes, vec!["a", "b/c", "d/e/f"]);
}

#[tokio::test]
async fn test_multipart_etag_forces_upload() {
    let dir = build_dir(&[("big.bin", b"payload")]);
    let store = Arc::new(MemoryStore::new());
    store.insert_with_etag(
        "big.bin",
        b"payload",
        &format!("\"{}-2\"", fingerprint(b"payload")),
    );

    let summary = run(&store, options(dir.path())).await;
    assert_eq!(summary.keys_with(SyncAction::Update), vec!["big.bin"]);
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let dir = build_dir(&[("a.txt", b"hi")]);
    let store = Arc::new(MemoryStore::new());
    store.insert("stale.txt", b"x");
    let mut opts = options(dir.path());
    opts.dry_run = true;

    let summary = run(&store, opts).await;

    assert!(summary.dry_run);
    assert_eq!(summary.uploaded, 1);
    assert_eq!(summary.deleted, 1);
    assert!(summary.to_string().starts_with("dry run completed"));
    assert!(store.puts().is_empty());
    assert!(store.deletes().is_empty());
    assert_eq!(store.keys(), vec!["stale.txt"]);
}

#[tokio::test]
async fn test_excluded_keys_ignored_on_both_sides() {
    let dir = build_dir(&[("a.txt", b"hi"), ("app.js.map", b"{}")]);
    let store = Arc::new(MemoryStore::new());
    store.insert("legacy.map", b"old");
    store.insert("drafts/post.html", b"draft");

    let mut opts = options(dir.path());
    opts.exclude = ExcludePatterns::from_patterns(&["*.map", "drafts/**"]).unwrap();
    let summary = run(&store, opts).await;

    assert_eq!(store.puts(), vec!["a.txt"]);
    assert!(store.deletes().is_empty());
    assert_eq!(summary.uploaded, 1);
    assert_eq!(
        store.keys(),
        vec!["a.txt", "drafts/post.html", "legacy.map"]
    );
}

#[tokio::test]
async fn test_concurrency_does_not_change_outcome() {
    let dir = build_dir(&[]);
    for i in 0..20 {
        write(dir.path(), &format!("pages/{i:02}.html"), format!("page {i}").as_bytes());
    }

    let mut results = Vec::new();
    for concurrency in [1, 8] {
        let store = Arc::new(MemoryStore::new());
        store.insert("pages/05.html", b"outdated");
        store.insert("pages/99.html", b"removed");
        let mut opts = options(dir.path());
        opts.concurrency = concurrency;

        let summary = run(&store, opts).await;
        results.push((summary.uploaded, summary.deleted, store.keys()));
    }

    assert_eq!(results[0], results[1]);
    assert_eq!(results[0].0, 20);
    assert_eq!(results[0].1, 1);
}

#[tokio::test]
async fn test_bytes_uploaded_counts_payload() {
    let dir = build_dir(&[("a.txt", b"12345"), ("b.txt", b"678")]);
    let store = Arc::new(MemoryStore::new());

    let summary = run(&store, options(dir.path())).await;
    assert_eq!(summary.bytes_uploaded, 8);
}

#[tokio::test]
async fn test_text_and_css_into_empty_bucket() {
    let dir = build_dir(&[("a.txt", b"hi"), ("b.css", b"body{}")]);
    let store = Arc::new(MemoryStore::new());
    let mut opts = options(dir.path());
    opts.encoder = ContentEncoder::new(true);

    let summary = run(&store, opts.clone()).await;

    assert_eq!(summary.uploaded, 2);
    assert_eq!(summary.deleted, 0);
    assert_eq!(summary.keys_with(SyncAction::Create), vec!["a.txt", "b.css"]);

    let css = store.get("b.css").unwrap();
    assert_eq!(css.headers.content_type.as_deref(), Some("text/css"));
    assert_eq!(css.headers.content_encoding.map(|e| e.as_str()), Some("gzip"));
    let text = store.get("a.txt").unwrap();
    assert_eq!(text.headers.content_type.as_deref(), Some("text/plain"));
    assert!(text.headers.content_encoding.is_none());
    assert!(matches(&fingerprint(b"hi"), &text.etag));

    store.reset_calls();
    let again = run(&store, opts).await;
    assert_eq!(again.uploaded, 0);
    assert_eq!(again.unchanged, 2);
}

#[tokio::test]
async fn test_stale_key_removed_alongside_existing_file() {
    let dir = build_dir(&[("a.txt", b"hi")]);
    let store = Arc::new(MemoryStore::new());
    store.insert("a.txt", b"hi");
    store.insert("old.txt", b"x");

    let summary = run(&store, options(dir.path())).await;

    assert_eq!(summary.uploaded, 0);
    assert_eq!(summary.deleted, 1);
    assert_eq!(store.deletes(), vec!["old.txt"]);
}

#[tokio::test]
async fn test_changed_content_is_updated() {
    let dir = build_dir(&[("a.txt", b"hello")]);
    let store = Arc::new(MemoryStore::new());
    store.insert("a.txt", b"hi");

    let summary = run(&store, options(dir.path())).await;

    assert_eq!(summary.keys_with(SyncAction::Update), vec!["a.txt"]);
    assert_eq!(summary.deleted, 0);
    assert_eq!(store.get("a.txt").unwrap().data, b"hello");
}

#[tokio::test]
async fn test_unknown_extension_sent_without_type_or_encoding() {
    let dir = build_dir(&[("LICENSE", b"MIT"), ("data.unknownext", b"?")]);
    let store = Arc::new(MemoryStore::new());
    let mut opts = options(dir.path());
    opts.encoder = ContentEncoder::new(true);

    let summary = run(&store, opts).await;

    assert_eq!(summary.uploaded, 2);
    for key in ["LICENSE", "data.unknownext"] {
        let object = store.get(key).unwrap();
        assert!(object.headers.content_type.is_none(), "{key}");
        assert!(object.headers.content_encoding.is_none(), "{key}");
    }
    assert_eq!(store.get("LICENSE").unwrap().data, b"MIT");
}
