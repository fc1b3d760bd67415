//! Publish engine: mirrors a build directory into a bucket.
//!
//! A run lists the bucket once, walks the build directory, uploads every
//! new or changed file on a bounded worker pool and, once all uploads have
//! finished, deletes every remote key no local file accounted for.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Operation, Result, StoreError, SyncError};
use crate::fs::backend::{AccessPolicy, Inventory, ObjectStore, Payload, TransferHeaders};
use crate::fs::local::{scan_local_async, validate_root, LocalFile};
use crate::sync::compression::{ContentEncoder, ContentEncoding};
use crate::sync::content_type::detect_content_type;
use crate::sync::exclude::ExcludePatterns;
use crate::sync::hash;
use crate::sync::throttle::{BandwidthLimit, BandwidthLimiter, TransferStats};

/// Default number of concurrent transfers.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// What to do when a single put or delete fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Record the failure, keep going, report it in the summary.
    #[default]
    Continue,
    /// Abort the run with the first failure.
    FailFast,
}

/// Bounded retry for remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or
    /// runs out of attempts. Returns the number of attempts made.
    pub async fn run<F, Fut>(
        &self,
        op: Operation,
        key: &str,
        mut call: F,
    ) -> std::result::Result<u32, (StoreError, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<(), StoreError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match call().await {
                Ok(()) => return Ok(attempt),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(
                        %op,
                        key,
                        attempt,
                        max_attempts,
                        error = %err,
                        "retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
                Err(err) => return Err((err, attempt)),
            }
        }
    }
}

/// Options for one publish run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Build directory to mirror.
    pub root: PathBuf,
    /// Re-upload files whose fingerprint already matches.
    pub force: bool,
    /// Compute the plan without uploading or deleting anything.
    pub dry_run: bool,
    /// Compression policy.
    pub encoder: ContentEncoder,
    /// Keys ignored on both sides.
    pub exclude: ExcludePatterns,
    /// Maximum concurrent transfers; 1 processes files strictly in order.
    pub concurrency: usize,
    pub bandwidth_limit: BandwidthLimit,
    pub error_policy: ErrorPolicy,
    pub retry: RetryPolicy,
    /// Policy attached to every upload.
    pub access_policy: AccessPolicy,
}

impl SyncOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            force: false,
            dry_run: false,
            encoder: ContentEncoder::default(),
            exclude: ExcludePatterns::new(),
            concurrency: DEFAULT_CONCURRENCY,
            bandwidth_limit: BandwidthLimit::unlimited(),
            error_policy: ErrorPolicy::Continue,
            retry: RetryPolicy::default(),
            access_policy: AccessPolicy::PublicRead,
        }
    }
}

/// Classification of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Not in the bucket yet.
    Create,
    /// In the bucket with different content.
    Update,
    /// Unchanged, but re-uploaded because of the force flag.
    ForceUpdate,
    /// Unchanged, skipped.
    Unchanged,
    /// In the bucket only.
    Delete,
}

impl SyncAction {
    /// Whether this action uploads the file.
    pub fn is_upload(&self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::ForceUpdate)
    }

    fn log_verb(&self) -> &'static str {
        match self {
            Self::Create => "creating file",
            Self::Update => "updating file",
            Self::ForceUpdate => "forcing update of file",
            Self::Unchanged => "unchanged file",
            Self::Delete => "deleting file",
        }
    }
}

/// Per-key record in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectAction {
    pub key: String,
    pub action: SyncAction,
    /// Sent with `Content-Encoding: gzip`.
    pub compressed: bool,
}

/// A put or delete that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedObject {
    pub key: String,
    pub operation: Operation,
    pub message: String,
    /// Remote attempts made; 0 when the local file could not be read.
    pub attempts: u32,
}

/// Outcome of a publish run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub uploaded: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub bytes_uploaded: u64,
    pub failures: Vec<FailedObject>,
    /// Every key that was considered, sorted by key.
    pub actions: Vec<ObjectAction>,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub dry_run: bool,
}

// Helper function to serialize Duration as seconds
fn serialize_duration<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Keys with the given action, sorted.
    pub fn keys_with(&self, action: SyncAction) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|a| a.action == action)
            .map(|a| a.key.as_str())
            .collect()
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.dry_run {
            write!(
                f,
                "dry run completed, would upload {} and delete {} files in {:.2} seconds",
                self.uploaded,
                self.deleted,
                self.elapsed.as_secs_f64()
            )
        } else {
            write!(
                f,
                "publish completed, uploaded {} and deleted {} files in {:.2} seconds",
                self.uploaded,
                self.deleted,
                self.elapsed.as_secs_f64()
            )
        }
    }
}

/// Current sync phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Listing,
    Scanning,
    Uploading,
    Deleting,
    Complete,
}

/// Progress update for publish runs.
#[derive(Debug, Clone)]
pub struct SyncProgress {
    pub phase: SyncPhase,
    /// Key just processed, empty for phase changes.
    pub current_key: String,
    pub done: usize,
    pub total: usize,
}

type ProgressSender = tokio::sync::mpsc::Sender<SyncProgress>;

/// State scoped to a single run, shared by its workers.
struct RunContext {
    force: bool,
    dry_run: bool,
    encoder: ContentEncoder,
    access_policy: AccessPolicy,
    retry: RetryPolicy,
    /// Remote listing; read-only once workers start.
    inventory: Arc<Inventory>,
    limiter: BandwidthLimiter,
    stats: TransferStats,
}

/// Result of reconciling one local file.
struct FileOutcome {
    key: String,
    action: Option<SyncAction>,
    compressed: bool,
    /// Key was present in the inventory.
    matched: bool,
    result: Result<()>,
}

struct DeleteOutcome {
    key: String,
    result: Result<()>,
}

/// Publish engine bound to one object store.
pub struct PublishEngine {
    store: Arc<dyn ObjectStore>,
    options: SyncOptions,
    progress_tx: Option<ProgressSender>,
}

impl PublishEngine {
    pub fn new(store: Arc<dyn ObjectStore>, options: SyncOptions) -> Self {
        Self {
            store,
            options,
            progress_tx: None,
        }
    }

    /// Create an engine that reports progress on `progress_tx`.
    pub fn with_progress(
        store: Arc<dyn ObjectStore>,
        options: SyncOptions,
        progress_tx: ProgressSender,
    ) -> Self {
        let mut engine = Self::new(store, options);
        engine.progress_tx = Some(progress_tx);
        engine
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    async fn send_progress(&self, phase: SyncPhase, current_key: &str, done: usize, total: usize) {
        if let Some(ref tx) = self.progress_tx {
            let _ = tx
                .send(SyncProgress {
                    phase,
                    current_key: current_key.to_string(),
                    done,
                    total,
                })
                .await;
        }
    }

    /// Run one publish.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let options = &self.options;

        // Nothing remote happens for a bad build directory.
        validate_root(&options.root)?;

        self.send_progress(SyncPhase::Listing, "", 0, 0).await;
        let inventory = self
            .store
            .list_all()
            .await
            .map_err(|source| SyncError::Connectivity {
                store: self.store.describe(),
                source,
            })?;
        tracing::info!(
            store = %self.store.describe(),
            objects = inventory.len(),
            "loaded remote inventory"
        );

        self.send_progress(SyncPhase::Scanning, "", 0, 0).await;
        let files: Vec<LocalFile> = scan_local_async(&options.root)
            .await?
            .into_iter()
            .filter(|file| {
                let excluded = options.exclude.is_excluded(&file.key);
                if excluded {
                    tracing::debug!(key = %file.key, "excluded");
                }
                !excluded
            })
            .collect();
        tracing::info!(root = %options.root.display(), files = files.len(), "scanned build directory");
        if !options.exclude.is_empty() {
            tracing::debug!(patterns = ?options.exclude.patterns(), "excluding keys");
        }

        let ctx = Arc::new(RunContext {
            force: options.force,
            dry_run: options.dry_run,
            encoder: options.encoder.clone(),
            access_policy: options.access_policy,
            retry: options.retry,
            inventory: Arc::new(inventory),
            limiter: BandwidthLimiter::new(options.bandwidth_limit),
            stats: TransferStats::new(),
        });
        if ctx.limiter.limit().is_limited() {
            tracing::debug!(
                bytes_per_second = ctx.limiter.limit().bytes_per_second,
                "throttling uploads"
            );
        }

        let mut summary = RunSummary {
            uploaded: 0,
            deleted: 0,
            unchanged: 0,
            bytes_uploaded: 0,
            failures: Vec::new(),
            actions: Vec::new(),
            elapsed: Duration::ZERO,
            dry_run: options.dry_run,
        };

        let concurrency = options.concurrency.max(1);
        let total = files.len();
        let mut matched: HashSet<String> = HashSet::new();
        let mut uploads = stream::iter(files.into_iter().map(|file| {
            let ctx = Arc::clone(&ctx);
            let store = Arc::clone(&self.store);
            async move { reconcile_file(&ctx, store.as_ref(), file).await }
        }))
        .buffer_unordered(concurrency);

        let mut done = 0;
        while let Some(outcome) = uploads.next().await {
            done += 1;
            self.send_progress(SyncPhase::Uploading, &outcome.key, done, total).await;

            if outcome.matched {
                matched.insert(outcome.key.clone());
            }
            if let Some(action) = outcome.action {
                summary.actions.push(ObjectAction {
                    key: outcome.key.clone(),
                    action,
                    compressed: outcome.compressed,
                });
            }

            match outcome.result {
                Ok(()) => match outcome.action {
                    Some(action) if action.is_upload() => summary.uploaded += 1,
                    Some(SyncAction::Unchanged) => summary.unchanged += 1,
                    _ => {}
                },
                Err(err) => {
                    if options.error_policy == ErrorPolicy::FailFast {
                        return Err(err);
                    }
                    tracing::error!(key = %outcome.key, error = %err, "upload failed");
                    summary.failures.push(failed_object(&outcome.key, Operation::Put, &err));
                }
            }
        }
        drop(uploads);

        // Deletions start only once every upload worker has finished.
        let mut stale: Vec<String> = ctx
            .inventory
            .keys()
            .filter(|key| !matched.contains(*key))
            .filter(|key| {
                let excluded = options.exclude.is_excluded(key);
                if excluded {
                    tracing::debug!(%key, "excluded remote object kept");
                }
                !excluded
            })
            .cloned()
            .collect();
        stale.sort();

        let total = stale.len();
        let mut deletions = stream::iter(stale.into_iter().map(|key| {
            let ctx = Arc::clone(&ctx);
            let store = Arc::clone(&self.store);
            async move { delete_object(&ctx, store.as_ref(), key).await }
        }))
        .buffer_unordered(concurrency);

        let mut done = 0;
        while let Some(outcome) = deletions.next().await {
            done += 1;
            self.send_progress(SyncPhase::Deleting, &outcome.key, done, total).await;
            summary.actions.push(ObjectAction {
                key: outcome.key.clone(),
                action: SyncAction::Delete,
                compressed: false,
            });

            match outcome.result {
                Ok(()) => summary.deleted += 1,
                Err(err) => {
                    if options.error_policy == ErrorPolicy::FailFast {
                        return Err(err);
                    }
                    tracing::error!(key = %outcome.key, error = %err, "delete failed");
                    summary.failures.push(failed_object(&outcome.key, Operation::Delete, &err));
                }
            }
        }
        drop(deletions);

        summary.actions.sort_by(|a, b| a.key.cmp(&b.key));
        summary.failures.sort_by(|a, b| a.key.cmp(&b.key));
        summary.bytes_uploaded = ctx.stats.bytes_transferred();
        summary.elapsed = started.elapsed();

        self.send_progress(SyncPhase::Complete, "", summary.actions.len(), summary.actions.len())
            .await;
        tracing::info!(
            uploaded = summary.uploaded,
            deleted = summary.deleted,
            unchanged = summary.unchanged,
            failed = summary.failures.len(),
            "{}",
            summary
        );

        Ok(summary)
    }
}

fn failed_object(key: &str, operation: Operation, err: &SyncError) -> FailedObject {
    let (message, attempts) = match err {
        SyncError::Transfer { source, attempts, .. } => (source.to_string(), *attempts),
        other => (other.to_string(), 0),
    };
    FailedObject {
        key: key.to_string(),
        operation,
        message,
        attempts,
    }
}

/// Transfer plan for one file.
struct Prepared {
    action: SyncAction,
    payload: Payload,
    headers: TransferHeaders,
}

/// Classify a file and build its payload.
///
/// A file is unchanged when the remote fingerprint matches its content.
/// For gzipped files the fingerprint of the compressed payload is accepted
/// too, since that is what a previous gzip run stored.
async fn prepare(ctx: &RunContext, file: &LocalFile) -> Result<Prepared> {
    let content_type = detect_content_type(file.file_name());
    let compress = ctx.encoder.should_compress(content_type);
    let remote = ctx.inventory.get(&file.key);

    let (payload, raw_fingerprint) = if compress {
        let raw = tokio::fs::read(&file.path)
            .await
            .map_err(|e| SyncError::io(&file.path, e))?;
        let raw_fingerprint = remote.map(|_| hash::fingerprint(&raw));
        let encoder = ctx.encoder.clone();
        let data = tokio::task::spawn_blocking(move || encoder.encode(&raw))
            .await
            .map_err(|e| SyncError::io(&file.path, std::io::Error::other(e)))?
            .map_err(|e| SyncError::io(&file.path, e))?;
        (Payload::bytes(data), raw_fingerprint)
    } else {
        let payload = Payload::File {
            path: file.path.clone(),
            size: file.size,
        };
        (payload, None)
    };

    let action = match remote {
        None => SyncAction::Create,
        Some(remote) => {
            let local = match &payload {
                Payload::Bytes(data) => hash::fingerprint(data),
                Payload::File { path, .. } => hash::fingerprint_file_async(path)
                    .await
                    .map_err(|e| SyncError::io(path, e))?,
            };
            tracing::debug!(key = %file.key, local = %local, remote = %remote.fingerprint, "compared fingerprints");

            let same = hash::matches(&local, &remote.fingerprint)
                || raw_fingerprint
                    .as_deref()
                    .is_some_and(|raw| hash::matches(raw, &remote.fingerprint));
            match (same, ctx.force) {
                (true, false) => SyncAction::Unchanged,
                (true, true) => SyncAction::ForceUpdate,
                (false, _) => SyncAction::Update,
            }
        }
    };

    let headers = TransferHeaders {
        content_type: content_type.map(str::to_string),
        content_encoding: compress.then_some(ContentEncoding::Gzip),
        access_policy: ctx.access_policy,
    };

    Ok(Prepared {
        action,
        payload,
        headers,
    })
}

async fn reconcile_file(ctx: &RunContext, store: &dyn ObjectStore, file: LocalFile) -> FileOutcome {
    let matched = ctx.inventory.contains_key(&file.key);

    let prepared = match prepare(ctx, &file).await {
        Ok(prepared) => prepared,
        Err(err) => {
            return FileOutcome {
                key: file.key,
                action: None,
                compressed: false,
                matched,
                result: Err(err),
            }
        }
    };

    let compressed = prepared.headers.content_encoding.is_some();
    let result = if prepared.action.is_upload() {
        tracing::info!(key = %file.key, "{} {}", prepared.action.log_verb(), file.key);
        if compressed {
            tracing::info!(key = %file.key, "gzipping file {}", file.key);
        }
        if ctx.dry_run {
            Ok(())
        } else {
            upload(ctx, store, &file.key, &prepared.payload, &prepared.headers).await
        }
    } else {
        tracing::debug!(key = %file.key, "{} {}", prepared.action.log_verb(), file.key);
        Ok(())
    };

    FileOutcome {
        key: file.key,
        action: Some(prepared.action),
        compressed,
        matched,
        result,
    }
}

async fn upload(
    ctx: &RunContext,
    store: &dyn ObjectStore,
    key: &str,
    payload: &Payload,
    headers: &TransferHeaders,
) -> Result<()> {
    ctx.limiter.acquire(payload.len()).await;

    ctx.retry
        .run(Operation::Put, key, move || store.put(key, payload, headers))
        .await
        .map_err(|(source, attempts)| SyncError::Transfer {
            op: Operation::Put,
            key: key.to_string(),
            attempts,
            source,
        })?;

    ctx.stats.record(payload.len());
    Ok(())
}

async fn delete_object(ctx: &RunContext, store: &dyn ObjectStore, key: String) -> DeleteOutcome {
    tracing::info!(key = %key, "deleting file {}", key);

    let result = if ctx.dry_run {
        Ok(())
    } else {
        let key_ref: &str = &key;
        match ctx
            .retry
            .run(Operation::Delete, key_ref, move || store.delete(key_ref))
            .await
        {
            Ok(_) => Ok(()),
            Err((StoreError::NotFound(_), _)) => {
                tracing::debug!(key = %key, "already gone");
                Ok(())
            }
            Err((source, attempts)) => Err(SyncError::Transfer {
                op: Operation::Delete,
                key: key.clone(),
                attempts,
                source,
            }),
        }
    };

    DeleteOutcome { key, result }
}

/// Publish `root` into `store` with default options.
pub async fn publish(store: Arc<dyn ObjectStore>, root: &Path, force: bool) -> Result<RunSummary> {
    let mut options = SyncOptions::new(root);
    options.force = force;
    PublishEngine::new(store, options).run().await
}
