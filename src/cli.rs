use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;

use crate::config::{self, Overrides};
use crate::fs::s3::S3Store;
use crate::sync::engine::{PublishEngine, RunSummary, SyncPhase, SyncProgress};

/// Publish a static build directory to an S3-compatible bucket.
#[derive(Parser, Debug)]
#[command(
    name = "bucket-publish",
    version,
    about = "Upload changed files from a build directory to a bucket and delete what is gone"
)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Directory holding the built site
    #[arg(long, env = "BUILD_DIR")]
    pub build_dir: Option<PathBuf>,

    /// Target bucket name
    #[arg(long, alias = "aws-bucket-name", env = "AWS_BUCKET_NAME")]
    pub bucket: Option<String>,

    /// Upload every file, even when the bucket copy is identical
    #[arg(long)]
    pub force: bool,

    /// Gzip text content types before upload
    #[arg(
        long,
        env = "BAKERY_GZIP",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        conflicts_with = "no_gzip"
    )]
    pub gzip: Option<bool>,

    /// Never gzip, overriding the config file
    #[arg(long)]
    pub no_gzip: bool,

    /// Report what would change without touching the bucket
    #[arg(long)]
    pub dry_run: bool,

    /// Glob of keys to leave alone on both sides (repeatable)
    #[arg(long = "exclude", short = 'e', value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Number of simultaneous transfers
    #[arg(long, short = 'j')]
    pub concurrency: Option<usize>,

    /// Upload limit in bytes per second
    #[arg(long, value_name = "BYTES")]
    pub bandwidth_limit: Option<u64>,

    /// Stop at the first failed transfer
    #[arg(long)]
    pub fail_fast: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Storage provider (aws, digitalocean, hetzner, minio, r2, wasabi, custom)
    #[arg(long)]
    pub provider: Option<String>,

    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Endpoint URL for custom S3-compatible services
    #[arg(long)]
    pub endpoint: Option<String>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Filter directives implied by `-v`; `RUST_LOG` takes precedence in
    /// `main`. Per-file lines are info events, so they show by default.
    pub fn log_filter(&self) -> String {
        let level = match self.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        };
        format!("warn,bucket_publish={}", level).to_lowercase()
    }

    pub fn overrides(&self) -> Overrides {
        let gzip = if self.no_gzip { Some(false) } else { self.gzip };
        Overrides {
            build_dir: self.build_dir.clone(),
            bucket: self.bucket.clone(),
            gzip,
            force: self.force,
            dry_run: self.dry_run,
            fail_fast: self.fail_fast,
            exclude: self.exclude.clone(),
            concurrency: self.concurrency,
            bandwidth_limit: self.bandwidth_limit,
            provider: self.provider.clone(),
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

fn progress_bar(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {prefix} | {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

fn show_progress(pb: &ProgressBar, progress: &SyncProgress) {
    let prefix = match progress.phase {
        SyncPhase::Listing => "listing bucket",
        SyncPhase::Scanning => "scanning build",
        SyncPhase::Uploading => "uploading",
        SyncPhase::Deleting => "deleting",
        SyncPhase::Complete => "done",
    };
    pb.set_prefix(prefix);
    pb.set_length(progress.total as u64);
    pb.set_position(progress.done as u64);
    pb.set_message(progress.current_key.clone());
}

fn print_summary(summary: &RunSummary) {
    if summary.failures.is_empty() {
        println!("{}", summary.to_string().green());
        return;
    }

    println!("{}", summary.to_string().yellow());
    eprintln!(
        "{}",
        format!("{} object(s) failed:", summary.failures.len()).red().bold()
    );
    for failure in &summary.failures {
        eprintln!(
            "  {} {} ({} attempt(s)): {}",
            failure.operation.as_str().red(),
            failure.key,
            failure.attempts,
            failure.message
        );
    }
}

/// Run a publish from parsed arguments.
///
/// Returns `Ok(true)` when every transfer succeeded. Configuration and
/// connectivity problems are returned as errors before anything is written.
pub async fn run(cli: Cli) -> Result<bool> {
    let (file, config_path) = config::load_config(cli.config.as_deref())?;
    if let Some(path) = &config_path {
        tracing::debug!(path = %path.display(), "loaded config file");
    }
    let resolved = config::resolve(cli.overrides(), file)?;

    let store = Arc::new(S3Store::connect(&resolved.s3).await);
    let (tx, mut rx) = mpsc::channel::<SyncProgress>(100);
    let engine = PublishEngine::with_progress(store, resolved.options, tx);

    let options = engine.options();
    tracing::info!(
        build_dir = %options.root.display(),
        bucket = %resolved.s3.bucket,
        provider = resolved.s3.provider.display_name(),
        gzip = options.encoder.is_enabled(),
        force = options.force,
        dry_run = options.dry_run,
        bandwidth = %options.bandwidth_limit.display(),
        "publishing"
    );
    if options.encoder.is_enabled() {
        tracing::debug!(content_types = ?options.encoder.content_types(), "gzip enabled");
    }

    let pb = progress_bar(cli.json);
    let bar = pb.clone();
    let reporter = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            show_progress(&bar, &progress);
        }
    });

    let result = engine.run().await;
    // Closes the progress channel so the reporter finishes.
    drop(engine);
    let _ = reporter.await;
    pb.finish_and_clear();

    let summary = result.context("publish failed")?;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("cannot encode summary")?
        );
    } else {
        print_summary(&summary);
    }

    Ok(summary.is_success())
}
