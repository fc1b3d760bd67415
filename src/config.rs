//! Configuration file loading and option resolution.
//!
//! Every setting is taken from the first source that provides it:
//! command line (or its environment variable), then the config file, then
//! the built-in default. Missing build directory or bucket name is a
//! configuration error raised before any store is built.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};
use crate::fs::backend::{AccessPolicy, S3Provider};
use crate::fs::local::validate_root;
use crate::fs::s3::S3Settings;
use crate::sync::compression::ContentEncoder;
use crate::sync::engine::{ErrorPolicy, RetryPolicy, SyncOptions, DEFAULT_CONCURRENCY};
use crate::sync::exclude::ExcludePatterns;
use crate::sync::throttle::BandwidthLimit;

pub const DEFAULT_REGION: &str = "us-east-1";
const APP_DIR: &str = "bucket-publish";
const CONFIG_FILE: &str = "config.toml";

const BUILD_UNCONFIGURED: &str = "Build directory unconfigured. Set build_dir in the config file \
or provide it with --build-dir";
const BUCKET_UNCONFIGURED: &str = "Bucket name unconfigured. Set bucket in the config file \
or provide it with --bucket";

/// `[storage]` table of the config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub provider: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Contents of a config file. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub build_dir: Option<PathBuf>,
    pub bucket: Option<String>,
    pub gzip: Option<bool>,
    pub gzip_content_types: Option<Vec<String>>,
    pub concurrency: Option<usize>,
    pub exclude: Vec<String>,
    /// Bytes per second, 0 for unlimited.
    pub bandwidth_limit: Option<u64>,
    pub max_attempts: Option<u32>,
    /// Canned ACL for uploads, `public-read` unless set.
    pub acl: Option<String>,
    pub storage: StorageConfig,
}

impl FileConfig {
    /// Parse a config file. Relative `build_dir` values are resolved
    /// against the directory containing the file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        let mut config = Self::parse(&content).map_err(|e| {
            SyncError::config(format!("Invalid config file {}: {}", path.display(), e))
        })?;

        if let (Some(build_dir), Some(parent)) = (&config.build_dir, path.parent()) {
            if build_dir.is_relative() {
                config.build_dir = Some(parent.join(build_dir));
            }
        }
        Ok(config)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Per-user config file location, e.g. `~/.config/bucket-publish/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

/// Load `explicit` if given (it must exist), else the default config file
/// if it exists, else an empty config.
pub fn load_config(explicit: Option<&Path>) -> Result<(FileConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        return Ok((FileConfig::load(path)?, Some(path.to_path_buf())));
    }

    match default_config_path() {
        Some(path) if path.is_file() => Ok((FileConfig::load(&path)?, Some(path))),
        _ => Ok((FileConfig::default(), None)),
    }
}

/// Settings given on the command line or through environment variables.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub build_dir: Option<PathBuf>,
    pub bucket: Option<String>,
    pub gzip: Option<bool>,
    pub force: bool,
    pub dry_run: bool,
    pub fail_fast: bool,
    pub exclude: Vec<String>,
    pub concurrency: Option<usize>,
    pub bandwidth_limit: Option<u64>,
    pub provider: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub s3: S3Settings,
    pub options: SyncOptions,
}

impl ResolvedConfig {
    pub fn build_dir(&self) -> &Path {
        &self.options.root
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Merge `overrides` over `file` and validate the result.
pub fn resolve(overrides: Overrides, file: FileConfig) -> Result<ResolvedConfig> {
    let build_dir = overrides
        .build_dir
        .filter(|p| !p.as_os_str().is_empty())
        .or(file.build_dir)
        .ok_or_else(|| SyncError::config(BUILD_UNCONFIGURED))?;
    validate_root(&build_dir)?;

    let bucket = non_empty(overrides.bucket)
        .or(non_empty(file.bucket))
        .ok_or_else(|| SyncError::config(BUCKET_UNCONFIGURED))?;

    let storage = file.storage;
    let endpoint = non_empty(overrides.endpoint).or(non_empty(storage.endpoint));
    let provider_name = non_empty(overrides.provider)
        .or(non_empty(storage.provider))
        .unwrap_or_else(|| {
            if endpoint.is_some() {
                "custom".to_string()
            } else {
                "aws".to_string()
            }
        });
    let provider = S3Provider::parse(&provider_name, endpoint.as_deref()).map_err(SyncError::config)?;
    let region = non_empty(overrides.region)
        .or(non_empty(storage.region))
        .unwrap_or_else(|| DEFAULT_REGION.to_string());

    let gzip = overrides.gzip.or(file.gzip).unwrap_or(false);
    let encoder = match file.gzip_content_types {
        Some(types) => ContentEncoder::with_content_types(gzip, types),
        None => ContentEncoder::new(gzip),
    };

    let mut patterns = file.exclude;
    patterns.extend(overrides.exclude);
    let exclude = ExcludePatterns::from_patterns(&patterns)?;

    let concurrency = overrides
        .concurrency
        .or(file.concurrency)
        .unwrap_or(DEFAULT_CONCURRENCY);
    if concurrency == 0 {
        return Err(SyncError::config("concurrency must be at least 1"));
    }

    let mut retry = RetryPolicy::default();
    if let Some(max_attempts) = file.max_attempts {
        if max_attempts == 0 {
            return Err(SyncError::config("max_attempts must be at least 1"));
        }
        retry.max_attempts = max_attempts;
    }

    let access_policy = match non_empty(file.acl) {
        Some(acl) => AccessPolicy::parse(&acl).map_err(SyncError::config)?,
        None => AccessPolicy::PublicRead,
    };

    let mut options = SyncOptions::new(build_dir);
    options.force = overrides.force;
    options.dry_run = overrides.dry_run;
    options.encoder = encoder;
    options.exclude = exclude;
    options.concurrency = concurrency;
    options.bandwidth_limit = BandwidthLimit::new(
        overrides.bandwidth_limit.or(file.bandwidth_limit).unwrap_or(0),
    );
    options.error_policy = if overrides.fail_fast {
        ErrorPolicy::FailFast
    } else {
        ErrorPolicy::Continue
    };
    options.retry = retry;
    options.access_policy = access_policy;

    Ok(ResolvedConfig {
        s3: S3Settings {
            bucket,
            region,
            provider,
            access_key_id: non_empty(storage.access_key_id),
            secret_access_key: non_empty(storage.secret_access_key),
        },
        options,
    })
}
