//! Error types for publish runs.
//!
//! `SyncError` is what the engine returns; `StoreError` is what an
//! `ObjectStore` implementation reports for a single remote call.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for publish operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Remote operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Put,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Put => "put",
            Operation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by an object store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Credentials were rejected or the caller lacks permission.
    #[error("access denied: {0}")]
    Auth(String),

    /// Transport failure, throttling, server error or anything unclassified.
    #[error("request failed: {0}")]
    Network(String),

    /// The bucket or key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Classify a remote error message, mirroring how S3 and compatible
    /// services word their auth failures.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if lower.contains("credential")
            || lower.contains("accessdenied")
            || lower.contains("access denied")
            || lower.contains("signature")
            || lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("invalidaccesskeyid")
            || lower.contains("403")
        {
            StoreError::Auth(message)
        } else if lower.contains("nosuchbucket")
            || lower.contains("nosuchkey")
            || lower.contains("404")
        {
            StoreError::NotFound(message)
        } else {
            StoreError::Network(message)
        }
    }

    /// Whether retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Network(_))
    }
}

/// Errors that end a publish run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing or invalid build directory, bucket name or options.
    #[error("{0}")]
    Configuration(String),

    /// The remote inventory could not be listed; nothing was synced.
    #[error("cannot reach {store}: {source}")]
    Connectivity {
        store: String,
        #[source]
        source: StoreError,
    },

    /// A single put or delete failed after all attempts.
    #[error("{op} of {key} failed after {attempts} attempt(s): {source}")]
    Transfer {
        op: Operation,
        key: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// The build directory walk failed or produced an unusable path.
    #[error("cannot scan {path}: {reason}")]
    Scan { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Configuration(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors raised before any remote call was made.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SyncError::Configuration(_))
    }
}
