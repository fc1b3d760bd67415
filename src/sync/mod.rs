//! Publish pipeline
//!
//! Change detection, gzip encoding, content types, exclusion rules,
//! bandwidth throttling and the engine that reconciles a build directory
//! with a bucket.

pub mod compression;
pub mod content_type;
pub mod engine;
pub mod exclude;
pub mod hash;
pub mod throttle;

pub use compression::{ContentEncoder, ContentEncoding, DEFAULT_GZIP_CONTENT_TYPES};
pub use content_type::detect_content_type;
pub use engine::{
    publish, ErrorPolicy, FailedObject, ObjectAction, PublishEngine, RetryPolicy, RunSummary,
    SyncAction, SyncOptions, SyncPhase, SyncProgress,
};
pub use exclude::ExcludePatterns;
pub use hash::{fingerprint, fingerprint_file};
pub use throttle::{BandwidthLimit, BandwidthLimiter};
