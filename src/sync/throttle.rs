//! Upload bandwidth throttling.
//!
//! Token bucket over 1 KiB chunks, shared by every upload worker of a run.

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const CHUNK_SIZE: u64 = 1024;

/// Bandwidth limit configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BandwidthLimit {
    /// Bytes per second limit, 0 for unlimited.
    pub bytes_per_second: u64,
}

impl BandwidthLimit {
    pub fn new(bytes_per_second: u64) -> Self {
        Self { bytes_per_second }
    }

    pub fn unlimited() -> Self {
        Self { bytes_per_second: 0 }
    }

    pub fn is_limited(&self) -> bool {
        self.bytes_per_second > 0
    }

    /// Format as human-readable string.
    pub fn display(&self) -> String {
        if !self.is_limited() {
            return "unlimited".to_string();
        }
        format!(
            "{}/s",
            humansize::format_size(self.bytes_per_second, humansize::DECIMAL)
        )
    }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Bandwidth limiter using token bucket algorithm.
#[derive(Clone)]
pub struct BandwidthLimiter {
    limiter: Option<Arc<DirectLimiter>>,
    limit: BandwidthLimit,
}

impl std::fmt::Debug for BandwidthLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BandwidthLimiter")
            .field("limit", &self.limit)
            .finish()
    }
}

impl Default for BandwidthLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl BandwidthLimiter {
    pub fn new(limit: BandwidthLimit) -> Self {
        let limiter = if limit.is_limited() {
            let chunks_per_second = (limit.bytes_per_second / CHUNK_SIZE).clamp(1, u32::MAX as u64);
            NonZeroU32::new(chunks_per_second as u32)
                .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))))
        } else {
            None
        };

        Self { limiter, limit }
    }

    pub fn unlimited() -> Self {
        Self::new(BandwidthLimit::unlimited())
    }

    pub fn limit(&self) -> BandwidthLimit {
        self.limit
    }

    /// Wait until `bytes` may be sent. No-op without a limit.
    ///
    /// Pacing is per object: a put starts once its whole size has been
    /// admitted, and the body then goes out at full speed. The limit holds
    /// on average over a run, not within a single large object.
    pub async fn acquire(&self, bytes: u64) {
        if let Some(limiter) = &self.limiter {
            let chunks = bytes.div_ceil(CHUNK_SIZE).max(1);
            for _ in 0..chunks {
                limiter.until_ready().await;
            }
        }
    }
}

/// Byte counter shared across upload workers.
#[derive(Debug, Default)]
pub struct TransferStats {
    bytes_transferred: AtomicU64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, bytes: u64) {
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }
}
