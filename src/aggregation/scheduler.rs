use chrono::{DateTime, Duration, Utc};

use crate::db::models::BucketKey;

use super::accumulator::bucket_key;

pub const DEFAULT_FLUSH_INTERVAL_MS: i64 = 1_000;
pub const DEFAULT_SETTLE_SECS: i64 = 1;

pub fn should_flush(now: DateTime<Utc>, last_flush: DateTime<Utc>, interval: Duration) -> bool {
    now.signed_duration_since(last_flush) >= interval
}

/// Time gate consulted after every recorded event and on each timer tick.
#[derive(Debug, Clone)]
pub struct FlushScheduler {
    interval: Duration,
    settle_secs: i64,
    last_flush: DateTime<Utc>,
}

impl FlushScheduler {
    pub fn new(interval: Duration, settle_secs: i64, now: DateTime<Utc>) -> Self {
        Self {
            interval,
            settle_secs: settle_secs.max(0),
            last_flush: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        should_flush(now, self.last_flush, self.interval)
    }

    pub fn mark_flushed(&mut self, now: DateTime<Utc>) {
        self.last_flush = now;
    }

    /// Buckets strictly below the returned key are complete and safe to write.
    pub fn closed_cutoff(&self, now: DateTime<Utc>) -> BucketKey {
        bucket_key(now) - self.settle_secs
    }

    pub fn last_flush(&self) -> DateTime<Utc> {
        self.last_flush
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
