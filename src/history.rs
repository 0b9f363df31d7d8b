//! Read side: recent activity straight from the store, never from the
//! in-memory accumulator.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{Duration, TimeZone, Utc};
use serde::Serialize;

use crate::aggregation::bucket_key;
use crate::clock::Clock;
use crate::db::{ActivityBucket, ActivityCounters, BucketKey};
use crate::store::BucketStore;

/// Converts a `--lookback-secs` style value, rejecting what chrono cannot hold.
pub fn lookback_from_secs(secs: i64) -> Result<Duration> {
    Duration::try_seconds(secs).ok_or_else(|| anyhow!("lookback of {secs} seconds is out of range"))
}

pub struct HistoryQuery {
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
}

impl HistoryQuery {
    pub fn new(store: Arc<dyn BucketStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Buckets from `floor(now) - lookback` onward, ascending.
    pub async fn recent(&self, lookback: Duration) -> Result<Vec<ActivityBucket>> {
        let start = bucket_key(self.clock.now()) - lookback.num_seconds().max(0);
        self.store.range_query(start, None).await
    }

    pub async fn range(
        &self,
        start: BucketKey,
        end: Option<BucketKey>,
    ) -> Result<Vec<ActivityBucket>> {
        self.store.range_query(start, end).await
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub totals: ActivityCounters,
    pub active_buckets: usize,
    pub first_bucket: Option<BucketKey>,
    pub last_bucket: Option<BucketKey>,
}

impl HistorySummary {
    pub fn from_buckets(buckets: &[ActivityBucket]) -> Self {
        let mut summary = Self::default();
        for bucket in buckets {
            summary.totals.merge(&bucket.counters);
            if !bucket.counters.is_empty() {
                summary.active_buckets += 1;
            }
        }
        summary.first_bucket = buckets.first().map(|b| b.bucket_ts);
        summary.last_bucket = buckets.last().map(|b| b.bucket_ts);
        summary
    }

    pub fn render(&self) -> String {
        let totals = &self.totals;
        let mut out = String::new();
        let _ = writeln!(out, "Total Left Clicks: {}", totals.left_clicks);
        let _ = writeln!(out, "Total Right Clicks: {}", totals.right_clicks);
        let _ = writeln!(out, "Total Middle Clicks: {}", totals.middle_clicks);
        let _ = writeln!(out, "Total Keypresses: {}", totals.keypresses);
        let _ = writeln!(out, "Total Mouse Samples: {}", totals.mouse_move_samples);
        let _ = write!(
            out,
            "Total Mouse Movement: {:.2} pixels",
            totals.mouse_move_distance
        );
        out
    }
}

/// One line per bucket, oldest first.
pub fn render_table(buckets: &[ActivityBucket]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<20} {:>6} {:>6} {:>6} {:>6} {:>7} {:>10}",
        "time (utc)", "left", "right", "middle", "keys", "samples", "distance"
    );
    for bucket in buckets {
        let counters = &bucket.counters;
        let label = Utc
            .timestamp_opt(bucket.bucket_ts, 0)
            .single()
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| bucket.bucket_ts.to_string());
        let _ = writeln!(
            out,
            "{:<20} {:>6} {:>6} {:>6} {:>6} {:>7} {:>10.2}",
            label,
            counters.left_clicks,
            counters.right_clicks,
            counters.middle_clicks,
            counters.keypresses,
            counters.mouse_move_samples,
            counters.mouse_move_distance
        );
    }
    out
}
