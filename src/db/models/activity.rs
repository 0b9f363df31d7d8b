//! Activity bucket data models.
//!
//! A bucket covers one wall-clock second and is identified by its epoch
//! second. Counters are additive, so two partial records for the same second
//! can be merged without loss.

use serde::{Deserialize, Serialize};

/// Epoch seconds, truncated towards negative infinity.
pub type BucketKey = i64;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityCounters {
    pub left_clicks: u64,
    pub right_clicks: u64,
    pub middle_clicks: u64,
    pub keypresses: u64,
    pub mouse_move_samples: u64,
    pub mouse_move_distance: f64,
}

impl ActivityCounters {
    pub fn merge(&mut self, other: &ActivityCounters) {
        self.left_clicks = self.left_clicks.saturating_add(other.left_clicks);
        self.right_clicks = self.right_clicks.saturating_add(other.right_clicks);
        self.middle_clicks = self.middle_clicks.saturating_add(other.middle_clicks);
        self.keypresses = self.keypresses.saturating_add(other.keypresses);
        self.mouse_move_samples = self
            .mouse_move_samples
            .saturating_add(other.mouse_move_samples);
        self.mouse_move_distance += other.mouse_move_distance;
    }

    pub fn total_clicks(&self) -> u64 {
        self.left_clicks
            .saturating_add(self.right_clicks)
            .saturating_add(self.middle_clicks)
    }

    pub fn is_empty(&self) -> bool {
        self.total_clicks() == 0
            && self.keypresses == 0
            && self.mouse_move_samples == 0
            && self.mouse_move_distance == 0.0
    }
}

/// A persisted bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityBucket {
    pub bucket_ts: BucketKey,
    #[serde(flatten)]
    pub counters: ActivityCounters,
}
