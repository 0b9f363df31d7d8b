use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};

use crate::db::models::{ActivityCounters, BucketKey};
use crate::input::{InputEvent, MouseButton};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

pub const DEFAULT_DEBOUNCE_MS: i64 = 500;

pub fn bucket_key(at: DateTime<Utc>) -> BucketKey {
    // `timestamp()` floors; sub-second nanos are always non-negative.
    at.timestamp()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebounceState {
    pub last_position: Option<(f64, f64)>,
    pub last_sample_at: Option<DateTime<Utc>>,
}

/// In-memory per-second counters fed by raw input events.
///
/// The accumulator has no locking of its own: whoever owns it (the recorder
/// task, or a caller holding a single mutex) serializes record and drain calls.
#[derive(Debug)]
pub struct Accumulator {
    buckets: BTreeMap<BucketKey, ActivityCounters>,
    debounce: DebounceState,
    debounce_interval: Duration,
    /// Keys already written to the store.
    persisted: BTreeSet<BucketKey>,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new(Duration::milliseconds(DEFAULT_DEBOUNCE_MS))
    }
}

impl Accumulator {
    pub fn new(debounce_interval: Duration) -> Self {
        Self {
            buckets: BTreeMap::new(),
            debounce: DebounceState::default(),
            debounce_interval,
            persisted: BTreeSet::new(),
        }
    }

    pub fn record(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::PointerMove { x, y, at } => {
                self.record_pointer_move(x, y, at);
            }
            InputEvent::PointerButton {
                button,
                pressed,
                at,
            } => self.record_button(button, pressed, at),
            InputEvent::KeyPress { at } => self.record_key_press(at),
        }
    }

    /// Returns `true` when the move was sampled, `false` when debounced.
    pub fn record_pointer_move(&mut self, x: f64, y: f64, at: DateTime<Utc>) -> bool {
        if let Some(last_at) = self.debounce.last_sample_at {
            if at.signed_duration_since(last_at) < self.debounce_interval {
                return false;
            }
        }

        if let Some((last_x, last_y)) = self.debounce.last_position {
            let distance = ((x - last_x).powi(2) + (y - last_y).powi(2)).sqrt();
            let counters = self.bucket_mut(at);
            counters.mouse_move_samples += 1;
            counters.mouse_move_distance += distance;
        }

        self.debounce.last_position = Some((x, y));
        self.debounce.last_sample_at = Some(at);
        true
    }

    pub fn record_button(&mut self, button: MouseButton, pressed: bool, at: DateTime<Utc>) {
        if !pressed {
            return;
        }
        let counters = self.bucket_mut(at);
        match button {
            MouseButton::Left => counters.left_clicks += 1,
            MouseButton::Right => counters.right_clicks += 1,
            MouseButton::Middle => counters.middle_clicks += 1,
        }
    }

    pub fn record_key_press(&mut self, at: DateTime<Utc>) {
        self.bucket_mut(at).keypresses += 1;
    }

    /// Takes every buffered bucket, leaving the accumulator empty.
    ///
    /// Debounce state survives so motion distance stays continuous across
    /// flushes.
    pub fn drain(&mut self) -> BTreeMap<BucketKey, ActivityCounters> {
        std::mem::take(&mut self.buckets)
    }

    /// Takes only the buckets with a key strictly below `cutoff`.
    pub fn drain_closed(&mut self, cutoff: BucketKey) -> BTreeMap<BucketKey, ActivityCounters> {
        let open = self.buckets.split_off(&cutoff);
        std::mem::replace(&mut self.buckets, open)
    }

    /// Merges a drained batch back in after its write failed.
    pub fn restore(&mut self, batch: BTreeMap<BucketKey, ActivityCounters>) {
        for (key, counters) in batch {
            self.buckets.entry(key).or_default().merge(&counters);
        }
    }

    /// Records that these keys now exist in the store.
    pub fn mark_persisted<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = BucketKey>,
    {
        self.persisted.extend(keys);
    }

    pub fn is_persisted(&self, key: BucketKey) -> bool {
        self.persisted.contains(&key)
    }

    pub fn buckets(&self) -> &BTreeMap<BucketKey, ActivityCounters> {
        &self.buckets
    }

    pub fn debounce_state(&self) -> &DebounceState {
        &self.debounce
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_mut(&mut self, at: DateTime<Utc>) -> &mut ActivityCounters {
        let own = bucket_key(at);
        let mut key = own;
        // Rewriting a persisted bucket would replace it, so late events land
        // in the next second that has not been written.
        while self.persisted.contains(&key) {
            key = key.saturating_add(1);
        }
        if key != own {
            log_debug!("late event for persisted bucket {own}; folding into {key}");
        }
        self.buckets.entry(key).or_default()
    }
}
