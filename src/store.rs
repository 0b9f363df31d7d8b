//! Persistence gateway used by the recorder and the history query.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::db::{ActivityBucket, ActivityCounters, BucketKey, Database};

/// Durable upsert-by-second store.
///
/// Writes are total: an upsert replaces every counter of an existing bucket,
/// so writing the same batch twice leaves the same final state.
#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn upsert_batch(&self, batch: &BTreeMap<BucketKey, ActivityCounters>) -> Result<()>;

    /// Buckets in `[start, end)` ascending by key; `None` leaves the end open.
    async fn range_query(
        &self,
        start: BucketKey,
        end: Option<BucketKey>,
    ) -> Result<Vec<ActivityBucket>>;

    async fn upsert(&self, key: BucketKey, counters: ActivityCounters) -> Result<()> {
        let mut batch = BTreeMap::new();
        batch.insert(key, counters);
        self.upsert_batch(&batch).await
    }
}

fn to_buckets(batch: &BTreeMap<BucketKey, ActivityCounters>) -> Vec<ActivityBucket> {
    batch
        .iter()
        .map(|(&bucket_ts, &counters)| ActivityBucket {
            bucket_ts,
            counters,
        })
        .collect()
}

#[async_trait]
impl BucketStore for Database {
    async fn upsert_batch(&self, batch: &BTreeMap<BucketKey, ActivityCounters>) -> Result<()> {
        self.upsert_activity_buckets(to_buckets(batch)).await
    }

    async fn range_query(
        &self,
        start: BucketKey,
        end: Option<BucketKey>,
    ) -> Result<Vec<ActivityBucket>> {
        self.get_activity_buckets(start, end).await
    }
}

/// Process-local store for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<BucketKey, ActivityCounters>>,
    unavailable: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable every write fails, like a locked or full database.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful batch writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> BTreeMap<BucketKey, ActivityCounters> {
        match self.rows.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn upsert_batch(&self, batch: &BTreeMap<BucketKey, ActivityCounters>) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store is unavailable"));
        }
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        for (&key, &counters) in batch {
            rows.insert(key, counters);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn range_query(
        &self,
        start: BucketKey,
        end: Option<BucketKey>,
    ) -> Result<Vec<ActivityBucket>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        let buckets = match end {
            Some(end) if end <= start => Vec::new(),
            Some(end) => to_buckets(&rows.range(start..end).map(|(k, v)| (*k, *v)).collect()),
            None => to_buckets(&rows.range(start..).map(|(k, v)| (*k, *v)).collect()),
        };
        Ok(buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn batch(entries: &[(BucketKey, u64)]) -> BTreeMap<BucketKey, ActivityCounters> {
        entries
            .iter()
            .map(|&(key, keypresses)| {
                (
                    key,
                    ActivityCounters {
                        keypresses,
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    async fn assert_reflush_is_idempotent(store: &dyn BucketStore) {
        let drained = batch(&[(5, 2), (6, 9), (7, 1)]);
        store.upsert_batch(&drained).await.unwrap();
        let once = store.range_query(0, None).await.unwrap();

        store.upsert_batch(&drained).await.unwrap();
        let twice = store.range_query(0, None).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.iter().map(|b| b.counters.keypresses).sum::<u64>(), 12);
    }

    #[tokio::test]
    async fn memory_store_reflush_is_idempotent() {
        assert_reflush_is_idempotent(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_reflush_is_idempotent() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("activity.sqlite3")).unwrap();
        assert_reflush_is_idempotent(&db).await;
    }

    #[tokio::test]
    async fn single_upsert_replaces_whole_record() {
        let store = MemoryStore::new();
        store
            .upsert(
                3,
                ActivityCounters {
                    left_clicks: 4,
                    keypresses: 4,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .upsert(
                3,
                ActivityCounters {
                    keypresses: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let rows = store.range_query(3, Some(4)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].counters.left_clicks, 0);
        assert_eq!(rows[0].counters.keypresses, 1);
    }

    #[tokio::test]
    async fn unavailable_memory_store_rejects_writes() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.upsert_batch(&batch(&[(1, 1)])).await.is_err());
        store.set_unavailable(false);
        store.upsert_batch(&batch(&[(1, 1)])).await.unwrap();
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.range_query(5, Some(2)).await.unwrap(), vec![]);
    }
}
