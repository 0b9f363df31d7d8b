use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Row};

use crate::db::{
    helpers::{conversion_error, to_i64, to_u64},
    models::{ActivityBucket, ActivityCounters, BucketKey},
    Database,
};

const SELECT_COLUMNS: &str = "SELECT
        bucket_ts,
        left_clicks,
        right_clicks,
        middle_clicks,
        keypresses,
        mouse_move_samples,
        mouse_move_distance
    FROM activity_buckets";

fn row_to_bucket(row: &Row) -> Result<ActivityBucket, rusqlite::Error> {
    let count = |column: &str| -> Result<u64, rusqlite::Error> {
        let raw: i64 = row.get(column)?;
        to_u64(raw, column).map_err(conversion_error)
    };

    Ok(ActivityBucket {
        bucket_ts: row.get("bucket_ts")?,
        counters: ActivityCounters {
            left_clicks: count("left_clicks")?,
            right_clicks: count("right_clicks")?,
            middle_clicks: count("middle_clicks")?,
            keypresses: count("keypresses")?,
            mouse_move_samples: count("mouse_move_samples")?,
            mouse_move_distance: row.get("mouse_move_distance")?,
        },
    })
}

impl Database {
    /// Writes every bucket in one transaction, replacing rows that already
    /// exist for the same second.
    pub async fn upsert_activity_buckets(&self, buckets: Vec<ActivityBucket>) -> Result<()> {
        if buckets.is_empty() {
            return Ok(());
        }

        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open activity bucket transaction")?;
            let updated_at = Utc::now().to_rfc3339();

            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO activity_buckets (
                        bucket_ts,
                        left_clicks,
                        right_clicks,
                        middle_clicks,
                        keypresses,
                        mouse_move_samples,
                        mouse_move_distance,
                        updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(bucket_ts) DO UPDATE SET
                        left_clicks = excluded.left_clicks,
                        right_clicks = excluded.right_clicks,
                        middle_clicks = excluded.middle_clicks,
                        keypresses = excluded.keypresses,
                        mouse_move_samples = excluded.mouse_move_samples,
                        mouse_move_distance = excluded.mouse_move_distance,
                        updated_at = excluded.updated_at",
                )?;

                for bucket in &buckets {
                    let counters = &bucket.counters;
                    stmt.execute(params![
                        bucket.bucket_ts,
                        to_i64(counters.left_clicks)?,
                        to_i64(counters.right_clicks)?,
                        to_i64(counters.middle_clicks)?,
                        to_i64(counters.keypresses)?,
                        to_i64(counters.mouse_move_samples)?,
                        counters.mouse_move_distance,
                        updated_at,
                    ])
                    .with_context(|| format!("failed to upsert bucket {}", bucket.bucket_ts))?;
                }
            }

            tx.commit().context("failed to commit activity buckets")?;
            Ok(())
        })
        .await
    }

    /// Buckets in `[start, end)` ascending; `None` leaves the range open.
    pub async fn get_activity_buckets(
        &self,
        start: BucketKey,
        end: Option<BucketKey>,
    ) -> Result<Vec<ActivityBucket>> {
        self.execute(move |conn| {
            let mut buckets = Vec::new();
            match end {
                Some(end) => {
                    let mut stmt = conn.prepare(&format!(
                        "{SELECT_COLUMNS} WHERE bucket_ts >= ?1 AND bucket_ts < ?2 ORDER BY bucket_ts ASC"
                    ))?;
                    let rows = stmt.query_map(params![start, end], row_to_bucket)?;
                    for row in rows {
                        buckets.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "{SELECT_COLUMNS} WHERE bucket_ts >= ?1 ORDER BY bucket_ts ASC"
                    ))?;
                    let rows = stmt.query_map(params![start], row_to_bucket)?;
                    for row in rows {
                        buckets.push(row?);
                    }
                }
            }
            Ok(buckets)
        })
        .await
    }

    pub async fn count_activity_buckets(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM activity_buckets", [], |row| row.get(0))?;
            to_u64(count, "count")
        })
        .await
    }
}
