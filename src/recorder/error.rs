use std::collections::BTreeMap;

use thiserror::Error;

use crate::db::{ActivityCounters, BucketKey};

use super::loop_worker::RecorderReport;

#[derive(Error, Debug)]
pub enum RecorderError {
    /// The store could not be opened or written; buffered data was kept.
    #[error("Store unavailable: {0:#}")]
    StoreUnavailable(#[source] anyhow::Error),

    /// Shutdown could not persist the last buckets. They are handed back
    /// together with the run report so the caller can retry or export them.
    #[error("Final flush failed, {} buckets not persisted: {source:#}", .unpersisted.len())]
    FinalFlushFailed {
        #[source]
        source: anyhow::Error,
        unpersisted: BTreeMap<BucketKey, ActivityCounters>,
        report: Box<RecorderReport>,
    },

    #[error("Recorder is not running")]
    Closed,

    #[error("Recorder task failed: {0}")]
    TaskFailed(String),
}

pub type RecorderResult<T> = Result<T, RecorderError>;
