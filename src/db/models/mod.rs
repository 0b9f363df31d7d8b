pub mod activity;

pub use activity::{ActivityBucket, ActivityCounters, BucketKey};
