pub mod accumulator;
pub mod scheduler;

pub use accumulator::{bucket_key, Accumulator, DebounceState};
pub use scheduler::{should_flush, FlushScheduler};
