//! Event recording pipeline.
//!
//! Producers push `InputEvent`s onto a bounded channel; one task owns the
//! accumulator, decides when to flush and writes closed buckets to the store
//! without ever holding up the producers on storage I/O.

pub mod controller;
pub mod error;
mod loop_worker;

pub use controller::{EventSender, Recorder, RecorderSettings};
pub use error::{RecorderError, RecorderResult};
pub use loop_worker::{FlushNotification, RecorderReport};
