//! Input event boundary.
//!
//! Platform hooks are out of scope here; anything able to produce
//! `InputEvent`s implements `EventSource` and feeds an `EventSender`.

pub mod source;
pub mod types;

pub use source::{EventSource, JsonLinesSource};
pub use types::{InputError, InputEvent, MouseButton, RawEvent};
