//! Persistence
//!
//! The journal keeps everything the worker needs to survive a restart and
//! to report on a day; the events tab feeds the hold gate.

pub mod events;
pub mod journal;

pub use events::{hold_reason, EventRow};
pub use journal::Journal;
