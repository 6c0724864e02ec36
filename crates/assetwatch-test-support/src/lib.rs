//! Shared test doubles and utilities for the assetwatch sensor engine.

mod clock;
mod event_log;

pub use clock::{FixedClock, fixed_now};
pub use event_log::{FailingEventLog, InMemoryEventLog};
