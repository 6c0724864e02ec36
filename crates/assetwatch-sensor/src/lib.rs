//! Assetwatch: sensor evaluation bounded context.
//!
//! Responsible for decoding per-asset sensor cursors, answering "what
//! changed" questions against the event log during a tick, folding cursor
//! advances into the next cursor, and validating what a sensor yielded.

pub mod application;
pub mod domain;
