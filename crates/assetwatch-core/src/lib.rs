//! Assetwatch Core: shared abstractions for the sensor engine.
//!
//! This crate defines asset keys, the asset graph, partitions definitions,
//! event records and the read-side event log trait that every other crate
//! depends on. It contains no infrastructure code.

pub mod asset;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod event_log;
pub mod partition;
pub mod partition_mapping;
