//! PostgreSQL-backed asset event log.

pub mod pg_event_log;
pub mod schema;
