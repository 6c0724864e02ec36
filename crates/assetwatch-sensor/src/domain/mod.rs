//! Domain types for sensor evaluation.

pub mod commands;
pub mod cursor;
pub mod definition;
pub mod run_request;
