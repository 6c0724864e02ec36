//! Application services: tick contexts, the cursor advance accumulator and
//! the evaluation driver.

pub mod advances;
pub mod command_handlers;
pub mod context;
pub mod multi_asset_context;
pub mod query_handlers;
pub mod registry;
