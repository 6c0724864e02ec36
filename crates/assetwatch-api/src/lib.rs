//! Assetwatch HTTP API: repository configuration, built-in sensors and the
//! tick evaluation endpoints.

pub mod config;
pub mod error;
pub mod routes;
pub mod sensors;
pub mod state;

use axum::Router;

use crate::state::AppState;

/// Builds the application router without transport layers.
pub fn app(app_state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/sensors", routes::sensors::router())
        .with_state(app_state)
}
