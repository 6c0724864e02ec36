//! Routes for sensor listing and tick evaluation.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, instrument};

use assetwatch_core::command::Command;
use assetwatch_sensor::application::command_handlers::{self, TickResult};
use assetwatch_sensor::application::query_handlers::{self, SensorView};
use assetwatch_sensor::domain::commands::EvaluateSensorTick;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /{name}/ticks.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluateTickRequest {
    /// Cursor persisted by the previous tick.
    #[serde(default)]
    pub cursor: Option<String>,
    /// When the previous tick completed.
    #[serde(default)]
    pub last_completion_time: Option<DateTime<Utc>>,
    /// Run key of the last launched run.
    #[serde(default)]
    pub last_run_key: Option<String>,
}

/// GET /
#[instrument(skip(state))]
async fn list_sensors(State(state): State<AppState>) -> Result<Json<Vec<SensorView>>, ApiError> {
    let views = query_handlers::list_sensors(&state.repository)?;
    Ok(Json(views))
}

/// GET /{name}
#[instrument(skip(state))]
async fn get_sensor(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SensorView>, ApiError> {
    let view = query_handlers::get_sensor(&state.repository, &name)?;
    Ok(Json(view))
}

/// POST /{name}/ticks
#[instrument(skip(state, request), fields(correlation_id = tracing::field::Empty))]
async fn evaluate_tick(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<EvaluateTickRequest>,
) -> Result<Json<TickResult>, ApiError> {
    let mut command = EvaluateSensorTick::new(name).with_cursor(request.cursor);
    command.last_completion_time = request.last_completion_time;
    command.last_run_key = request.last_run_key;
    tracing::Span::current().record(
        "correlation_id",
        tracing::field::display(command.correlation_id()),
    );

    info!(sensor = %command.sensor_name, "handling evaluate_tick command");

    let result = command_handlers::handle_evaluate_tick(
        &command,
        &state.repository,
        state.event_log.clone(),
        state.clock.clone(),
    )
    .await?;

    Ok(Json(result))
}

/// Returns the router for sensors.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sensors))
        .route("/{name}", get(get_sensor))
        .route("/{name}/ticks", post(evaluate_tick))
}
