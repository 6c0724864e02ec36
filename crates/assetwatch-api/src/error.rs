//! API error types.

use assetwatch_core::error::DomainError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Startup errors for the API server.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The repository file could not be parsed.
    #[error("repository file error: {0}")]
    ConfigFile(#[from] serde_yaml::Error),

    /// The repository file describes invalid assets or sensors.
    #[error("repository definition error: {0}")]
    Definition(#[from] DomainError),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer wrapper around `DomainError` that implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self.0 {
            DomainError::SensorNotFound(_) => (StatusCode::NOT_FOUND, "sensor_not_found"),
            DomainError::InvalidDefinition(_) => (StatusCode::BAD_REQUEST, "invalid_definition"),
            DomainError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            DomainError::InvariantViolation(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation")
            }
            DomainError::UnconsumedBacklogFull { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unconsumed_backlog_full")
            }
            DomainError::Infrastructure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "infrastructure_error")
            }
        };

        let body = ErrorBody {
            error: error_code,
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: DomainError) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn test_sensor_not_found_maps_to_404() {
        assert_eq!(
            status_of(DomainError::SensorNotFound("s".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_invalid_request_maps_to_400() {
        assert_eq!(
            status_of(DomainError::InvalidRequest("bad key".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_invariant_violations_map_to_422() {
        assert_eq!(
            status_of(DomainError::InvariantViolation("no advance".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(DomainError::UnconsumedBacklogFull {
                asset_key: "a".into(),
                limit: 25,
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_infrastructure_maps_to_500() {
        assert_eq!(
            status_of(DomainError::Infrastructure("db down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
