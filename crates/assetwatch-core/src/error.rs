//! Domain error types.

use thiserror::Error;

/// Top-level error type shared by every assetwatch crate.
///
/// Every variant except `Infrastructure` is fatal for the tick that raised it
/// and is never retried inside the engine.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A sensor or asset definition is malformed.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// The caller asked for something the sensor cannot answer.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An engine invariant was broken during a tick.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Too many trailing unconsumed events accumulated for one asset.
    #[error(
        "reached the maximum number of trailing unconsumed events ({limit}) for asset {asset_key}; \
         consume them with advance_cursor or clear them with advance_all_cursors"
    )]
    UnconsumedBacklogFull {
        /// The asset whose backlog is full.
        asset_key: String,
        /// The backlog cap.
        limit: usize,
    },

    /// No sensor is registered under the requested name.
    #[error("sensor not found: {0}")]
    SensorNotFound(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` for errors that signal a broken engine invariant,
    /// including a full unconsumed-event backlog.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::InvariantViolation(_) | Self::UnconsumedBacklogFull { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backlog_full_counts_as_invariant_violation() {
        let err = DomainError::UnconsumedBacklogFull {
            asset_key: "a".to_owned(),
            limit: 25,
        };
        assert!(err.is_invariant_violation());
        assert!(err.to_string().contains("(25)"));
    }

    #[test]
    fn test_invalid_request_is_not_invariant_violation() {
        assert!(!DomainError::InvalidRequest("x".into()).is_invariant_violation());
    }
}
