//! Commands for the sensor evaluation context.

use assetwatch_core::command::Command;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Command to evaluate one tick of a sensor.
#[derive(Debug, Clone)]
pub struct EvaluateSensorTick {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The sensor to evaluate.
    pub sensor_name: String,
    /// Cursor persisted by the previous tick.
    pub cursor: Option<String>,
    /// When the previous tick completed.
    pub last_completion_time: Option<DateTime<Utc>>,
    /// Run key of the last run this sensor launched.
    pub last_run_key: Option<String>,
}

impl EvaluateSensorTick {
    /// Creates a command for a first tick with no prior state.
    #[must_use]
    pub fn new(sensor_name: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            sensor_name: sensor_name.into(),
            cursor: None,
            last_completion_time: None,
            last_run_key: None,
        }
    }

    /// Sets the prior cursor.
    #[must_use]
    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }
}

impl Command for EvaluateSensorTick {
    fn command_type(&self) -> &'static str {
        "sensor.evaluate_tick"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}
