//! Evaluation context handed to standard and single-asset sensors.

use std::sync::Arc;

use assetwatch_core::clock::Clock;
use assetwatch_core::event_log::EventLogStore;
use chrono::{DateTime, Utc};

/// Per-tick state visible to a sensor evaluation.
///
/// The cursor starts as the value persisted by the previous tick; whatever it
/// holds when the evaluation returns is persisted for the next one.
#[derive(Clone)]
pub struct SensorContext {
    sensor_name: String,
    cursor: Option<String>,
    last_completion_time: Option<DateTime<Utc>>,
    last_run_key: Option<String>,
    event_log: Arc<dyn EventLogStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SensorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorContext")
            .field("sensor_name", &self.sensor_name)
            .field("cursor", &self.cursor)
            .field("last_completion_time", &self.last_completion_time)
            .field("last_run_key", &self.last_run_key)
            .finish_non_exhaustive()
    }
}

impl SensorContext {
    /// Creates a context with no prior cursor.
    #[must_use]
    pub fn new(
        sensor_name: impl Into<String>,
        event_log: Arc<dyn EventLogStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sensor_name: sensor_name.into(),
            cursor: None,
            last_completion_time: None,
            last_run_key: None,
            event_log,
            clock,
        }
    }

    /// Sets the cursor persisted by the previous tick.
    #[must_use]
    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Sets when the previous tick completed.
    #[must_use]
    pub fn with_last_completion_time(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_completion_time = at;
        self
    }

    /// Sets the run key of the last launched run.
    #[must_use]
    pub fn with_last_run_key(mut self, run_key: Option<String>) -> Self {
        self.last_run_key = run_key;
        self
    }

    /// The sensor being evaluated.
    #[must_use]
    pub fn sensor_name(&self) -> &str {
        &self.sensor_name
    }

    /// The current cursor.
    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Replaces the cursor persisted at the end of this tick.
    pub fn update_cursor(&mut self, cursor: Option<String>) {
        self.cursor = cursor;
    }

    /// When the previous tick completed.
    #[must_use]
    pub fn last_completion_time(&self) -> Option<DateTime<Utc>> {
        self.last_completion_time
    }

    /// Run key of the last launched run.
    #[must_use]
    pub fn last_run_key(&self) -> Option<&str> {
        self.last_run_key.as_deref()
    }

    /// The event log the sensor reads from.
    #[must_use]
    pub fn event_log(&self) -> &dyn EventLogStore {
        self.event_log.as_ref()
    }

    pub(crate) fn event_log_handle(&self) -> Arc<dyn EventLogStore> {
        Arc::clone(&self.event_log)
    }

    pub(crate) fn clock_handle(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// The current time according to the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetwatch_test_support::{FixedClock, InMemoryEventLog, fixed_now};

    #[test]
    fn test_update_cursor_replaces_prior_value() {
        let mut context = SensorContext::new(
            "s",
            Arc::new(InMemoryEventLog::new()),
            Arc::new(FixedClock::default()),
        )
        .with_cursor(Some("7".to_owned()));

        context.update_cursor(Some("9".to_owned()));

        assert_eq!(context.cursor(), Some("9"));
        assert_eq!(context.now(), fixed_now());
    }
}
