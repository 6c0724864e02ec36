//! Shared application state.

use std::sync::Arc;

use assetwatch_core::clock::Clock;
use assetwatch_core::event_log::EventLogStore;
use assetwatch_sensor::application::registry::SensorRepository;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Clock used for partition resolution.
    pub clock: Arc<dyn Clock>,
    /// Event log sensors read from.
    pub event_log: Arc<dyn EventLogStore>,
    /// Registered sensors and their asset graph.
    pub repository: Arc<SensorRepository>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        event_log: Arc<dyn EventLogStore>,
        repository: SensorRepository,
    ) -> Self {
        Self {
            clock,
            event_log,
            repository: Arc::new(repository),
        }
    }
}
