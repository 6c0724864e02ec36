//! Event records read from the event log.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::asset::AssetKey;
use crate::error::DomainError;

/// Kind of asset event stored in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The asset (or one partition of it) was produced.
    AssetMaterialization,
    /// The asset was observed without being produced.
    AssetObservation,
}

impl EventKind {
    /// Stable name used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AssetMaterialization => "asset_materialization",
            Self::AssetObservation => "asset_observation",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "asset_materialization" => Ok(Self::AssetMaterialization),
            "asset_observation" => Ok(Self::AssetObservation),
            other => Err(DomainError::Infrastructure(format!(
                "unknown event kind: {other}"
            ))),
        }
    }
}

/// An immutable event from the log.
///
/// `storage_id` is assigned by the store, strictly increasing across all
/// assets, and serves as the engine's notion of time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Store-assigned, monotonically increasing identifier.
    pub storage_id: i64,
    /// Kind of event.
    pub kind: EventKind,
    /// The asset the event is about.
    pub asset_key: AssetKey,
    /// The partition materialized, for partitioned assets.
    pub partition: Option<String>,
    /// The run that produced the event, if any.
    pub run_id: Option<Uuid>,
    /// Arbitrary event metadata.
    pub payload: serde_json::Value,
    /// When the event was recorded.
    pub occurred_at: DateTime<Utc>,
}
