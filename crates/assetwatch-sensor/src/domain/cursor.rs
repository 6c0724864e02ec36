//! Per-asset cursor state for multi-asset sensors and its string codec.
//!
//! The persisted form is a JSON object keyed by the `/`-joined asset key, each
//! value a three-element array:
//!
//! ```text
//! {"raw/orders": ["2024-07-01", 42, {"2024-06-30": 40}]}
//! ```
//!
//! holding the latest consumed partition, the latest consumed storage id and
//! the trailing unconsumed storage id per partition.

use std::collections::BTreeMap;

use assetwatch_core::asset::AssetKey;
use assetwatch_core::error::DomainError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum number of trailing unconsumed partitions tracked per asset. A tick
/// that would leave this many or more behind fails.
pub const MAX_NUM_UNCONSUMED_EVENTS: usize = 25;

/// Consumption progress for one asset.
///
/// Every id in `trailing_unconsumed_ids` is lower than
/// `latest_consumed_event_id` and is the newest unconsumed materialization of
/// its partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireComponent", into = "WireComponent")]
pub struct AssetCursorComponent {
    /// Partition of the latest consumed event.
    pub latest_consumed_partition: Option<String>,
    /// Storage id of the latest consumed event.
    pub latest_consumed_event_id: Option<i64>,
    /// Partition to the newest unconsumed storage id older than the consumed pointer.
    pub trailing_unconsumed_ids: BTreeMap<String, i64>,
}

#[derive(Serialize, Deserialize)]
struct WireComponent(Option<String>, Option<i64>, BTreeMap<String, i64>);

impl From<WireComponent> for AssetCursorComponent {
    fn from(WireComponent(partition, event_id, trailing): WireComponent) -> Self {
        Self {
            latest_consumed_partition: partition,
            latest_consumed_event_id: event_id,
            trailing_unconsumed_ids: trailing,
        }
    }
}

impl From<AssetCursorComponent> for WireComponent {
    fn from(component: AssetCursorComponent) -> Self {
        Self(
            component.latest_consumed_partition,
            component.latest_consumed_event_id,
            component.trailing_unconsumed_ids,
        )
    }
}

/// The full cursor of a multi-asset sensor, keyed by asset key string.
pub type TickCursorMap = BTreeMap<String, AssetCursorComponent>;

/// Decodes a persisted cursor.
///
/// Absent, unparseable or non-object cursors decode to an empty map. Entries
/// are read in key order and decoding stops at the first value that is not a
/// three-element component; the components read before it are kept.
#[must_use]
pub fn decode_cursor(cursor: Option<&str>) -> TickCursorMap {
    let mut decoded = TickCursorMap::new();
    let Some(raw) = cursor.filter(|c| !c.is_empty()) else {
        return decoded;
    };
    let Ok(Value::Object(entries)) = serde_json::from_str::<Value>(raw) else {
        return decoded;
    };
    for (asset_key, value) in entries {
        match serde_json::from_value::<AssetCursorComponent>(value) {
            Ok(component) => {
                decoded.insert(asset_key, component);
            }
            Err(_) => break,
        }
    }
    decoded
}

/// Encodes a cursor map to its persisted string form.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if serialization fails.
pub fn encode_cursor(cursor: &TickCursorMap) -> Result<String, DomainError> {
    serde_json::to_string(cursor)
        .map_err(|e| DomainError::Infrastructure(format!("cursor serialization failed: {e}")))
}

/// Returns the component for `asset_key`, or an empty one.
#[must_use]
pub fn component_for(cursor: &TickCursorMap, asset_key: &AssetKey) -> AssetCursorComponent {
    cursor
        .get(&asset_key.to_user_string())
        .cloned()
        .unwrap_or_default()
}
