//! Read-side event log abstraction.
//!
//! The sensor engine never writes to the log. It asks for records of one kind,
//! optionally narrowed to one asset, a storage-id window, a set of partitions
//! or an explicit set of storage ids.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::asset::AssetKey;
use crate::error::DomainError;
use crate::event::{EventKind, EventRecord};

/// Filter for [`EventLogStore::event_records`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecordsFilter {
    /// Only records of this kind.
    pub kind: EventKind,
    /// Only records for this asset.
    pub asset_key: Option<AssetKey>,
    /// Only records with `storage_id > after_storage_id`.
    pub after_storage_id: Option<i64>,
    /// Only records with `storage_id < before_storage_id`.
    pub before_storage_id: Option<i64>,
    /// Only records for one of these partitions.
    pub partitions: Option<Vec<String>>,
    /// Only records with one of these storage ids.
    pub storage_ids: Option<Vec<i64>>,
}

impl EventRecordsFilter {
    /// Matches every materialization.
    #[must_use]
    pub fn materializations() -> Self {
        Self {
            kind: EventKind::AssetMaterialization,
            asset_key: None,
            after_storage_id: None,
            before_storage_id: None,
            partitions: None,
            storage_ids: None,
        }
    }

    /// Narrows to one asset.
    #[must_use]
    pub fn for_asset(mut self, asset_key: AssetKey) -> Self {
        self.asset_key = Some(asset_key);
        self
    }

    /// Narrows to records strictly after `storage_id`; `None` leaves the
    /// lower bound open.
    #[must_use]
    pub fn after(mut self, storage_id: Option<i64>) -> Self {
        self.after_storage_id = storage_id;
        self
    }

    /// Narrows to records strictly before `storage_id`.
    #[must_use]
    pub fn before(mut self, storage_id: i64) -> Self {
        self.before_storage_id = Some(storage_id);
        self
    }

    /// Narrows to the given partitions.
    #[must_use]
    pub fn in_partitions(mut self, partitions: Vec<String>) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Narrows to the given storage ids.
    #[must_use]
    pub fn with_storage_ids(mut self, storage_ids: Vec<i64>) -> Self {
        self.storage_ids = Some(storage_ids);
        self
    }

    /// Returns `true` if `record` passes every clause of the filter.
    #[must_use]
    pub fn matches(&self, record: &EventRecord) -> bool {
        record.kind == self.kind
            && self
                .asset_key
                .as_ref()
                .is_none_or(|key| &record.asset_key == key)
            && self
                .after_storage_id
                .is_none_or(|after| record.storage_id > after)
            && self
                .before_storage_id
                .is_none_or(|before| record.storage_id < before)
            && self.partitions.as_ref().is_none_or(|partitions| {
                record
                    .partition
                    .as_ref()
                    .is_some_and(|p| partitions.contains(p))
            })
            && self
                .storage_ids
                .as_ref()
                .is_none_or(|ids| ids.contains(&record.storage_id))
    }
}

/// Result ordering by storage id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest first.
    Ascending,
    /// Newest first.
    Descending,
}

/// Read access to the append-only asset event log.
#[async_trait]
pub trait EventLogStore: Send + Sync {
    /// Records matching `filter`, ordered by storage id, truncated to `limit`.
    async fn event_records(
        &self,
        filter: &EventRecordsFilter,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<EventRecord>, DomainError>;

    /// Number of materializations per partition for each requested asset.
    /// Assets with no partitioned materializations map to an empty map or are
    /// absent.
    async fn materialization_count_by_partition(
        &self,
        asset_keys: &[AssetKey],
    ) -> Result<HashMap<AssetKey, HashMap<String, i64>>, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(storage_id: i64, key: &str, partition: Option<&str>) -> EventRecord {
        EventRecord {
            storage_id,
            kind: EventKind::AssetMaterialization,
            asset_key: AssetKey::from(key),
            partition: partition.map(str::to_owned),
            run_id: None,
            payload: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_bounds_are_exclusive() {
        let filter = EventRecordsFilter::materializations()
            .after(Some(10))
            .before(12);
        assert!(!filter.matches(&record(10, "a", None)));
        assert!(filter.matches(&record(11, "a", None)));
        assert!(!filter.matches(&record(12, "a", None)));
    }

    #[test]
    fn test_partition_filter_excludes_unpartitioned_records() {
        let filter =
            EventRecordsFilter::materializations().in_partitions(vec!["p1".to_owned()]);
        assert!(filter.matches(&record(1, "a", Some("p1"))));
        assert!(!filter.matches(&record(2, "a", Some("p2"))));
        assert!(!filter.matches(&record(3, "a", None)));
    }

    #[test]
    fn test_asset_and_storage_id_filters() {
        let filter = EventRecordsFilter::materializations()
            .for_asset(AssetKey::from("a"))
            .with_storage_ids(vec![1, 3]);
        assert!(filter.matches(&record(1, "a", None)));
        assert!(!filter.matches(&record(2, "a", None)));
        assert!(!filter.matches(&record(3, "b", None)));
    }

    #[test]
    fn test_kind_must_match() {
        let mut observation = record(1, "a", None);
        observation.kind = EventKind::AssetObservation;
        assert!(!EventRecordsFilter::materializations().matches(&observation));
    }
}
