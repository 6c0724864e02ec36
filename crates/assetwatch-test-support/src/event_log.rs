//! Test event logs: in-memory `EventLogStore` implementations for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use assetwatch_core::asset::AssetKey;
use assetwatch_core::error::DomainError;
use assetwatch_core::event::{EventKind, EventRecord};
use assetwatch_core::event_log::{EventLogStore, EventRecordsFilter, SortOrder};
use async_trait::async_trait;
use chrono::Utc;

/// An event log held in memory. Storage ids are assigned in append order,
/// starting at 1, unless a test appends with an explicit id.
///
/// Every `event_records` call is counted so tests can assert on the number of
/// store round trips a tick performs.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    records: Mutex<Vec<EventRecord>>,
    queries: AtomicUsize,
}

impl InMemoryEventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a materialization with the next storage id.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn materialize(&self, asset_key: impl Into<AssetKey>, partition: Option<&str>) -> EventRecord {
        let mut records = self.records.lock().unwrap();
        let storage_id = records.last().map_or(1, |r| r.storage_id + 1);
        let record = Self::build(storage_id, EventKind::AssetMaterialization, asset_key, partition);
        records.push(record.clone());
        record
    }

    /// Appends a materialization with an explicit storage id.
    ///
    /// # Panics
    ///
    /// Panics if `storage_id` does not exceed every id already in the log, or
    /// if the internal mutex is poisoned.
    pub fn materialize_with_id(
        &self,
        storage_id: i64,
        asset_key: impl Into<AssetKey>,
        partition: Option<&str>,
    ) -> EventRecord {
        let mut records = self.records.lock().unwrap();
        assert!(
            records.last().is_none_or(|r| r.storage_id < storage_id),
            "storage ids must be strictly increasing"
        );
        let record = Self::build(storage_id, EventKind::AssetMaterialization, asset_key, partition);
        records.push(record.clone());
        record
    }

    /// Appends an observation with the next storage id.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn observe(&self, asset_key: impl Into<AssetKey>) -> EventRecord {
        let mut records = self.records.lock().unwrap();
        let storage_id = records.last().map_or(1, |r| r.storage_id + 1);
        let record = Self::build(storage_id, EventKind::AssetObservation, asset_key, None);
        records.push(record.clone());
        record
    }

    /// Number of `event_records` calls served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn build(
        storage_id: i64,
        kind: EventKind,
        asset_key: impl Into<AssetKey>,
        partition: Option<&str>,
    ) -> EventRecord {
        EventRecord {
            storage_id,
            kind,
            asset_key: asset_key.into(),
            partition: partition.map(str::to_owned),
            run_id: None,
            payload: serde_json::json!({}),
            occurred_at: Utc::now(),
        }
    }
}

#[async_trait]
impl EventLogStore for InMemoryEventLog {
    async fn event_records(
        &self,
        filter: &EventRecordsFilter,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<EventRecord>, DomainError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let records = self.records.lock().unwrap();
        let matching = records.iter().filter(|r| filter.matches(r)).cloned();
        let limit = limit.unwrap_or(usize::MAX);
        Ok(match order {
            SortOrder::Ascending => matching.take(limit).collect(),
            SortOrder::Descending => {
                let mut all: Vec<EventRecord> = matching.collect();
                all.reverse();
                all.truncate(limit);
                all
            }
        })
    }

    async fn materialization_count_by_partition(
        &self,
        asset_keys: &[AssetKey],
    ) -> Result<HashMap<AssetKey, HashMap<String, i64>>, DomainError> {
        let records = self.records.lock().unwrap();
        let mut counts: HashMap<AssetKey, HashMap<String, i64>> = asset_keys
            .iter()
            .map(|k| (k.clone(), HashMap::new()))
            .collect();
        for record in records.iter() {
            if record.kind != EventKind::AssetMaterialization {
                continue;
            }
            let (Some(by_partition), Some(partition)) =
                (counts.get_mut(&record.asset_key), record.partition.as_ref())
            else {
                continue;
            };
            *by_partition.entry(partition.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// An event log that fails every call with an infrastructure error. Useful
/// for testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventLog;

#[async_trait]
impl EventLogStore for FailingEventLog {
    async fn event_records(
        &self,
        _filter: &EventRecordsFilter,
        _order: SortOrder,
        _limit: Option<usize>,
    ) -> Result<Vec<EventRecord>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }

    async fn materialization_count_by_partition(
        &self,
        _asset_keys: &[AssetKey],
    ) -> Result<HashMap<AssetKey, HashMap<String, i64>>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }
}
