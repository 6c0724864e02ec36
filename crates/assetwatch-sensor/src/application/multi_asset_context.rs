//! Tick context for sensors that track materializations across many assets.
//!
//! Queries read the cursor as it was at tick start; `advance_cursor` and
//! `advance_all_cursors` only record requests. The next cursor is computed
//! once, by `update_cursor_after_evaluation`, after the evaluation returns.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use assetwatch_core::asset::{AssetDefinition, AssetGraph, AssetKey, AssetSelection};
use assetwatch_core::clock::Clock;
use assetwatch_core::error::DomainError;
use assetwatch_core::event::EventRecord;
use assetwatch_core::event_log::{EventLogStore, EventRecordsFilter, SortOrder};
use assetwatch_core::partition::PartitionsDefinition;
use tracing::{debug, warn};

use crate::application::advances::CursorAdvances;
use crate::application::context::SensorContext;
use crate::domain::cursor::{
    AssetCursorComponent, TickCursorMap, component_for, decode_cursor, encode_cursor,
};

/// Latest record per partition, iterated from least to most recently
/// materialized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionRecords {
    entries: Vec<(String, EventRecord)>,
}

impl PartitionRecords {
    /// Records `record` as the latest for `partition`, moving the partition to
    /// the end of the iteration order.
    pub fn insert(&mut self, partition: String, record: EventRecord) {
        self.entries.retain(|(p, _)| *p != partition);
        self.entries.push((partition, record));
    }

    /// The latest record for `partition`.
    #[must_use]
    pub fn get(&self, partition: &str) -> Option<&EventRecord> {
        self.entries
            .iter()
            .find(|(p, _)| p == partition)
            .map(|(_, record)| record)
    }

    /// Partitions in recency order.
    pub fn partitions(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(p, _)| p.as_str())
    }

    /// `(partition, record)` pairs in recency order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EventRecord)> {
        self.entries.iter().map(|(p, r)| (p.as_str(), r))
    }

    /// Number of partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no partition has a record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for PartitionRecords {
    type Item = (String, EventRecord);
    type IntoIter = std::vec::IntoIter<(String, EventRecord)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Builds a cursor that marks the newest materialization of each asset as
/// consumed. Assets that were never materialized are left out.
///
/// # Errors
///
/// Returns any error from the event log, or `DomainError::Infrastructure` if
/// the cursor cannot be encoded.
pub async fn cursor_from_latest_materializations(
    asset_keys: &[AssetKey],
    event_log: &dyn EventLogStore,
) -> Result<String, DomainError> {
    let mut cursor = TickCursorMap::new();
    for asset_key in asset_keys {
        let latest = event_log
            .event_records(
                &EventRecordsFilter::materializations().for_asset(asset_key.clone()),
                SortOrder::Descending,
                Some(1),
            )
            .await?;
        if let Some(record) = latest.into_iter().next() {
            cursor.insert(
                asset_key.to_user_string(),
                AssetCursorComponent {
                    latest_consumed_partition: record.partition,
                    latest_consumed_event_id: Some(record.storage_id),
                    trailing_unconsumed_ids: BTreeMap::new(),
                },
            );
        }
    }
    encode_cursor(&cursor)
}

/// Builder for [`MultiAssetSensorContext`].
#[derive(Debug)]
pub struct MultiAssetSensorContextBuilder {
    base: SensorContext,
    asset_graph: Arc<AssetGraph>,
    selection: AssetSelection,
    cursor_from_latest_materializations: bool,
}

impl MultiAssetSensorContextBuilder {
    /// Seeds the cursor from the newest materialization of every tracked asset.
    #[must_use]
    pub fn cursor_from_latest_materializations(mut self, enabled: bool) -> Self {
        self.cursor_from_latest_materializations = enabled;
        self
    }

    /// Resolves the tracked assets and decodes the starting cursor.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidDefinition` if the selection names unknown
    /// assets or resolves to none, `DomainError::InvalidRequest` if a cursor
    /// was supplied together with `cursor_from_latest_materializations`, or
    /// any error from the event log while seeding the cursor.
    pub async fn build(self) -> Result<MultiAssetSensorContext, DomainError> {
        let mut base = self.base;
        let asset_keys = self.asset_graph.resolve(&self.selection)?;

        if self.cursor_from_latest_materializations {
            if base.cursor().is_some() {
                return Err(DomainError::InvalidRequest(
                    "cannot provide both a cursor and cursor_from_latest_materializations"
                        .to_owned(),
                ));
            }
            let seeded = cursor_from_latest_materializations(&asset_keys, base.event_log()).await?;
            base.update_cursor(Some(seeded));
        }

        let initial_cursor = decode_cursor(base.cursor());
        Ok(MultiAssetSensorContext {
            event_log: base.event_log_handle(),
            clock: base.clock_handle(),
            base,
            asset_graph: self.asset_graph,
            asset_keys,
            initial_cursor,
            advances: CursorAdvances::new(),
            cursor_has_been_updated: false,
            cursor_finalized: false,
            initial_unconsumed_events: None,
            warnings: Vec::new(),
        })
    }
}

/// Per-tick state for a multi-asset sensor.
pub struct MultiAssetSensorContext {
    base: SensorContext,
    event_log: Arc<dyn EventLogStore>,
    clock: Arc<dyn Clock>,
    asset_graph: Arc<AssetGraph>,
    asset_keys: Vec<AssetKey>,
    initial_cursor: TickCursorMap,
    advances: CursorAdvances,
    cursor_has_been_updated: bool,
    cursor_finalized: bool,
    initial_unconsumed_events: Option<HashMap<i64, EventRecord>>,
    warnings: Vec<String>,
}

impl std::fmt::Debug for MultiAssetSensorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiAssetSensorContext")
            .field("base", &self.base)
            .field("asset_keys", &self.asset_keys)
            .field("initial_cursor", &self.initial_cursor)
            .field("advances", &self.advances)
            .field("cursor_has_been_updated", &self.cursor_has_been_updated)
            .finish_non_exhaustive()
    }
}

impl MultiAssetSensorContext {
    /// Starts building a context tracking `selection` within `asset_graph`.
    #[must_use]
    pub fn builder(
        base: SensorContext,
        asset_graph: Arc<AssetGraph>,
        selection: AssetSelection,
    ) -> MultiAssetSensorContextBuilder {
        MultiAssetSensorContextBuilder {
            base,
            asset_graph,
            selection,
            cursor_from_latest_materializations: false,
        }
    }

    /// Sensor name, tick metadata and the raw cursor.
    #[must_use]
    pub fn base(&self) -> &SensorContext {
        &self.base
    }

    /// The serialized cursor: the tick-start value until the cursor is
    /// finalized, then the next cursor.
    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        self.base.cursor()
    }

    /// Tracked asset keys, in selection order.
    #[must_use]
    pub fn asset_keys(&self) -> &[AssetKey] {
        &self.asset_keys
    }

    /// The asset graph the selection was resolved against.
    #[must_use]
    pub fn asset_graph(&self) -> &AssetGraph {
        &self.asset_graph
    }

    /// Non-fatal issues raised while answering queries this tick.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Returns `true` once `advance_cursor` or `advance_all_cursors` was called.
    #[must_use]
    pub fn cursor_has_been_updated(&self) -> bool {
        self.cursor_has_been_updated
    }

    /// The cursor component `asset_key` started the tick with.
    #[must_use]
    pub fn cursor_component(&self, asset_key: &AssetKey) -> AssetCursorComponent {
        component_for(&self.initial_cursor, asset_key)
    }

    fn is_tracked(&self, asset_key: &AssetKey) -> bool {
        self.asset_keys.contains(asset_key)
    }

    fn tracked_definition(&self, asset_key: &AssetKey) -> Result<&AssetDefinition, DomainError> {
        if !self.is_tracked(asset_key) {
            return Err(DomainError::InvalidRequest(format!(
                "asset key {asset_key} is not monitored by sensor {}",
                self.base.sensor_name()
            )));
        }
        self.asset_graph.get(asset_key).ok_or_else(|| {
            DomainError::InvalidRequest(format!("no asset with key {asset_key} in asset graph"))
        })
    }

    /// Fetches, once per tick, every record referenced by the tracked assets'
    /// trailing unconsumed ids.
    async fn cache_initial_unconsumed_events(&mut self) -> Result<(), DomainError> {
        if self.initial_unconsumed_events.is_some() {
            return Ok(());
        }
        let ids: Vec<i64> = self
            .asset_keys
            .iter()
            .flat_map(|key| {
                component_for(&self.initial_cursor, key)
                    .trailing_unconsumed_ids
                    .into_values()
            })
            .collect();

        let mut cached = HashMap::with_capacity(ids.len());
        if !ids.is_empty() {
            let records = self
                .event_log
                .event_records(
                    &EventRecordsFilter::materializations().with_storage_ids(ids),
                    SortOrder::Ascending,
                    None,
                )
                .await?;
            cached.extend(records.into_iter().map(|r| (r.storage_id, r)));
        }
        self.initial_unconsumed_events = Some(cached);
        Ok(())
    }

    /// Records behind `asset_key`'s trailing unconsumed ids, ascending by
    /// storage id. Ids no longer present in the log are skipped.
    ///
    /// # Errors
    ///
    /// Returns any error from the event log on first access.
    pub async fn trailing_unconsumed_events(
        &mut self,
        asset_key: &AssetKey,
    ) -> Result<Vec<EventRecord>, DomainError> {
        self.cache_initial_unconsumed_events().await?;
        let mut ids: Vec<i64> = self
            .cursor_component(asset_key)
            .trailing_unconsumed_ids
            .into_values()
            .collect();
        ids.sort_unstable();
        let cache = self.initial_unconsumed_events.as_ref();
        Ok(ids
            .into_iter()
            .filter_map(|id| cache.and_then(|c| c.get(&id)).cloned())
            .collect())
    }

    /// The newest materialization after the consumed pointer, per key.
    /// Defaults to every tracked key.
    ///
    /// # Errors
    ///
    /// Returns any error from the event log.
    pub async fn latest_materialization_per_key(
        &self,
        asset_keys: Option<&[AssetKey]>,
    ) -> Result<BTreeMap<AssetKey, Option<EventRecord>>, DomainError> {
        let asset_keys = asset_keys.unwrap_or(&self.asset_keys);
        let mut latest = BTreeMap::new();
        for asset_key in asset_keys {
            let records = self
                .event_log
                .event_records(
                    &EventRecordsFilter::materializations()
                        .for_asset(asset_key.clone())
                        .after(self.cursor_component(asset_key).latest_consumed_event_id),
                    SortOrder::Descending,
                    Some(1),
                )
                .await?;
            latest.insert(asset_key.clone(), records.into_iter().next());
        }
        Ok(latest)
    }

    /// Materializations after the consumed pointer, earliest first, at most
    /// `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidRequest` if `asset_key` is not tracked, or
    /// any error from the event log.
    pub async fn materializations_for_key(
        &self,
        asset_key: &AssetKey,
        limit: usize,
    ) -> Result<Vec<EventRecord>, DomainError> {
        self.tracked_definition(asset_key)?;
        self.event_log
            .event_records(
                &EventRecordsFilter::materializations()
                    .for_asset(asset_key.clone())
                    .after(self.cursor_component(asset_key).latest_consumed_event_id),
                SortOrder::Ascending,
                Some(limit),
            )
            .await
    }

    fn partitions_def(&self, asset_key: &AssetKey) -> Result<&PartitionsDefinition, DomainError> {
        self.tracked_definition(asset_key)?
            .partitions_def()
            .ok_or_else(|| {
                DomainError::InvariantViolation(format!(
                    "cannot get latest materialization by partition for asset {asset_key}, \
                     which has no partitions"
                ))
            })
    }

    fn partitions_after_cursor(
        &self,
        asset_key: &AssetKey,
        all_partitions: Vec<String>,
    ) -> Result<Vec<String>, DomainError> {
        let Some(cursor_partition) = self.cursor_component(asset_key).latest_consumed_partition
        else {
            return Ok(all_partitions);
        };
        let position = all_partitions
            .iter()
            .position(|p| *p == cursor_partition)
            .ok_or_else(|| {
                DomainError::InvariantViolation(format!(
                    "consumed partition {cursor_partition} is not a partition of asset {asset_key}"
                ))
            })?;
        Ok(all_partitions[position + 1..].to_vec())
    }

    /// The newest record per partition of `asset_key`, starting from the
    /// trailing unconsumed records and overlaid by records after the consumed
    /// pointer. Only partitions valid as of now are included; with
    /// `after_cursor_partition_only`, only those ordered after the consumed
    /// partition.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidRequest` if `asset_key` is not tracked,
    /// `DomainError::InvariantViolation` if it is unpartitioned, or any error
    /// from the event log.
    pub async fn latest_materialization_per_partition(
        &mut self,
        asset_key: &AssetKey,
        after_cursor_partition_only: bool,
    ) -> Result<PartitionRecords, DomainError> {
        let all_partitions = self.partitions_def(asset_key)?.partition_keys(self.clock.now());
        let partitions = if after_cursor_partition_only {
            self.partitions_after_cursor(asset_key, all_partitions)?
        } else {
            all_partitions
        };

        let mut by_partition = PartitionRecords::default();
        if partitions.is_empty() {
            return Ok(by_partition);
        }

        for record in self.trailing_unconsumed_events(asset_key).await? {
            if let Some(partition) = record.partition.clone() {
                if partitions.contains(&partition) {
                    by_partition.insert(partition, record);
                }
            }
        }

        let fresh = self
            .event_log
            .event_records(
                &EventRecordsFilter::materializations()
                    .for_asset(asset_key.clone())
                    .in_partitions(partitions)
                    .after(self.cursor_component(asset_key).latest_consumed_event_id),
                SortOrder::Ascending,
                None,
            )
            .await?;
        for record in fresh {
            if let Some(partition) = record.partition.clone() {
                by_partition.insert(partition, record);
            }
        }
        Ok(by_partition)
    }

    /// Partition to (asset to newest unconsumed record), across every tracked
    /// asset.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidRequest` unless every tracked asset is
    /// partitioned with the same partitions definition, or any error from the
    /// event log.
    pub async fn latest_materialization_per_partition_and_asset(
        &mut self,
    ) -> Result<BTreeMap<String, BTreeMap<AssetKey, EventRecord>>, DomainError> {
        let shared = {
            let mut defs = self
                .asset_keys
                .iter()
                .map(|key| self.asset_graph.get(key).and_then(AssetDefinition::partitions_def));
            let first = defs.next().flatten();
            first.is_some() && defs.all(|def| def == first)
        };
        if !shared {
            return Err(DomainError::InvalidRequest(
                "all assets must be partitioned and share the same partitions definition"
                    .to_owned(),
            ));
        }

        let mut by_partition: BTreeMap<String, BTreeMap<AssetKey, EventRecord>> = BTreeMap::new();
        for asset_key in self.asset_keys.clone() {
            let records = self
                .latest_materialization_per_partition(&asset_key, false)
                .await?;
            for (partition, record) in records {
                by_partition
                    .entry(partition)
                    .or_default()
                    .insert(asset_key.clone(), record);
            }
        }
        Ok(by_partition)
    }

    /// The consumed partition marker for `asset_key`, or for the only tracked
    /// asset when `asset_key` is omitted.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidRequest` if `asset_key` is not tracked, or
    /// if it is omitted while several assets are tracked.
    pub fn cursor_partition(&self, asset_key: Option<&AssetKey>) -> Result<Option<String>, DomainError> {
        let asset_key = match (asset_key, self.asset_keys.as_slice()) {
            (Some(key), _) => {
                self.tracked_definition(key)?;
                key
            }
            (None, [only]) => only,
            (None, _) => {
                return Err(DomainError::InvalidRequest(
                    "asset key must be provided when multiple assets are tracked".to_owned(),
                ));
            }
        };
        Ok(self.cursor_component(asset_key).latest_consumed_partition)
    }

    /// Whether every listed partition, or every partition of the asset when
    /// `partitions` is `None`, was ever materialized. Ignores the cursor.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidRequest` for an empty partition list,
    /// `DomainError::InvariantViolation` when `partitions` is omitted for an
    /// untracked or unpartitioned asset, or any error from the event log.
    pub async fn all_partitions_materialized(
        &self,
        asset_key: &AssetKey,
        partitions: Option<&[String]>,
    ) -> Result<bool, DomainError> {
        if partitions.is_some_and(<[String]>::is_empty) {
            return Err(DomainError::InvalidRequest(
                "must provide at least one partition in list".to_owned(),
            ));
        }

        let partitions = match partitions {
            Some(partitions) => partitions.to_vec(),
            None => {
                if !self.is_tracked(asset_key) {
                    return Err(DomainError::InvariantViolation(format!(
                        "asset key {asset_key} not monitored by sensor"
                    )));
                }
                self.asset_graph
                    .get(asset_key)
                    .and_then(AssetDefinition::partitions_def)
                    .ok_or_else(|| {
                        DomainError::InvariantViolation(format!(
                            "asset key {asset_key} is not partitioned; cannot check if \
                             partitions have been materialized"
                        ))
                    })?
                    .partition_keys(self.clock.now())
            }
        };

        let counts = self
            .event_log
            .materialization_count_by_partition(std::slice::from_ref(asset_key))
            .await?;
        let by_partition = counts.get(asset_key);
        Ok(partitions.iter().all(|partition| {
            by_partition
                .and_then(|c| c.get(partition))
                .is_some_and(|count| *count > 0)
        }))
    }

    fn any_definition(&self, asset_key: &AssetKey) -> Result<&AssetDefinition, DomainError> {
        self.asset_graph.get(asset_key).ok_or_else(|| {
            DomainError::InvalidRequest(format!(
                "asset key {asset_key} not monitored in sensor and does not exist in the asset graph"
            ))
        })
    }

    /// Maps one partition of `from_asset` onto the partitions of `to_asset`
    /// it feeds, using the downstream asset's partition mapping.
    ///
    /// A mapped range that falls outside the downstream partitions is recorded
    /// as a warning for static partitions and the in-range part is returned;
    /// for time-window partitions it is an error.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidRequest` if either asset is unknown or
    /// unpartitioned, if the mapping rejects the pair, or if a time-window
    /// mapping leaves the downstream partitions.
    pub fn downstream_partition_keys(
        &mut self,
        partition_key: &str,
        from_asset: &AssetKey,
        to_asset: &AssetKey,
    ) -> Result<Vec<String>, DomainError> {
        let now = self.clock.now();
        let to_def = self.any_definition(to_asset)?;
        let from_def = self.any_definition(from_asset)?;
        let to_partitions = to_def.partitions_def().ok_or_else(|| {
            DomainError::InvalidRequest(format!(
                "asset key {to_asset} is not partitioned; cannot get partition keys"
            ))
        })?;
        let from_partitions = from_def.partitions_def().ok_or_else(|| {
            DomainError::InvalidRequest(format!(
                "asset key {from_asset} is not partitioned; cannot get partition keys"
            ))
        })?;

        let mapping = to_def.partition_mapping_for(from_def);
        let range = mapping.downstream_range_for_partition(
            partition_key,
            from_partitions,
            to_partitions,
            now,
        )?;

        let keys = to_partitions.partition_keys(now);
        let start = keys.iter().position(|k| *k == range.start);
        let end = keys.iter().position(|k| *k == range.end);
        if let (Some(start), Some(end)) = (start, end) {
            return Ok(if start <= end {
                keys[start..=end].to_vec()
            } else {
                Vec::new()
            });
        }

        let message = format!(
            "mapped partition key {partition_key} to downstream partition key range [{}...{}] \
             which is not a valid range in the downstream partitions definition",
            range.start, range.end
        );
        if to_partitions.is_time_window() {
            return Err(DomainError::InvalidRequest(message));
        }

        warn!(
            mapping = mapping.name(),
            from_asset = %from_asset,
            to_asset = %to_asset,
            "{message}"
        );
        self.warnings.push(message);
        Ok(match (start, end) {
            (Some(start), None) => keys[start..].to_vec(),
            (None, Some(end)) => keys[..=end].to_vec(),
            _ => Vec::new(),
        })
    }

    /// Marks records as consumed. `None` values leave their asset untouched.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidRequest` if any key is not tracked.
    pub fn advance_cursor(
        &mut self,
        records: &BTreeMap<AssetKey, Option<EventRecord>>,
    ) -> Result<(), DomainError> {
        if let Some(untracked) = records.keys().find(|key| !self.is_tracked(key)) {
            return Err(DomainError::InvalidRequest(format!(
                "cannot advance cursor for asset {untracked}, which is not monitored by sensor {}",
                self.base.sensor_name()
            )));
        }
        self.advances.add_advanced_records(records);
        self.cursor_has_been_updated = true;
        Ok(())
    }

    /// Advances every tracked asset to its newest materialization and clears
    /// all trailing unconsumed records.
    ///
    /// # Errors
    ///
    /// Returns any error from the event log.
    pub async fn advance_all_cursors(&mut self) -> Result<(), DomainError> {
        let latest = self.latest_materialization_per_key(None).await?;
        self.advances.add_advanced_records(&latest);
        self.advances.mark_advance_all();
        self.cursor_has_been_updated = true;
        Ok(())
    }

    /// Folds this tick's advances into the next cursor. When nothing was
    /// advanced the cursor string is left exactly as it was.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvariantViolation` if called twice in one tick,
    /// `DomainError::UnconsumedBacklogFull` if an asset's backlog is full, or
    /// any error from the event log.
    pub async fn update_cursor_after_evaluation(&mut self) -> Result<(), DomainError> {
        if self.cursor_finalized {
            return Err(DomainError::InvariantViolation(
                "the cursor was already updated after evaluation in this tick".to_owned(),
            ));
        }
        self.cursor_finalized = true;

        let advances = std::mem::take(&mut self.advances);
        if advances.is_empty() {
            debug!(sensor = self.base.sensor_name(), "no cursor advances; keeping prior cursor");
            return Ok(());
        }

        let mut next = TickCursorMap::new();
        for asset_key in self.asset_keys.clone() {
            let initial = self.cursor_component(&asset_key);
            let trailing = if advances.advanced_ids(&asset_key).is_some() && !advances.advance_all_called() {
                self.trailing_unconsumed_events(&asset_key).await?
            } else {
                Vec::new()
            };
            let component = advances
                .asset_cursor_with_advances(&asset_key, &initial, &trailing, self.event_log.as_ref())
                .await?;
            next.insert(asset_key.to_user_string(), component);
        }

        self.base.update_cursor(Some(encode_cursor(&next)?));
        self.initial_cursor = next;
        self.initial_unconsumed_events = None;
        Ok(())
    }
}
