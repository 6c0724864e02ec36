//! Cursor advance accumulator.
//!
//! Advance requests made during a tick are only recorded. Once the evaluation
//! returns they are folded, per asset, into the cursor component the tick
//! started with.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use assetwatch_core::asset::AssetKey;
use assetwatch_core::error::DomainError;
use assetwatch_core::event::EventRecord;
use assetwatch_core::event_log::{EventLogStore, EventRecordsFilter, SortOrder};
use tracing::debug;

use crate::domain::cursor::{AssetCursorComponent, MAX_NUM_UNCONSUMED_EVENTS};

/// Advance requests collected during one tick.
#[derive(Debug, Clone, Default)]
pub struct CursorAdvances {
    advanced_ids_by_key: BTreeMap<AssetKey, BTreeSet<i64>>,
    partition_by_id: HashMap<i64, Option<String>>,
    advance_all_called: bool,
}

impl CursorAdvances {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records records as consumed. `None` entries are ignored.
    pub fn add_advanced_records<'a, I>(&mut self, records: I)
    where
        I: IntoIterator<Item = (&'a AssetKey, &'a Option<EventRecord>)>,
    {
        for (asset_key, record) in records {
            let Some(record) = record else { continue };
            self.advanced_ids_by_key
                .entry(asset_key.clone())
                .or_default()
                .insert(record.storage_id);
            self.partition_by_id
                .insert(record.storage_id, record.partition.clone());
        }
    }

    /// Clears every trailing unconsumed entry when the advances are applied.
    pub fn mark_advance_all(&mut self) {
        self.advance_all_called = true;
    }

    /// Returns `true` once `mark_advance_all` has been called.
    #[must_use]
    pub fn advance_all_called(&self) -> bool {
        self.advance_all_called
    }

    /// Returns `true` if no record was advanced for any asset and
    /// `mark_advance_all` was never called.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.advanced_ids_by_key.is_empty() && !self.advance_all_called
    }

    /// Storage ids advanced for `asset_key`.
    #[must_use]
    pub fn advanced_ids(&self, asset_key: &AssetKey) -> Option<&BTreeSet<i64>> {
        self.advanced_ids_by_key.get(asset_key)
    }

    /// Computes the next cursor component for one asset.
    ///
    /// `trailing_events` are the records behind `initial`'s trailing
    /// unconsumed ids. Events between the prior consumed id and the newest
    /// advanced id are fetched from `event_log`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnconsumedBacklogFull` if the asset would be left
    /// with [`MAX_NUM_UNCONSUMED_EVENTS`] or more trailing unconsumed
    /// partitions, or any error from the event log.
    pub async fn asset_cursor_with_advances(
        &self,
        asset_key: &AssetKey,
        initial: &AssetCursorComponent,
        trailing_events: &[EventRecord],
        event_log: &dyn EventLogStore,
    ) -> Result<AssetCursorComponent, DomainError> {
        let Some((advanced_ids, max_advanced_id)) = self
            .advanced_ids_by_key
            .get(asset_key)
            .and_then(|ids| ids.last().map(|&max| (ids, max)))
        else {
            let mut unchanged = initial.clone();
            if self.advance_all_called {
                unchanged.trailing_unconsumed_ids.clear();
            }
            return Ok(unchanged);
        };

        let max_advanced_partition = self
            .partition_by_id
            .get(&max_advanced_id)
            .cloned()
            .flatten();
        let prior_consumed_id = initial.latest_consumed_event_id;
        let advances_pointer = max_advanced_id > prior_consumed_id.unwrap_or(0);

        let mut trailing = BTreeMap::new();
        if !self.advance_all_called {
            trailing.clone_from(&initial.trailing_unconsumed_ids);

            let fresh = if advances_pointer {
                event_log
                    .event_records(
                        &EventRecordsFilter::materializations()
                            .for_asset(asset_key.clone())
                            .after(prior_consumed_id)
                            .before(max_advanced_id),
                        SortOrder::Ascending,
                        None,
                    )
                    .await?
            } else {
                Vec::new()
            };

            for event in trailing_events.iter().chain(fresh.iter()) {
                let Some(partition) = &event.partition else {
                    continue;
                };
                if advanced_ids.contains(&event.storage_id) {
                    trailing.remove(partition);
                } else {
                    trailing.insert(partition.clone(), event.storage_id);
                }
            }

            if let Some(partition) = &max_advanced_partition {
                trailing.remove(partition);
            }

            if trailing.len() >= MAX_NUM_UNCONSUMED_EVENTS {
                return Err(DomainError::UnconsumedBacklogFull {
                    asset_key: asset_key.to_user_string(),
                    limit: MAX_NUM_UNCONSUMED_EVENTS,
                });
            }
        }

        let next = if advances_pointer {
            AssetCursorComponent {
                latest_consumed_partition: max_advanced_partition,
                latest_consumed_event_id: Some(max_advanced_id),
                trailing_unconsumed_ids: trailing,
            }
        } else {
            AssetCursorComponent {
                latest_consumed_partition: initial.latest_consumed_partition.clone(),
                latest_consumed_event_id: prior_consumed_id,
                trailing_unconsumed_ids: trailing,
            }
        };

        debug!(
            asset_key = %asset_key,
            latest_consumed_event_id = ?next.latest_consumed_event_id,
            trailing_unconsumed = next.trailing_unconsumed_ids.len(),
            "advanced asset cursor"
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetwatch_test_support::{FailingEventLog, InMemoryEventLog};

    fn advances_for(key: &AssetKey, records: &[&EventRecord]) -> CursorAdvances {
        let mut advances = CursorAdvances::new();
        for record in records {
            let entry = BTreeMap::from([(key.clone(), Some((*record).clone()))]);
            advances.add_advanced_records(&entry);
        }
        advances
    }

    #[tokio::test]
    async fn test_first_advance_sets_consumed_pointer() {
        let log = InMemoryEventLog::new();
        let key = AssetKey::from("a");
        let event = log.materialize_with_id(5, "a", Some("p1"));
        let advances = advances_for(&key, &[&event]);

        let next = advances
            .asset_cursor_with_advances(&key, &AssetCursorComponent::default(), &[], &log)
            .await
            .unwrap();

        assert_eq!(next.latest_consumed_event_id, Some(5));
        assert_eq!(next.latest_consumed_partition.as_deref(), Some("p1"));
        assert!(!next.trailing_unconsumed_ids.contains_key("p1"));
    }

    #[tokio::test]
    async fn test_superseded_and_skipped_partitions() {
        let log = InMemoryEventLog::new();
        let key = AssetKey::from("a");
        log.materialize_with_id(10, "a", Some("p1"));
        log.materialize_with_id(12, "a", Some("p2"));
        let latest = log.materialize_with_id(15, "a", Some("p1"));
        let initial = AssetCursorComponent {
            latest_consumed_event_id: Some(9),
            ..AssetCursorComponent::default()
        };
        let advances = advances_for(&key, &[&latest]);

        let next = advances
            .asset_cursor_with_advances(&key, &initial, &[], &log)
            .await
            .unwrap();

        assert_eq!(next.latest_consumed_event_id, Some(15));
        assert_eq!(next.latest_consumed_partition.as_deref(), Some("p1"));
        assert_eq!(
            next.trailing_unconsumed_ids,
            BTreeMap::from([("p2".to_owned(), 12)])
        );
    }

    #[tokio::test]
    async fn test_consuming_trailing_event_removes_it() {
        let log = InMemoryEventLog::new();
        let key = AssetKey::from("a");
        let trailing = log.materialize_with_id(3, "a", Some("p0"));
        let initial = AssetCursorComponent {
            latest_consumed_partition: Some("p1".to_owned()),
            latest_consumed_event_id: Some(8),
            trailing_unconsumed_ids: BTreeMap::from([("p0".to_owned(), 3)]),
        };
        let advances = advances_for(&key, &[&trailing]);

        let next = advances
            .asset_cursor_with_advances(&key, &initial, std::slice::from_ref(&trailing), &log)
            .await
            .unwrap();

        assert_eq!(next.latest_consumed_event_id, Some(8));
        assert_eq!(next.latest_consumed_partition.as_deref(), Some("p1"));
        assert!(next.trailing_unconsumed_ids.is_empty());
        assert_eq!(log.query_count(), 0);
    }

    #[tokio::test]
    async fn test_unpartitioned_events_never_trail() {
        let log = InMemoryEventLog::new();
        let key = AssetKey::from("a");
        log.materialize_with_id(1, "a", None);
        let latest = log.materialize_with_id(2, "a", None);
        let advances = advances_for(&key, &[&latest]);

        let next = advances
            .asset_cursor_with_advances(&key, &AssetCursorComponent::default(), &[], &log)
            .await
            .unwrap();

        assert_eq!(next.latest_consumed_event_id, Some(2));
        assert_eq!(next.latest_consumed_partition, None);
        assert!(next.trailing_unconsumed_ids.is_empty());
    }

    #[tokio::test]
    async fn test_backlog_cap_is_fatal() {
        let log = InMemoryEventLog::new();
        let key = AssetKey::from("a");
        let mut initial = AssetCursorComponent {
            latest_consumed_partition: Some("x".to_owned()),
            latest_consumed_event_id: Some(30),
            trailing_unconsumed_ids: BTreeMap::new(),
        };
        for id in 1..=24 {
            initial.trailing_unconsumed_ids.insert(format!("p{id}"), id);
        }
        log.materialize_with_id(30, "a", Some("x"));
        log.materialize_with_id(35, "a", Some("p25"));
        let latest = log.materialize_with_id(40, "a", Some("z"));
        let advances = advances_for(&key, &[&latest]);

        let result = advances
            .asset_cursor_with_advances(&key, &initial, &[], &log)
            .await;

        let err = result.unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(matches!(
            err,
            DomainError::UnconsumedBacklogFull { limit: 25, .. }
        ));
    }

    #[tokio::test]
    async fn test_advance_all_clears_backlog_without_querying() {
        let log = InMemoryEventLog::new();
        let key = AssetKey::from("a");
        let latest = log.materialize_with_id(50, "a", Some("q"));
        let mut initial = AssetCursorComponent {
            latest_consumed_event_id: Some(30),
            ..AssetCursorComponent::default()
        };
        for id in 1..=24 {
            initial.trailing_unconsumed_ids.insert(format!("p{id}"), id);
        }
        let mut advances = advances_for(&key, &[&latest]);
        advances.mark_advance_all();

        let next = advances
            .asset_cursor_with_advances(&key, &initial, &[], &log)
            .await
            .unwrap();

        assert!(next.trailing_unconsumed_ids.is_empty());
        assert_eq!(next.latest_consumed_event_id, Some(50));
        assert_eq!(log.query_count(), 0);
    }

    #[tokio::test]
    async fn test_advance_all_clears_backlog_of_asset_with_nothing_new() {
        let key = AssetKey::from("a");
        let initial = AssetCursorComponent {
            latest_consumed_partition: Some("p".to_owned()),
            latest_consumed_event_id: Some(4),
            trailing_unconsumed_ids: BTreeMap::from([("o".to_owned(), 2)]),
        };
        let mut advances = CursorAdvances::new();
        advances.mark_advance_all();

        let next = advances
            .asset_cursor_with_advances(&key, &initial, &[], &FailingEventLog)
            .await
            .unwrap();

        assert!(!advances.is_empty());
        assert_eq!(next.latest_consumed_event_id, Some(4));
        assert!(next.trailing_unconsumed_ids.is_empty());
    }

    #[tokio::test]
    async fn test_key_without_advances_keeps_initial_component() {
        let key = AssetKey::from("a");
        let initial = AssetCursorComponent {
            latest_consumed_partition: Some("p".to_owned()),
            latest_consumed_event_id: Some(4),
            trailing_unconsumed_ids: BTreeMap::from([("o".to_owned(), 2)]),
        };

        let next = CursorAdvances::new()
            .asset_cursor_with_advances(&key, &initial, &[], &FailingEventLog)
            .await
            .unwrap();

        assert_eq!(next, initial);
    }

    #[test]
    fn test_none_records_are_not_advances() {
        let mut advances = CursorAdvances::new();
        let records: BTreeMap<AssetKey, Option<EventRecord>> =
            BTreeMap::from([(AssetKey::from("a"), None)]);

        advances.add_advanced_records(&records);

        assert!(advances.is_empty());
    }
}
