//! `PostgreSQL` implementation of the `EventLogStore` trait.

use std::collections::HashMap;

use assetwatch_core::asset::AssetKey;
use assetwatch_core::error::DomainError;
use assetwatch_core::event::{EventKind, EventRecord};
use assetwatch_core::event_log::{EventLogStore, EventRecordsFilter, SortOrder};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;
use uuid::Uuid;

use crate::schema::CREATE_EVENT_RECORDS_TABLE;

const SELECT_COLUMNS: &str = "SELECT storage_id, event_kind, asset_key, partition_key, run_id, \
                              payload, occurred_at FROM asset_event_records WHERE event_kind = ";

/// An event to append; the store assigns the storage id and timestamp.
#[derive(Debug, Clone)]
pub struct NewEventRecord {
    /// Kind of event.
    pub kind: EventKind,
    /// The asset the event is about.
    pub asset_key: AssetKey,
    /// The partition, for partitioned assets.
    pub partition: Option<String>,
    /// The producing run, if any.
    pub run_id: Option<Uuid>,
    /// Event metadata.
    pub payload: serde_json::Value,
}

/// PostgreSQL-backed asset event log.
#[derive(Debug, Clone)]
pub struct PgEventLog {
    pool: PgPool,
}

fn infrastructure(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("event log query failed: {err}"))
}

fn decode_record(row: &PgRow) -> Result<EventRecord, DomainError> {
    let kind: String = row.try_get("event_kind").map_err(infrastructure)?;
    let asset_key: String = row.try_get("asset_key").map_err(infrastructure)?;
    Ok(EventRecord {
        storage_id: row.try_get("storage_id").map_err(infrastructure)?,
        kind: kind.parse()?,
        asset_key: AssetKey::from_user_string(&asset_key),
        partition: row.try_get("partition_key").map_err(infrastructure)?,
        run_id: row.try_get("run_id").map_err(infrastructure)?,
        payload: row.try_get("payload").map_err(infrastructure)?,
        occurred_at: row.try_get("occurred_at").map_err(infrastructure)?,
    })
}

impl PgEventLog {
    /// Creates a new `PgEventLog`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the event records table and indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), DomainError> {
        sqlx::raw_sql(CREATE_EVENT_RECORDS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(infrastructure)?;
        Ok(())
    }

    /// Appends one event and returns it with its assigned storage id.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the insert fails.
    pub async fn append(&self, event: NewEventRecord) -> Result<EventRecord, DomainError> {
        let row = sqlx::query(
            "INSERT INTO asset_event_records (event_kind, asset_key, partition_key, run_id, payload) \
             VALUES ($1, $2, $3, $4, $5) RETURNING storage_id, occurred_at",
        )
        .bind(event.kind.as_str())
        .bind(event.asset_key.to_user_string())
        .bind(event.partition.as_deref())
        .bind(event.run_id)
        .bind(&event.payload)
        .fetch_one(&self.pool)
        .await
        .map_err(infrastructure)?;

        let storage_id: i64 = row.try_get("storage_id").map_err(infrastructure)?;
        let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(infrastructure)?;
        debug!(storage_id, asset_key = %event.asset_key, "appended event record");

        Ok(EventRecord {
            storage_id,
            kind: event.kind,
            asset_key: event.asset_key,
            partition: event.partition,
            run_id: event.run_id,
            payload: event.payload,
            occurred_at,
        })
    }
}

#[async_trait]
impl EventLogStore for PgEventLog {
    async fn event_records(
        &self,
        filter: &EventRecordsFilter,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let mut query = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        query.push_bind(filter.kind.as_str());

        if let Some(asset_key) = &filter.asset_key {
            query
                .push(" AND asset_key = ")
                .push_bind(asset_key.to_user_string());
        }
        if let Some(after) = filter.after_storage_id {
            query.push(" AND storage_id > ").push_bind(after);
        }
        if let Some(before) = filter.before_storage_id {
            query.push(" AND storage_id < ").push_bind(before);
        }
        if let Some(partitions) = &filter.partitions {
            query
                .push(" AND partition_key = ANY(")
                .push_bind(partitions.clone())
                .push(")");
        }
        if let Some(storage_ids) = &filter.storage_ids {
            query
                .push(" AND storage_id = ANY(")
                .push_bind(storage_ids.clone())
                .push(")");
        }

        query.push(match order {
            SortOrder::Ascending => " ORDER BY storage_id ASC",
            SortOrder::Descending => " ORDER BY storage_id DESC",
        });
        if let Some(limit) = limit {
            query
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(infrastructure)?;
        rows.iter().map(decode_record).collect()
    }

    async fn materialization_count_by_partition(
        &self,
        asset_keys: &[AssetKey],
    ) -> Result<HashMap<AssetKey, HashMap<String, i64>>, DomainError> {
        let key_strings: Vec<String> = asset_keys.iter().map(AssetKey::to_user_string).collect();
        let rows = sqlx::query(
            "SELECT asset_key, partition_key, COUNT(*) AS materializations \
             FROM asset_event_records \
             WHERE event_kind = $1 AND asset_key = ANY($2) AND partition_key IS NOT NULL \
             GROUP BY asset_key, partition_key",
        )
        .bind(EventKind::AssetMaterialization.as_str())
        .bind(&key_strings)
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        let mut counts: HashMap<AssetKey, HashMap<String, i64>> = asset_keys
            .iter()
            .map(|key| (key.clone(), HashMap::new()))
            .collect();
        for row in &rows {
            let asset_key: String = row.try_get("asset_key").map_err(infrastructure)?;
            let partition: String = row.try_get("partition_key").map_err(infrastructure)?;
            let count: i64 = row.try_get("materializations").map_err(infrastructure)?;
            counts
                .entry(AssetKey::from_user_string(&asset_key))
                .or_default()
                .insert(partition, count);
        }
        Ok(counts)
    }
}
