//! Built-in multi-asset sensors selectable from the repository file.

use std::collections::BTreeMap;

use assetwatch_core::asset::AssetKey;
use assetwatch_core::error::DomainError;
use assetwatch_core::event::EventRecord;
use assetwatch_sensor::application::multi_asset_context::MultiAssetSensorContext;
use assetwatch_sensor::application::registry::MultiAssetSensorEvaluation;
use assetwatch_sensor::domain::run_request::{RunRequest, SensorOutput};
use async_trait::async_trait;
use tracing::debug;

/// Tag listing the assets that triggered a run.
pub const ASSETS_TAG: &str = "assetwatch/assets";

/// Requests one run whenever any tracked asset has a new materialization,
/// then consumes every newest materialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatestMaterializationSensor;

#[async_trait]
impl MultiAssetSensorEvaluation for LatestMaterializationSensor {
    async fn evaluate(
        &self,
        context: &mut MultiAssetSensorContext,
    ) -> Result<SensorOutput, DomainError> {
        let latest = context.latest_materialization_per_key(None).await?;
        let updated: Vec<(&AssetKey, &EventRecord)> = latest
            .iter()
            .filter_map(|(key, record)| record.as_ref().map(|r| (key, r)))
            .collect();
        if updated.is_empty() {
            return Ok(SensorOutput::skip("no new materializations"));
        }

        let run_key = updated
            .iter()
            .map(|(_, record)| record.storage_id.to_string())
            .collect::<Vec<_>>()
            .join("-");
        let assets = updated
            .iter()
            .map(|(key, _)| key.to_user_string())
            .collect::<Vec<_>>()
            .join(",");
        let request = RunRequest::new()
            .with_run_key(run_key)
            .with_tag(ASSETS_TAG, assets);

        context.advance_cursor(&latest)?;
        Ok(request.into())
    }
}

/// Requests one run per partition once every tracked asset has materialized
/// it, consuming the records used. Partitions still missing an asset stay
/// unconsumed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionRollupSensor;

#[async_trait]
impl MultiAssetSensorEvaluation for PartitionRollupSensor {
    async fn evaluate(
        &self,
        context: &mut MultiAssetSensorContext,
    ) -> Result<SensorOutput, DomainError> {
        let tracked = context.asset_keys().len();
        let by_partition = context.latest_materialization_per_partition_and_asset().await?;

        let mut requests = Vec::new();
        for (partition, records) in by_partition {
            if records.len() < tracked {
                debug!(partition = %partition, ready = records.len(), tracked, "partition incomplete");
                continue;
            }
            let newest = records.values().map(|r| r.storage_id).max().unwrap_or_default();
            requests.push(
                RunRequest::new()
                    .with_run_key(format!("{partition}:{newest}"))
                    .with_partition_key(partition),
            );
            let consumed: BTreeMap<AssetKey, Option<EventRecord>> = records
                .into_iter()
                .map(|(key, record)| (key, Some(record)))
                .collect();
            context.advance_cursor(&consumed)?;
        }

        if requests.is_empty() {
            return Ok(SensorOutput::skip("no partition materialized by every asset"));
        }
        Ok(SensorOutput::runs(requests))
    }
}
