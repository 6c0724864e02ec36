//! Partition mappings between an upstream and a downstream asset.

use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::DomainError;
use crate::partition::{PartitionKeyRange, PartitionsDefinition};

/// Translates one upstream partition key into the range of downstream
/// partition keys that depend on it.
///
/// Implementations may return a range whose endpoints are not valid
/// downstream keys; callers decide how to treat such a range.
pub trait PartitionMapping: Send + Sync + Debug {
    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Maps `upstream_key` to a downstream key range.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidRequest` if the mapping cannot be applied
    /// to the given pair of partitions definitions.
    fn downstream_range_for_partition(
        &self,
        upstream_key: &str,
        upstream: &PartitionsDefinition,
        downstream: &PartitionsDefinition,
        now: DateTime<Utc>,
    ) -> Result<PartitionKeyRange, DomainError>;
}

/// Each upstream key maps to the identical downstream key.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPartitionMapping;

impl PartitionMapping for IdentityPartitionMapping {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn downstream_range_for_partition(
        &self,
        upstream_key: &str,
        _upstream: &PartitionsDefinition,
        _downstream: &PartitionsDefinition,
        _now: DateTime<Utc>,
    ) -> Result<PartitionKeyRange, DomainError> {
        Ok(PartitionKeyRange::single(upstream_key))
    }
}

/// Every upstream key maps to every downstream key.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllPartitionMapping;

impl PartitionMapping for AllPartitionMapping {
    fn name(&self) -> &'static str {
        "all"
    }

    fn downstream_range_for_partition(
        &self,
        _upstream_key: &str,
        _upstream: &PartitionsDefinition,
        downstream: &PartitionsDefinition,
        now: DateTime<Utc>,
    ) -> Result<PartitionKeyRange, DomainError> {
        let keys = downstream.partition_keys(now);
        match (keys.first(), keys.last()) {
            (Some(first), Some(last)) => Ok(PartitionKeyRange::new(first.clone(), last.clone())),
            _ => Err(DomainError::InvalidRequest(
                "downstream partitions definition has no partitions".to_owned(),
            )),
        }
    }
}

/// Every upstream key maps to the newest downstream key.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastPartitionMapping;

impl PartitionMapping for LastPartitionMapping {
    fn name(&self) -> &'static str {
        "last"
    }

    fn downstream_range_for_partition(
        &self,
        _upstream_key: &str,
        _upstream: &PartitionsDefinition,
        downstream: &PartitionsDefinition,
        now: DateTime<Utc>,
    ) -> Result<PartitionKeyRange, DomainError> {
        downstream
            .partition_keys(now)
            .pop()
            .map(PartitionKeyRange::single)
            .ok_or_else(|| {
                DomainError::InvalidRequest(
                    "downstream partitions definition has no partitions".to_owned(),
                )
            })
    }
}

/// Maps an upstream time window onto every downstream window it overlaps.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeWindowPartitionMapping;

impl PartitionMapping for TimeWindowPartitionMapping {
    fn name(&self) -> &'static str {
        "time_window"
    }

    fn downstream_range_for_partition(
        &self,
        upstream_key: &str,
        upstream: &PartitionsDefinition,
        downstream: &PartitionsDefinition,
        _now: DateTime<Utc>,
    ) -> Result<PartitionKeyRange, DomainError> {
        let (Some(upstream_def), Some(downstream_def)) =
            (upstream.as_time_window(), downstream.as_time_window())
        else {
            return Err(DomainError::InvalidRequest(
                "time window partition mapping requires time window partitions on both assets"
                    .to_owned(),
            ));
        };

        let window = upstream_def.time_window_for_key(upstream_key).ok_or_else(|| {
            DomainError::InvalidRequest(format!(
                "{upstream_key} is not a valid upstream time window partition key"
            ))
        })?;
        let last_instant = window.end - TimeDelta::nanoseconds(1);

        match (
            downstream_def.key_for_time(window.start),
            downstream_def.key_for_time(last_instant),
        ) {
            (Some(start), Some(end)) => Ok(PartitionKeyRange::new(start, end)),
            _ => Err(DomainError::InvalidRequest(format!(
                "cannot map time window of {upstream_key} onto downstream partitions"
            ))),
        }
    }
}

/// The mapping used when a downstream asset registers none for an upstream.
#[must_use]
pub fn default_partition_mapping(
    upstream: Option<&PartitionsDefinition>,
    downstream: Option<&PartitionsDefinition>,
) -> Arc<dyn PartitionMapping> {
    match (upstream, downstream) {
        (Some(up), Some(down)) if up.is_time_window() && down.is_time_window() => {
            Arc::new(TimeWindowPartitionMapping)
        }
        _ => Arc::new(IdentityPartitionMapping),
    }
}
