//! Repository configuration loaded from YAML.
//!
//! ```yaml
//! name: warehouse
//! assets:
//!   - key: raw/orders
//!     group: raw
//!     partitions: { type: static, keys: [eu, us] }
//!   - key: orders_summary
//!     partitions: { type: static, keys: [eu, us] }
//!     partition_mappings: { raw/orders: identity }
//! sensors:
//!   - name: orders_rollup
//!     kind: partition_rollup
//!     job: summarize
//!     assets: [raw/orders]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use assetwatch_core::asset::{AssetDefinition, AssetGraph, AssetKey, AssetSelection};
use assetwatch_core::error::DomainError;
use assetwatch_core::partition::{
    Cadence, PartitionsDefinition, StaticPartitionsDefinition, TimeWindowPartitionsDefinition,
};
use assetwatch_core::partition_mapping::{
    AllPartitionMapping, IdentityPartitionMapping, LastPartitionMapping, PartitionMapping,
    TimeWindowPartitionMapping,
};
use assetwatch_sensor::application::registry::{
    EvaluationFn, MultiAssetSensorEvaluation, Sensor, SensorRepository,
};
use assetwatch_sensor::domain::definition::{DefaultSensorStatus, SensorDefinition};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::error::AppError;
use crate::sensors::{LatestMaterializationSensor, PartitionRollupSensor};

/// Top-level repository file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Repository name.
    pub name: String,
    /// Asset definitions.
    #[serde(default)]
    pub assets: Vec<AssetConfig>,
    /// Sensor definitions.
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

/// One asset.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetConfig {
    /// `/`-joined asset key.
    pub key: String,
    /// Optional group used by group selections.
    #[serde(default)]
    pub group: Option<String>,
    /// Optional partitioning.
    #[serde(default)]
    pub partitions: Option<PartitionsConfig>,
    /// Overrides of the default mapping, keyed by upstream asset key.
    #[serde(default)]
    pub partition_mappings: BTreeMap<String, PartitionMappingKind>,
}

/// How an asset is partitioned.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionsConfig {
    /// An explicit key list.
    Static {
        /// Partition keys in order.
        keys: Vec<String>,
    },
    /// Consecutive time windows.
    TimeWindow {
        /// Start of the first window.
        start: DateTime<Utc>,
        /// Window length.
        cadence: Cadence,
        /// Key format; defaults per cadence.
        #[serde(default)]
        format: Option<String>,
    },
}

/// Named partition mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMappingKind {
    /// Same key downstream.
    Identity,
    /// Every downstream key.
    All,
    /// The last downstream key.
    Last,
    /// Overlapping time windows.
    TimeWindow,
}

/// Built-in sensor logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// One run whenever any watched asset has a new materialization.
    LatestMaterialization,
    /// One run per partition materialized by every watched asset.
    PartitionRollup,
}

/// One sensor.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    /// Sensor name.
    pub name: String,
    /// Built-in logic.
    pub kind: SensorKind,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Minimum seconds between ticks.
    #[serde(default)]
    pub minimum_interval_seconds: Option<u64>,
    /// Status when no stored state exists.
    #[serde(default)]
    pub default_status: DefaultSensorStatus,
    /// Single target job.
    #[serde(default)]
    pub job: Option<String>,
    /// Several target jobs.
    #[serde(default)]
    pub jobs: Option<Vec<String>>,
    /// Watched asset keys.
    #[serde(default)]
    pub assets: Option<Vec<String>>,
    /// Watched asset groups.
    #[serde(default)]
    pub groups: Option<Vec<String>>,
}

impl RepositoryConfig {
    /// Parses a repository file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigFile` if the YAML is malformed.
    pub fn from_yaml(text: &str) -> Result<Self, AppError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Reads and parses the repository file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, or
    /// `AppError::ConfigFile` if it is malformed.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read repository file {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    /// Builds the asset graph and registers every sensor.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidDefinition` for duplicate or unknown
    /// assets, malformed partitions, or invalid sensor definitions.
    pub fn into_repository(self) -> Result<SensorRepository, DomainError> {
        let definitions = self
            .assets
            .into_iter()
            .map(AssetConfig::into_definition)
            .collect::<Result<Vec<_>, _>>()?;
        let graph = AssetGraph::new(definitions)?;
        validate_mapping_targets(&graph)?;

        let repository = self
            .sensors
            .into_iter()
            .try_fold(SensorRepository::new(self.name, graph), |repository, sensor| {
                repository.with_sensor(sensor.into_sensor()?)
            })?;
        info!(
            repository = repository.name(),
            sensors = repository.sensors().count(),
            "loaded sensor repository"
        );
        Ok(repository)
    }
}

fn validate_mapping_targets(graph: &AssetGraph) -> Result<(), DomainError> {
    for key in graph.keys() {
        let Some(definition) = graph.get(key) else {
            continue;
        };
        if let Some(upstream) = definition.mapped_upstreams().find(|up| !graph.contains(up)) {
            return Err(DomainError::InvalidDefinition(format!(
                "asset {key} maps partitions from unknown asset {upstream}"
            )));
        }
    }
    Ok(())
}

impl AssetConfig {
    fn into_definition(self) -> Result<AssetDefinition, DomainError> {
        let mut definition = AssetDefinition::new(AssetKey::from_user_string(&self.key));
        if let Some(group) = self.group {
            definition = definition.with_group(group);
        }
        if let Some(partitions) = self.partitions {
            definition = definition.with_partitions(partitions.into_definition()?);
        }
        for (upstream, kind) in self.partition_mappings {
            definition =
                definition.with_partition_mapping(AssetKey::from_user_string(&upstream), kind.into_mapping());
        }
        Ok(definition)
    }
}

impl PartitionsConfig {
    fn into_definition(self) -> Result<PartitionsDefinition, DomainError> {
        Ok(match self {
            Self::Static { keys } => {
                PartitionsDefinition::Static(StaticPartitionsDefinition::new(keys)?)
            }
            Self::TimeWindow {
                start,
                cadence,
                format,
            } => {
                let mut definition = TimeWindowPartitionsDefinition::new(start, cadence);
                if let Some(format) = format {
                    definition = definition.with_format(format)?;
                }
                PartitionsDefinition::TimeWindow(definition)
            }
        })
    }
}

impl PartitionMappingKind {
    fn into_mapping(self) -> Arc<dyn PartitionMapping> {
        match self {
            Self::Identity => Arc::new(IdentityPartitionMapping),
            Self::All => Arc::new(AllPartitionMapping),
            Self::Last => Arc::new(LastPartitionMapping),
            Self::TimeWindow => Arc::new(TimeWindowPartitionMapping),
        }
    }
}

impl SensorConfig {
    fn selection(&self) -> Result<AssetSelection, DomainError> {
        match (&self.assets, &self.groups) {
            (Some(_), Some(_)) => Err(DomainError::InvalidDefinition(format!(
                "sensor {} selects both assets and groups",
                self.name
            ))),
            (Some(assets), None) => Ok(AssetSelection::keys(assets.iter().map(String::as_str))),
            (None, Some(groups)) => Ok(AssetSelection::Groups(groups.clone())),
            (None, None) => Ok(AssetSelection::All),
        }
    }

    fn into_sensor(self) -> Result<Sensor, DomainError> {
        let selection = self.selection()?;
        let mut builder = SensorDefinition::builder(self.name).default_status(self.default_status);
        if let Some(description) = self.description {
            builder = builder.description(description);
        }
        if let Some(seconds) = self.minimum_interval_seconds {
            builder = builder.minimum_interval_seconds(seconds);
        }
        if let Some(job) = self.job {
            builder = builder.job(job);
        }
        if let Some(jobs) = self.jobs {
            builder = builder.jobs(jobs);
        }

        let evaluation: Arc<dyn MultiAssetSensorEvaluation> = match self.kind {
            SensorKind::LatestMaterialization => Arc::new(LatestMaterializationSensor),
            SensorKind::PartitionRollup => Arc::new(PartitionRollupSensor),
        };
        Ok(Sensor::new(
            builder.build()?,
            EvaluationFn::MultiAsset {
                selection,
                evaluation,
            },
        ))
    }
}
