//! Evaluation traits and the repository of registered sensors.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use assetwatch_core::asset::{AssetGraph, AssetKey, AssetSelection};
use assetwatch_core::error::DomainError;
use assetwatch_core::event::EventRecord;
use async_trait::async_trait;

use crate::application::context::SensorContext;
use crate::application::multi_asset_context::MultiAssetSensorContext;
use crate::domain::definition::SensorDefinition;
use crate::domain::run_request::SensorOutput;

/// User logic of a standard sensor. The sensor owns its cursor through
/// [`SensorContext::update_cursor`].
#[async_trait]
pub trait SensorEvaluation: Send + Sync {
    /// Evaluates one tick.
    async fn evaluate(&self, context: &mut SensorContext) -> Result<SensorOutput, DomainError>;
}

/// User logic of a single-asset sensor, called with the newest
/// materialization after the cursor.
#[async_trait]
pub trait AssetSensorEvaluation: Send + Sync {
    /// Evaluates one tick for `materialization`.
    async fn evaluate(
        &self,
        context: &mut SensorContext,
        materialization: &EventRecord,
    ) -> Result<SensorOutput, DomainError>;
}

/// User logic of a multi-asset sensor.
#[async_trait]
pub trait MultiAssetSensorEvaluation: Send + Sync {
    /// Evaluates one tick. Handled materializations must be passed to
    /// `advance_cursor` or `advance_all_cursors`.
    async fn evaluate(
        &self,
        context: &mut MultiAssetSensorContext,
    ) -> Result<SensorOutput, DomainError>;
}

/// How a sensor is evaluated.
#[derive(Clone)]
pub enum EvaluationFn {
    /// Logic that takes no context.
    WithoutContext(Arc<dyn Fn() -> SensorOutput + Send + Sync>),
    /// Logic that manages its own cursor.
    Standard(Arc<dyn SensorEvaluation>),
    /// Logic fed the newest materialization of one asset.
    Asset {
        /// The watched asset.
        asset_key: AssetKey,
        /// The user logic.
        evaluation: Arc<dyn AssetSensorEvaluation>,
    },
    /// Logic tracking consumption across a selection of assets.
    MultiAsset {
        /// The watched assets.
        selection: AssetSelection,
        /// The user logic.
        evaluation: Arc<dyn MultiAssetSensorEvaluation>,
    },
}

impl EvaluationFn {
    /// Short name of the sensor kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WithoutContext(_) | Self::Standard(_) => "standard",
            Self::Asset { .. } => "asset",
            Self::MultiAsset { .. } => "multi_asset",
        }
    }
}

impl fmt::Debug for EvaluationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WithoutContext(_) => f.write_str("WithoutContext"),
            Self::Standard(_) => f.write_str("Standard"),
            Self::Asset { asset_key, .. } => {
                f.debug_struct("Asset").field("asset_key", asset_key).finish_non_exhaustive()
            }
            Self::MultiAsset { selection, .. } => f
                .debug_struct("MultiAsset")
                .field("selection", selection)
                .finish_non_exhaustive(),
        }
    }
}

/// A sensor definition bound to its evaluation logic.
#[derive(Debug, Clone)]
pub struct Sensor {
    definition: SensorDefinition,
    evaluation: EvaluationFn,
}

impl Sensor {
    /// Binds `evaluation` to `definition`.
    #[must_use]
    pub fn new(definition: SensorDefinition, evaluation: EvaluationFn) -> Self {
        Self {
            definition,
            evaluation,
        }
    }

    /// The sensor's metadata.
    #[must_use]
    pub fn definition(&self) -> &SensorDefinition {
        &self.definition
    }

    /// The sensor's evaluation logic.
    #[must_use]
    pub fn evaluation(&self) -> &EvaluationFn {
        &self.evaluation
    }

    /// Assets this sensor watches, resolved against `asset_graph`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidDefinition` if a multi-asset selection
    /// does not resolve.
    pub fn monitored_assets(&self, asset_graph: &AssetGraph) -> Result<Vec<AssetKey>, DomainError> {
        match &self.evaluation {
            EvaluationFn::WithoutContext(_) | EvaluationFn::Standard(_) => Ok(Vec::new()),
            EvaluationFn::Asset { asset_key, .. } => Ok(vec![asset_key.clone()]),
            EvaluationFn::MultiAsset { selection, .. } => asset_graph.resolve(selection),
        }
    }
}

/// Every sensor of one repository together with its asset graph.
#[derive(Debug, Clone)]
pub struct SensorRepository {
    name: String,
    asset_graph: Arc<AssetGraph>,
    sensors: BTreeMap<String, Arc<Sensor>>,
}

impl SensorRepository {
    /// Creates an empty repository over `asset_graph`.
    #[must_use]
    pub fn new(name: impl Into<String>, asset_graph: AssetGraph) -> Self {
        Self {
            name: name.into(),
            asset_graph: Arc::new(asset_graph),
            sensors: BTreeMap::new(),
        }
    }

    /// Registers a sensor.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidDefinition` if the name is taken or if a
    /// multi-asset selection does not resolve against the asset graph.
    pub fn with_sensor(mut self, sensor: Sensor) -> Result<Self, DomainError> {
        sensor.monitored_assets(&self.asset_graph)?;
        let name = sensor.definition().name().to_owned();
        if self.sensors.contains_key(&name) {
            return Err(DomainError::InvalidDefinition(format!(
                "sensor {name} is defined more than once in repository {}",
                self.name
            )));
        }
        self.sensors.insert(name, Arc::new(sensor));
        Ok(self)
    }

    /// The repository name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared asset graph.
    #[must_use]
    pub fn asset_graph(&self) -> &Arc<AssetGraph> {
        &self.asset_graph
    }

    /// Looks up a sensor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Sensor>> {
        self.sensors.get(name)
    }

    /// All sensors, ordered by name.
    pub fn sensors(&self) -> impl Iterator<Item = &Arc<Sensor>> {
        self.sensors.values()
    }
}
