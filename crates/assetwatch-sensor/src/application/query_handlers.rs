//! Query handlers for the sensor evaluation context.

use assetwatch_core::error::DomainError;
use serde::Serialize;

use crate::application::registry::{Sensor, SensorRepository};
use crate::domain::definition::DefaultSensorStatus;

/// Read model of a registered sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorView {
    /// Sensor name.
    pub name: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// `standard`, `asset` or `multi_asset`.
    pub kind: &'static str,
    /// Minimum seconds between ticks.
    pub minimum_interval_seconds: u64,
    /// Status when no stored state exists.
    pub default_status: DefaultSensorStatus,
    /// Target job names.
    pub targets: Vec<String>,
    /// User strings of the watched assets.
    pub monitored_assets: Vec<String>,
}

fn to_view(sensor: &Sensor, repository: &SensorRepository) -> Result<SensorView, DomainError> {
    let definition = sensor.definition();
    let monitored_assets = sensor
        .monitored_assets(repository.asset_graph())?
        .iter()
        .map(|key| key.to_user_string())
        .collect();
    Ok(SensorView {
        name: definition.name().to_owned(),
        description: definition.description().map(str::to_owned),
        kind: sensor.evaluation().kind(),
        minimum_interval_seconds: definition.minimum_interval_seconds(),
        default_status: definition.default_status(),
        targets: definition.targets().to_vec(),
        monitored_assets,
    })
}

/// Lists every sensor in `repository`, ordered by name.
///
/// # Errors
///
/// Returns `DomainError::InvalidDefinition` if a sensor's selection no longer
/// resolves.
pub fn list_sensors(repository: &SensorRepository) -> Result<Vec<SensorView>, DomainError> {
    repository
        .sensors()
        .map(|sensor| to_view(sensor, repository))
        .collect()
}

/// Returns the sensor named `name`.
///
/// # Errors
///
/// Returns `DomainError::SensorNotFound` if no such sensor is registered.
pub fn get_sensor(repository: &SensorRepository, name: &str) -> Result<SensorView, DomainError> {
    let sensor = repository
        .get(name)
        .ok_or_else(|| DomainError::SensorNotFound(name.to_owned()))?;
    to_view(sensor, repository)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::application::multi_asset_context::MultiAssetSensorContext;
    use crate::application::registry::{EvaluationFn, MultiAssetSensorEvaluation};
    use crate::domain::definition::SensorDefinition;
    use crate::domain::run_request::SensorOutput;
    use assetwatch_core::asset::{AssetDefinition, AssetGraph, AssetKey, AssetSelection};
    use async_trait::async_trait;

    struct Idle;

    #[async_trait]
    impl MultiAssetSensorEvaluation for Idle {
        async fn evaluate(
            &self,
            _context: &mut MultiAssetSensorContext,
        ) -> Result<SensorOutput, DomainError> {
            Ok(SensorOutput::Nothing)
        }
    }

    fn repository() -> SensorRepository {
        let graph = AssetGraph::new(vec![
            AssetDefinition::new(AssetKey::new(["raw", "orders"])),
            AssetDefinition::new(AssetKey::from("summary")),
        ])
        .unwrap();
        SensorRepository::new("repo", graph)
            .with_sensor(Sensor::new(
                SensorDefinition::builder("orders_sensor")
                    .description("Watches orders")
                    .job("rollup")
                    .build()
                    .unwrap(),
                EvaluationFn::MultiAsset {
                    selection: AssetSelection::keys(["raw/orders", "summary"]),
                    evaluation: Arc::new(Idle),
                },
            ))
            .unwrap()
            .with_sensor(Sensor::new(
                SensorDefinition::builder("heartbeat").build().unwrap(),
                EvaluationFn::WithoutContext(Arc::new(|| SensorOutput::Nothing)),
            ))
            .unwrap()
    }

    #[test]
    fn test_list_sensors_returns_views_by_name() {
        let views = list_sensors(&repository()).unwrap();

        let names: Vec<&str> = views.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["heartbeat", "orders_sensor"]);
        assert_eq!(views[0].kind, "standard");
        assert!(views[0].monitored_assets.is_empty());
    }

    #[test]
    fn test_get_sensor_reports_monitored_assets() {
        let view = get_sensor(&repository(), "orders_sensor").unwrap();

        assert_eq!(view.kind, "multi_asset");
        assert_eq!(view.description.as_deref(), Some("Watches orders"));
        assert_eq!(view.targets, vec!["rollup".to_owned()]);
        assert_eq!(view.monitored_assets, vec!["raw/orders", "summary"]);
        assert_eq!(view.default_status, DefaultSensorStatus::Stopped);
    }

    #[test]
    fn test_get_unknown_sensor_returns_not_found() {
        let result = get_sensor(&repository(), "missing");

        assert!(matches!(result, Err(DomainError::SensorNotFound(_))));
    }
}
