//! Integration tests for sensor listing and tick evaluation.

mod common;

use std::sync::Arc;

use assetwatch_test_support::{FailingEventLog, InMemoryEventLog};
use axum::http::StatusCode;
use serde_json::{Value, json};

async fn tick(log: &Arc<InMemoryEventLog>, sensor: &str, cursor: &Value) -> (StatusCode, Value) {
    let app = common::build_test_app(log.clone());
    common::post_json(
        app,
        &format!("/api/v1/sensors/{sensor}/ticks"),
        &json!({ "cursor": cursor }),
    )
    .await
}

#[tokio::test]
async fn test_list_sensors_returns_views_by_name() {
    let app = common::build_test_app(Arc::new(InMemoryEventLog::new()));

    let (status, json) = common::get_json(app, "/api/v1/sensors").await;

    assert_eq!(status, StatusCode::OK);
    let sensors = json.as_array().unwrap();
    assert_eq!(sensors.len(), 2);
    assert_eq!(sensors[0]["name"], "audit_watch");
    assert_eq!(sensors[1]["name"], "regional_rollup");
    assert_eq!(sensors[1]["kind"], "multi_asset");
    assert_eq!(sensors[1]["default_status"], "stopped");
    assert_eq!(
        sensors[1]["monitored_assets"],
        json!(["raw/customers", "raw/orders"])
    );
}

#[tokio::test]
async fn test_get_sensor_returns_definition() {
    let app = common::build_test_app(Arc::new(InMemoryEventLog::new()));

    let (status, json) = common::get_json(app, "/api/v1/sensors/audit_watch").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["targets"], json!(["audit"]));
    assert_eq!(json["minimum_interval_seconds"], 30);
}

#[tokio::test]
async fn test_unknown_sensor_returns_404() {
    let log = Arc::new(InMemoryEventLog::new());
    let app = common::build_test_app(log.clone());

    let (status, json) = common::get_json(app, "/api/v1/sensors/missing").await;
    let (tick_status, _) = tick(&log, "missing", &Value::Null).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "sensor_not_found");
    assert_eq!(tick_status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rollup_requests_each_partition_once_complete() {
    let log = Arc::new(InMemoryEventLog::new());
    log.materialize("raw/orders", Some("eu"));
    log.materialize("raw/customers", Some("eu"));
    log.materialize("raw/orders", Some("us"));

    let (status, first) = tick(&log, "regional_rollup", &Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"], "run_requested");
    assert_eq!(first["run_requests"].as_array().unwrap().len(), 1);
    assert_eq!(first["run_requests"][0]["partition_key"], "eu");
    assert_eq!(first["run_requests"][0]["run_key"], "eu:2");

    let (_, second) = tick(&log, "regional_rollup", &first["next_cursor"]).await;
    assert_eq!(second["outcome"], "skipped");
    assert_eq!(second["skip_message"], "no partition materialized by every asset");
    assert_eq!(second["next_cursor"], first["next_cursor"]);

    log.materialize("raw/customers", Some("us"));
    let (_, third) = tick(&log, "regional_rollup", &second["next_cursor"]).await;
    assert_eq!(third["outcome"], "run_requested");
    assert_eq!(third["run_requests"][0]["partition_key"], "us");
    assert_eq!(third["run_requests"][0]["run_key"], "us:4");
    assert_ne!(third["next_cursor"], second["next_cursor"]);
}

#[tokio::test]
async fn test_tick_without_events_skips_and_keeps_empty_cursor() {
    let log = Arc::new(InMemoryEventLog::new());

    let (status, json) = tick(&log, "audit_watch", &Value::Null).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "skipped");
    assert_eq!(json["skip_message"], "no new materializations");
    assert!(json["next_cursor"].is_null());
    assert_eq!(json["warnings"], json!([]));
}

#[tokio::test]
async fn test_event_log_failure_returns_500() {
    let app = common::build_test_app(Arc::new(FailingEventLog));

    let (status, json) = common::post_json(
        app,
        "/api/v1/sensors/audit_watch/ticks",
        &json!({}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "infrastructure_error");
}
