//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use assetwatch_api::config::RepositoryConfig;
use assetwatch_api::state::AppState;
use assetwatch_core::event_log::EventLogStore;
use assetwatch_test_support::FixedClock;

/// Repository used across the integration tests.
pub const REPOSITORY_YAML: &str = r"
name: warehouse
assets:
  - key: raw/orders
    group: raw
    partitions: { type: static, keys: [eu, us] }
  - key: raw/customers
    group: raw
    partitions: { type: static, keys: [eu, us] }
  - key: audit_log
sensors:
  - name: regional_rollup
    kind: partition_rollup
    description: Rolls up each region once orders and customers land
    job: summarize
    groups: [raw]
  - name: audit_watch
    kind: latest_materialization
    job: audit
    assets: [audit_log]
";

/// Build the full app router over `event_log` with a fixed clock. Uses the
/// same route structure as `main.rs`.
pub fn build_test_app(event_log: Arc<dyn EventLogStore>) -> Router {
    let repository = RepositoryConfig::from_yaml(REPOSITORY_YAML)
        .unwrap()
        .into_repository()
        .unwrap();
    let app_state = AppState::new(Arc::new(FixedClock::default()), event_log, repository);
    assetwatch_api::app(app_state)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}
