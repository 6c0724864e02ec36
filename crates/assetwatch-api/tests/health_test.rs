//! Integration tests for the health endpoint.

mod common;

use std::sync::Arc;

use assetwatch_test_support::InMemoryEventLog;
use axum::http::StatusCode;

#[tokio::test]
async fn test_health_reports_loaded_repository() {
    let app = common::build_test_app(Arc::new(InMemoryEventLog::new()));

    let (status, json) = common::get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["repository"], "warehouse");
    assert_eq!(json["sensors"], 2);
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let app = common::build_test_app(Arc::new(InMemoryEventLog::new()));

    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/api/v1/nonexistent")
        .body(axum::body::Body::empty())
        .unwrap();

    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
