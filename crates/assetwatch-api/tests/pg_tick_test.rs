//! End-to-end tick evaluation against the PostgreSQL event log.

mod common;

use std::sync::Arc;

use assetwatch_core::asset::AssetKey;
use assetwatch_core::event::EventKind;
use assetwatch_event_store::pg_event_log::{NewEventRecord, PgEventLog};
use axum::http::StatusCode;
use serde_json::json;
use sqlx::PgPool;

fn audit_entry() -> NewEventRecord {
    NewEventRecord {
        kind: EventKind::AssetMaterialization,
        asset_key: AssetKey::from("audit_log"),
        partition: None,
        run_id: None,
        payload: json!({}),
    }
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_audit_watch_consumes_stored_materializations(pool: PgPool) {
    let log = Arc::new(PgEventLog::new(pool));
    let stored = log.append(audit_entry()).await.unwrap();

    let app = common::build_test_app(log.clone());
    let (status, first) =
        common::post_json(app, "/api/v1/sensors/audit_watch/ticks", &json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"], "run_requested");
    assert_eq!(first["run_requests"][0]["run_key"], stored.storage_id.to_string());

    let app = common::build_test_app(log);
    let (_, second) = common::post_json(
        app,
        "/api/v1/sensors/audit_watch/ticks",
        &json!({ "cursor": first["next_cursor"] }),
    )
    .await;

    assert_eq!(second["outcome"], "skipped");
    assert_eq!(second["next_cursor"], first["next_cursor"]);
}
