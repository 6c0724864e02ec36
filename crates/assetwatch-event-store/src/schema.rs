//! Event log database schema.

/// SQL to create the asset event records table and its indexes.
///
/// Kept in sync with `migrations/20260115000000_asset_event_records.sql`.
pub const CREATE_EVENT_RECORDS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS asset_event_records (
    storage_id      BIGSERIAL PRIMARY KEY,
    event_kind      VARCHAR(64) NOT NULL,
    asset_key       TEXT NOT NULL,
    partition_key   TEXT,
    run_id          UUID,
    payload         JSONB NOT NULL DEFAULT '{}'::jsonb,
    occurred_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_asset_event_records_asset_kind
    ON asset_event_records (asset_key, event_kind, storage_id);

CREATE INDEX IF NOT EXISTS idx_asset_event_records_partition
    ON asset_event_records (asset_key, partition_key)
    WHERE partition_key IS NOT NULL;
";
