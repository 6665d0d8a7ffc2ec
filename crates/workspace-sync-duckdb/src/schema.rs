use duckdb::Connection;

/// Tables backing the metadata store.
///
/// Entities are kept as JSON documents keyed by id. Migrations keep an
/// insertion sequence so pending ones are replayed in the order they were
/// generated.
const METADATA_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS object_metadata (
    id TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    data_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS field_metadata (
    id TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    data_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS relation_metadata (
    id TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    data_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS workspace_migration (
    id TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    seq BIGINT NOT NULL,
    name TEXT NOT NULL,
    is_custom BOOLEAN NOT NULL,
    actions_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    applied_at TEXT
);

CREATE TABLE IF NOT EXISTS feature_flag (
    workspace_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value BOOLEAN NOT NULL
);
"#;

/// Create the metadata tables if they do not exist yet.
pub fn initialize_metadata_schema(conn: &Connection) -> duckdb::Result<()> {
    conn.execute_batch(METADATA_SCHEMA)
}
