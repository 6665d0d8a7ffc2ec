//! DuckDB-backed metadata store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use workspace_sync_metadata::{
    FieldMetadata, MetadataConnection, MetadataStore, MetadataTransaction, ObjectMetadata,
    RelationMetadata, StoreError, StoreResult, TableAction, WorkspaceMigration,
};

use crate::schema::initialize_metadata_schema;

pub(crate) fn backend(err: duckdb::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("invalid timestamp '{}': {}", raw, e)))
}

fn parse_id(raw: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Backend(format!("invalid id '{}': {}", raw, e)))
}

/// Metadata store persisted in a DuckDB database.
///
/// Every [`MetadataStore::connect`] call hands out its own DuckDB connection
/// to the same database, so each sync run gets an independent transaction.
#[derive(Clone)]
pub struct DuckDbMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbMetadataStore {
    /// Open or create a store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB database {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// In-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory DuckDB")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        initialize_metadata_schema(&conn).context("Failed to initialize metadata schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A fresh connection to the underlying database.
    pub(crate) fn raw_connection(&self) -> StoreResult<Connection> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unreachable("DuckDB connection lock poisoned".to_string()))?;
        conn.try_clone()
            .map_err(|e| StoreError::Unreachable(e.to_string()))
    }

    /// A handle with the same contract as [`MetadataStore::connect`], without boxing.
    pub(crate) fn open_handle(&self) -> StoreResult<DuckDbConnection> {
        Ok(DuckDbConnection::new(self.raw_connection()?))
    }
}

#[async_trait]
impl MetadataStore for DuckDbMetadataStore {
    async fn connect(&self) -> StoreResult<Box<dyn MetadataConnection>> {
        Ok(Box::new(self.open_handle()?))
    }
}

/// One DuckDB connection with explicit transaction control.
pub struct DuckDbConnection {
    conn: Connection,
    in_transaction: bool,
    released: bool,
}

impl DuckDbConnection {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            in_transaction: false,
            released: false,
        }
    }

    fn usable(&self) -> StoreResult<&Connection> {
        if self.released {
            return Err(StoreError::Released);
        }
        Ok(&self.conn)
    }

    /// Run raw SQL on this connection, inside the open transaction if any.
    pub(crate) fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        self.usable()?.execute_batch(sql).map_err(backend)
    }

    fn load<T: DeserializeOwned>(&self, table: &str, workspace_id: &str) -> StoreResult<Vec<T>> {
        let conn = self.usable()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT data_json FROM {} WHERE workspace_id = ? ORDER BY id",
                table
            ))
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![workspace_id], |row| row.get::<_, String>(0))
            .map_err(backend)?;

        let mut entities = Vec::new();
        for row in rows {
            let data_json = row.map_err(backend)?;
            entities.push(serde_json::from_str(&data_json)?);
        }
        Ok(entities)
    }

    fn upsert<T: Serialize>(
        &self,
        table: &str,
        id: Uuid,
        workspace_id: &str,
        entity: &T,
    ) -> StoreResult<()> {
        let conn = self.usable()?;
        let data_json = serde_json::to_string(entity)?;
        let id = id.to_string();
        conn.execute(&format!("DELETE FROM {} WHERE id = ?", table), params![id])
            .map_err(backend)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, workspace_id, data_json) VALUES (?, ?, ?)",
                table
            ),
            params![id, workspace_id, data_json],
        )
        .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl MetadataConnection for DuckDbConnection {
    async fn start_transaction(&mut self) -> StoreResult<()> {
        if self.in_transaction {
            return Err(StoreError::TransactionAlreadyOpen);
        }
        self.execute_batch("BEGIN TRANSACTION")?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> StoreResult<()> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        self.execute_batch("COMMIT")?;
        self.in_transaction = false;
        debug!("Committed DuckDB metadata transaction");
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> StoreResult<()> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        // A failed COMMIT has already aborted the transaction on DuckDB's side.
        self.in_transaction = false;
        self.execute_batch("ROLLBACK")
    }

    fn is_transaction_active(&self) -> bool {
        self.in_transaction
    }

    async fn release(&mut self) -> StoreResult<()> {
        if self.released {
            return Ok(());
        }
        if self.in_transaction {
            if let Err(e) = self.execute_batch("ROLLBACK") {
                warn!("Rollback on release failed: {}", e);
            }
            self.in_transaction = false;
        }
        self.released = true;
        Ok(())
    }

    fn manager(&mut self) -> &mut dyn MetadataTransaction {
        self
    }
}

#[async_trait]
impl MetadataTransaction for DuckDbConnection {
    async fn list_objects(&mut self, workspace_id: &str) -> StoreResult<Vec<ObjectMetadata>> {
        self.load("object_metadata", workspace_id)
    }

    async fn list_fields(&mut self, workspace_id: &str) -> StoreResult<Vec<FieldMetadata>> {
        self.load("field_metadata", workspace_id)
    }

    async fn list_relations(&mut self, workspace_id: &str) -> StoreResult<Vec<RelationMetadata>> {
        self.load("relation_metadata", workspace_id)
    }

    async fn save_object(&mut self, object: &ObjectMetadata) -> StoreResult<()> {
        self.upsert("object_metadata", object.id, &object.workspace_id, object)
    }

    async fn save_field(&mut self, field: &FieldMetadata) -> StoreResult<()> {
        self.upsert("field_metadata", field.id, &field.workspace_id, field)
    }

    async fn save_relation(&mut self, relation: &RelationMetadata) -> StoreResult<()> {
        self.upsert(
            "relation_metadata",
            relation.id,
            &relation.workspace_id,
            relation,
        )
    }

    async fn insert_migrations(&mut self, migrations: &[WorkspaceMigration]) -> StoreResult<()> {
        if migrations.is_empty() {
            return Ok(());
        }
        let conn = self.usable()?;
        let mut seq: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) FROM workspace_migration",
                [],
                |row| row.get(0),
            )
            .map_err(backend)?;

        let mut stmt = conn
            .prepare(
                "INSERT INTO workspace_migration \
                 (id, workspace_id, seq, name, is_custom, actions_json, created_at, applied_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .map_err(backend)?;
        for migration in migrations {
            seq += 1;
            let actions_json = serde_json::to_string(&migration.actions)?;
            stmt.execute(params![
                migration.id.to_string(),
                migration.workspace_id,
                seq,
                migration.name,
                migration.is_custom,
                actions_json,
                migration.created_at.to_rfc3339(),
                migration.applied_at.map(|t| t.to_rfc3339()),
            ])
            .map_err(backend)?;
        }
        debug!("Queued {} workspace migrations", migrations.len());
        Ok(())
    }

    async fn list_pending_migrations(
        &mut self,
        workspace_id: &str,
    ) -> StoreResult<Vec<WorkspaceMigration>> {
        let conn = self.usable()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, is_custom, actions_json, created_at FROM workspace_migration \
                 WHERE workspace_id = ? AND applied_at IS NULL ORDER BY seq",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![workspace_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(backend)?;

        let mut migrations = Vec::new();
        for row in rows {
            let (id, name, is_custom, actions_json, created_at) = row.map_err(backend)?;
            let actions: Vec<TableAction> = serde_json::from_str(&actions_json)?;
            migrations.push(WorkspaceMigration {
                id: parse_id(&id)?,
                workspace_id: workspace_id.to_string(),
                name,
                is_custom,
                actions,
                created_at: parse_timestamp(&created_at)?,
                applied_at: None,
            });
        }
        Ok(migrations)
    }

    async fn mark_migration_applied(
        &mut self,
        migration_id: Uuid,
        applied_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.usable()?
            .execute(
                "UPDATE workspace_migration SET applied_at = ? WHERE id = ?",
                params![applied_at.to_rfc3339(), migration_id.to_string()],
            )
            .map_err(backend)?;
        Ok(())
    }
}
