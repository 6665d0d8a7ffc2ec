//! Transactional metadata store contract.
//!
//! This module defines the traits a storage backend implements to be driven by
//! the sync orchestrator. A [`MetadataStore`] hands out connections; each
//! connection owns at most one open transaction, and every read made through
//! [`MetadataConnection::manager`] observes the writes already made in that
//! transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::migration::WorkspaceMigration;
use crate::types::{FieldMetadata, ObjectMetadata, RelationMetadata};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Source of transactional connections to the metadata store.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Acquire a dedicated connection. Fails with [`StoreError::Unreachable`]
    /// when the store cannot be reached.
    async fn connect(&self) -> StoreResult<Box<dyn MetadataConnection>>;
}

/// A connection with explicit transaction boundaries.
#[async_trait]
pub trait MetadataConnection: Send {
    async fn start_transaction(&mut self) -> StoreResult<()>;

    async fn commit_transaction(&mut self) -> StoreResult<()>;

    async fn rollback_transaction(&mut self) -> StoreResult<()>;

    /// Whether a transaction is currently open.
    fn is_transaction_active(&self) -> bool;

    /// Give the connection back. Rolls back any transaction still open.
    async fn release(&mut self) -> StoreResult<()>;

    /// Read/write operations scoped to the open transaction.
    fn manager(&mut self) -> &mut dyn MetadataTransaction;
}

/// Metadata reads and writes, scoped to one workspace per call.
#[async_trait]
pub trait MetadataTransaction: Send {
    // ========== Metadata ==========

    async fn list_objects(&mut self, workspace_id: &str) -> StoreResult<Vec<ObjectMetadata>>;

    async fn list_fields(&mut self, workspace_id: &str) -> StoreResult<Vec<FieldMetadata>>;

    async fn list_relations(&mut self, workspace_id: &str) -> StoreResult<Vec<RelationMetadata>>;

    /// Insert or replace by id.
    async fn save_object(&mut self, object: &ObjectMetadata) -> StoreResult<()>;

    async fn save_field(&mut self, field: &FieldMetadata) -> StoreResult<()>;

    async fn save_relation(&mut self, relation: &RelationMetadata) -> StoreResult<()>;

    // ========== Migrations ==========

    async fn insert_migrations(&mut self, migrations: &[WorkspaceMigration]) -> StoreResult<()>;

    /// Pending migrations for a workspace, oldest first.
    async fn list_pending_migrations(
        &mut self,
        workspace_id: &str,
    ) -> StoreResult<Vec<WorkspaceMigration>>;

    async fn mark_migration_applied(
        &mut self,
        migration_id: Uuid,
        applied_at: DateTime<Utc>,
    ) -> StoreResult<()>;
}
