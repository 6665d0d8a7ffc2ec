//! In-memory metadata store.
//!
//! A transaction works on a private copy of the committed state taken when it
//! starts, so it always reads its own writes. Its writes are also logged and
//! replayed onto the committed state on commit, which keeps concurrent
//! transactions for different workspaces from clobbering each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::migration::WorkspaceMigration;
use crate::store::{MetadataConnection, MetadataStore, MetadataTransaction, StoreResult};
use crate::types::{FieldMetadata, ObjectMetadata, RelationMetadata};

/// Complete contents of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetadataSnapshot {
    pub objects: BTreeMap<Uuid, ObjectMetadata>,
    pub fields: BTreeMap<Uuid, FieldMetadata>,
    pub relations: BTreeMap<Uuid, RelationMetadata>,
    pub migrations: Vec<WorkspaceMigration>,
}

#[derive(Debug, Clone)]
enum Write {
    Object(ObjectMetadata),
    Field(FieldMetadata),
    Relation(RelationMetadata),
    Migrations(Vec<WorkspaceMigration>),
    Applied(Uuid, DateTime<Utc>),
}

impl MetadataSnapshot {
    fn apply(&mut self, write: Write) {
        match write {
            Write::Object(object) => {
                self.objects.insert(object.id, object);
            }
            Write::Field(field) => {
                self.fields.insert(field.id, field);
            }
            Write::Relation(relation) => {
                self.relations.insert(relation.id, relation);
            }
            Write::Migrations(migrations) => self.migrations.extend(migrations),
            Write::Applied(id, at) => {
                if let Some(migration) = self.migrations.iter_mut().find(|m| m.id == id) {
                    migration.applied_at = Some(at);
                }
            }
        }
    }

    fn objects_for(&self, workspace_id: &str) -> Vec<ObjectMetadata> {
        self.objects
            .values()
            .filter(|o| o.workspace_id == workspace_id)
            .cloned()
            .collect()
    }

    fn fields_for(&self, workspace_id: &str) -> Vec<FieldMetadata> {
        self.fields
            .values()
            .filter(|f| f.workspace_id == workspace_id)
            .cloned()
            .collect()
    }

    fn relations_for(&self, workspace_id: &str) -> Vec<RelationMetadata> {
        self.relations
            .values()
            .filter(|r| r.workspace_id == workspace_id)
            .cloned()
            .collect()
    }

    /// Pending migrations in insertion order.
    fn pending_for(&self, workspace_id: &str) -> Vec<WorkspaceMigration> {
        self.migrations
            .iter()
            .filter(|m| m.workspace_id == workspace_id && m.is_pending())
            .cloned()
            .collect()
    }

    /// Canonical byte representation, for comparing states.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Metadata store held in process memory.
#[derive(Clone)]
pub struct InMemoryMetadataStore {
    committed: Arc<Mutex<MetadataSnapshot>>,
    reachable: Arc<AtomicBool>,
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::with_snapshot(MetadataSnapshot::default())
    }

    pub fn with_snapshot(snapshot: MetadataSnapshot) -> Self {
        Self {
            committed: Arc::new(Mutex::new(snapshot)),
            reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate losing (or regaining) connectivity.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> MetadataSnapshot {
        self.committed.lock().await.clone()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn connect(&self) -> StoreResult<Box<dyn MetadataConnection>> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable(
                "in-memory store is marked unreachable".to_string(),
            ));
        }
        Ok(Box::new(InMemoryConnection {
            committed: self.committed.clone(),
            reachable: self.reachable.clone(),
            transaction: None,
            released: false,
        }))
    }
}

struct OpenTransaction {
    working: MetadataSnapshot,
    writes: Vec<Write>,
}

/// Connection handed out by [`InMemoryMetadataStore`].
pub struct InMemoryConnection {
    committed: Arc<Mutex<MetadataSnapshot>>,
    reachable: Arc<AtomicBool>,
    transaction: Option<OpenTransaction>,
    released: bool,
}

impl InMemoryConnection {
    fn ensure_usable(&self) -> StoreResult<()> {
        if self.released {
            return Err(StoreError::Released);
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable(
                "in-memory store is marked unreachable".to_string(),
            ));
        }
        Ok(())
    }

    async fn read<R>(&self, f: impl FnOnce(&MetadataSnapshot) -> R + Send) -> StoreResult<R> {
        self.ensure_usable()?;
        match &self.transaction {
            Some(tx) => Ok(f(&tx.working)),
            None => Ok(f(&*self.committed.lock().await)),
        }
    }

    async fn write(&mut self, write: Write) -> StoreResult<()> {
        self.ensure_usable()?;
        match &mut self.transaction {
            Some(tx) => {
                tx.working.apply(write.clone());
                tx.writes.push(write);
            }
            None => self.committed.lock().await.apply(write),
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataConnection for InMemoryConnection {
    async fn start_transaction(&mut self) -> StoreResult<()> {
        self.ensure_usable()?;
        if self.transaction.is_some() {
            return Err(StoreError::TransactionAlreadyOpen);
        }
        let working = self.committed.lock().await.clone();
        self.transaction = Some(OpenTransaction {
            working,
            writes: Vec::new(),
        });
        Ok(())
    }

    async fn commit_transaction(&mut self) -> StoreResult<()> {
        self.ensure_usable()?;
        let tx = self.transaction.take().ok_or(StoreError::NoTransaction)?;
        let mut committed = self.committed.lock().await;
        let count = tx.writes.len();
        for write in tx.writes {
            committed.apply(write);
        }
        debug!("Committed {} in-memory writes", count);
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> StoreResult<()> {
        if self.released {
            return Err(StoreError::Released);
        }
        self.transaction
            .take()
            .map(|_| ())
            .ok_or(StoreError::NoTransaction)
    }

    fn is_transaction_active(&self) -> bool {
        self.transaction.is_some()
    }

    async fn release(&mut self) -> StoreResult<()> {
        self.transaction = None;
        self.released = true;
        Ok(())
    }

    fn manager(&mut self) -> &mut dyn MetadataTransaction {
        self
    }
}

#[async_trait]
impl MetadataTransaction for InMemoryConnection {
    async fn list_objects(&mut self, workspace_id: &str) -> StoreResult<Vec<ObjectMetadata>> {
        self.read(|s| s.objects_for(workspace_id)).await
    }

    async fn list_fields(&mut self, workspace_id: &str) -> StoreResult<Vec<FieldMetadata>> {
        self.read(|s| s.fields_for(workspace_id)).await
    }

    async fn list_relations(&mut self, workspace_id: &str) -> StoreResult<Vec<RelationMetadata>> {
        self.read(|s| s.relations_for(workspace_id)).await
    }

    async fn save_object(&mut self, object: &ObjectMetadata) -> StoreResult<()> {
        self.write(Write::Object(object.clone())).await
    }

    async fn save_field(&mut self, field: &FieldMetadata) -> StoreResult<()> {
        self.write(Write::Field(field.clone())).await
    }

    async fn save_relation(&mut self, relation: &RelationMetadata) -> StoreResult<()> {
        self.write(Write::Relation(relation.clone())).await
    }

    async fn insert_migrations(&mut self, migrations: &[WorkspaceMigration]) -> StoreResult<()> {
        if migrations.is_empty() {
            return Ok(());
        }
        self.write(Write::Migrations(migrations.to_vec())).await
    }

    async fn list_pending_migrations(
        &mut self,
        workspace_id: &str,
    ) -> StoreResult<Vec<WorkspaceMigration>> {
        self.read(|s| s.pending_for(workspace_id)).await
    }

    async fn mark_migration_applied(
        &mut self,
        migration_id: Uuid,
        applied_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.write(Write::Applied(migration_id, applied_at)).await
    }
}
