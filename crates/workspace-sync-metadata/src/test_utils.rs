//! Collaborator doubles for exercising sync runs in tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::StoreError;
use crate::logs::LogSink;
use crate::migration::WorkspaceMigration;
use crate::runner::MigrationRunner;
use crate::storage::{SyncStorage, SyncSummary};
use crate::store::{MetadataConnection, MetadataStore, MetadataTransaction, StoreResult};
use crate::types::{FieldMetadata, ObjectMetadata, RelationMetadata, WorkspaceSyncContext};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Migration runner that records the workspaces it was invoked for.
///
/// When built with [`RecordingMigrationRunner::applying`], it also drains the
/// pending queue of the given store so repeated runs behave like production.
#[derive(Clone, Default)]
pub struct RecordingMigrationRunner {
    calls: Arc<Mutex<Vec<String>>>,
    store: Option<Arc<dyn MetadataStore>>,
    failure: Option<String>,
}

impl RecordingMigrationRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applying(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::default()
        }
    }

    /// Every invocation fails with `message` after being recorded.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl MigrationRunner for RecordingMigrationRunner {
    async fn execute_pending_migrations(&self, workspace_id: &str) -> Result<usize> {
        lock(&self.calls).push(workspace_id.to_string());
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let mut connection = store.connect().await?;
        connection.start_transaction().await?;
        let pending = connection
            .manager()
            .list_pending_migrations(workspace_id)
            .await?;
        let now = Utc::now();
        for migration in &pending {
            connection
                .manager()
                .mark_migration_applied(migration.id, now)
                .await?;
        }
        connection.commit_transaction().await?;
        connection.release().await?;
        Ok(pending.len())
    }
}

/// One call captured by [`RecordingLogSink`].
#[derive(Debug, Clone)]
pub struct LoggedRun {
    pub context: WorkspaceSyncContext,
    pub summary: SyncSummary,
    pub storage: SyncStorage,
    pub migrations: Vec<WorkspaceMigration>,
}

/// Log sink that keeps every dry-run diff in memory.
#[derive(Clone, Default)]
pub struct RecordingLogSink {
    entries: Arc<Mutex<Vec<LoggedRun>>>,
    failure: Option<String>,
}

impl RecordingLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn entries(&self) -> Vec<LoggedRun> {
        lock(&self.entries).clone()
    }
}

#[async_trait]
impl LogSink for RecordingLogSink {
    async fn save_logs(
        &self,
        context: &WorkspaceSyncContext,
        storage: &SyncStorage,
        migrations: &[WorkspaceMigration],
    ) -> Result<()> {
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        lock(&self.entries).push(LoggedRun {
            context: context.clone(),
            summary: storage.summary(),
            storage: storage.clone(),
            migrations: migrations.to_vec(),
        });
        Ok(())
    }
}

/// Failure a [`FaultInjectingStore`] injects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `connect` fails as if the store were unreachable.
    Connect,
    /// `start_transaction` fails.
    StartTransaction,
    /// `commit_transaction` fails; the transaction stays open.
    Commit,
    /// Saving a relation fails, after objects and fields were written.
    SaveRelation,
    /// Saving a field fails.
    SaveField,
}

/// Wraps a store and fails one operation on every connection.
#[derive(Clone)]
pub struct FaultInjectingStore {
    inner: Arc<dyn MetadataStore>,
    fault: Fault,
    releases: Arc<AtomicUsize>,
}

impl FaultInjectingStore {
    pub fn new(inner: Arc<dyn MetadataStore>, fault: Fault) -> Self {
        Self {
            inner,
            fault,
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of connections released so far.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for FaultInjectingStore {
    async fn connect(&self) -> StoreResult<Box<dyn MetadataConnection>> {
        if self.fault == Fault::Connect {
            return Err(StoreError::Unreachable("injected connect failure".to_string()));
        }
        let inner = self.inner.connect().await?;
        Ok(Box::new(FaultInjectingConnection {
            inner,
            fault: self.fault,
            releases: self.releases.clone(),
        }))
    }
}

struct FaultInjectingConnection {
    inner: Box<dyn MetadataConnection>,
    fault: Fault,
    releases: Arc<AtomicUsize>,
}

impl FaultInjectingConnection {
    fn injected(&self, fault: Fault) -> StoreResult<()> {
        if self.fault == fault {
            return Err(StoreError::Backend(format!("injected {:?} failure", fault)));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataConnection for FaultInjectingConnection {
    async fn start_transaction(&mut self) -> StoreResult<()> {
        self.injected(Fault::StartTransaction)?;
        self.inner.start_transaction().await
    }

    async fn commit_transaction(&mut self) -> StoreResult<()> {
        self.injected(Fault::Commit)?;
        self.inner.commit_transaction().await
    }

    async fn rollback_transaction(&mut self) -> StoreResult<()> {
        self.inner.rollback_transaction().await
    }

    fn is_transaction_active(&self) -> bool {
        self.inner.is_transaction_active()
    }

    async fn release(&mut self) -> StoreResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release().await
    }

    fn manager(&mut self) -> &mut dyn MetadataTransaction {
        self
    }
}

#[async_trait]
impl MetadataTransaction for FaultInjectingConnection {
    async fn list_objects(&mut self, workspace_id: &str) -> StoreResult<Vec<ObjectMetadata>> {
        self.inner.manager().list_objects(workspace_id).await
    }

    async fn list_fields(&mut self, workspace_id: &str) -> StoreResult<Vec<FieldMetadata>> {
        self.inner.manager().list_fields(workspace_id).await
    }

    async fn list_relations(&mut self, workspace_id: &str) -> StoreResult<Vec<RelationMetadata>> {
        self.inner.manager().list_relations(workspace_id).await
    }

    async fn save_object(&mut self, object: &ObjectMetadata) -> StoreResult<()> {
        self.inner.manager().save_object(object).await
    }

    async fn save_field(&mut self, field: &FieldMetadata) -> StoreResult<()> {
        self.injected(Fault::SaveField)?;
        self.inner.manager().save_field(field).await
    }

    async fn save_relation(&mut self, relation: &RelationMetadata) -> StoreResult<()> {
        self.injected(Fault::SaveRelation)?;
        self.inner.manager().save_relation(relation).await
    }

    async fn insert_migrations(&mut self, migrations: &[WorkspaceMigration]) -> StoreResult<()> {
        self.inner.manager().insert_migrations(migrations).await
    }

    async fn list_pending_migrations(
        &mut self,
        workspace_id: &str,
    ) -> StoreResult<Vec<WorkspaceMigration>> {
        self.inner.manager().list_pending_migrations(workspace_id).await
    }

    async fn mark_migration_applied(
        &mut self,
        migration_id: Uuid,
        applied_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.inner
            .manager()
            .mark_migration_applied(migration_id, applied_at)
            .await
    }
}
