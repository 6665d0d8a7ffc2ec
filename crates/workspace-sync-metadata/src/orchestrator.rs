//! Drives a full sync run for one workspace.
//!
//! A run opens one transaction, lets the object synchronizer and then the
//! relation synchronizer write into it, and either rolls it back (dry run) or
//! commits it and hands the workspace to the migration runner. The connection
//! is released on every path.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SyncError};
use crate::flags::{FeatureFlagMap, FeatureFlagResolver};
use crate::logs::LogSink;
use crate::migration::WorkspaceMigration;
use crate::object_sync::ObjectMetadataSynchronizer;
use crate::relation_sync::RelationMetadataSynchronizer;
use crate::runner::MigrationRunner;
use crate::standard::{standard_schema, StandardSchema};
use crate::storage::{SyncStorage, SyncSummary};
use crate::store::{MetadataConnection, MetadataStore, MetadataTransaction};
use crate::types::{EntityKind, WorkspaceSyncContext};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Idle,
    TransactionOpen,
    Diffing,
    DryRunRollback,
    Committed,
    MigrationExecuting,
    Done,
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::TransactionOpen => "transaction_open",
            SyncState::Diffing => "diffing",
            SyncState::DryRunRollback => "dry_run_rollback",
            SyncState::Committed => "committed",
            SyncState::MigrationExecuting => "migration_executing",
            SyncState::Done => "done",
            SyncState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Compute and log the diff without persisting it or running migrations.
    pub dry_run: bool,
}

impl SyncOptions {
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub workspace_id: String,
    pub dry_run: bool,
    /// `DryRunRollback` for dry runs, `Done` otherwise.
    pub final_state: SyncState,
    pub summary: SyncSummary,
    /// Migrations generated by this run, in execution order.
    pub migrations: Vec<WorkspaceMigration>,
    /// Pending migrations applied by the runner, including older ones.
    pub executed_migrations: usize,
}

/// Tracks and logs state transitions for a single run.
struct RunTracker<'a> {
    workspace_id: &'a str,
    state: SyncState,
}

impl<'a> RunTracker<'a> {
    fn new(workspace_id: &'a str) -> Self {
        Self {
            workspace_id,
            state: SyncState::Idle,
        }
    }

    fn transition(&mut self, next: SyncState) {
        info!(
            workspace_id = self.workspace_id,
            from = %self.state,
            to = %next,
            "Sync state transition"
        );
        self.state = next;
    }

    fn fail(&mut self, err: SyncError) -> SyncError {
        let from = self.state;
        self.transition(SyncState::Failed);
        error!(
            "Workspace sync failed for {} while {}: {}",
            self.workspace_id, from, err
        );
        err
    }
}

enum TransactionOutcome {
    RolledBack(SyncStorage, Vec<WorkspaceMigration>),
    Committed(SyncStorage, Vec<WorkspaceMigration>),
}

/// Orchestrates metadata sync runs.
///
/// Collaborators are injected at construction. Concurrent runs for different
/// workspaces are fine; runs for the same workspace must be serialized by the
/// caller.
pub struct WorkspaceSyncMetadataService {
    store: Arc<dyn MetadataStore>,
    feature_flags: Arc<dyn FeatureFlagResolver>,
    migration_runner: Arc<dyn MigrationRunner>,
    log_sink: Arc<dyn LogSink>,
    objects: ObjectMetadataSynchronizer,
    relations: RelationMetadataSynchronizer,
}

impl WorkspaceSyncMetadataService {
    /// Service synchronizing against the built-in standard schema.
    pub fn new(
        store: Arc<dyn MetadataStore>,
        feature_flags: Arc<dyn FeatureFlagResolver>,
        migration_runner: Arc<dyn MigrationRunner>,
        log_sink: Arc<dyn LogSink>,
    ) -> Self {
        let schema = Arc::new(standard_schema());
        Self {
            store,
            feature_flags,
            migration_runner,
            log_sink,
            objects: ObjectMetadataSynchronizer::new(schema.clone()),
            relations: RelationMetadataSynchronizer::new(schema),
        }
    }

    /// Replace the standard schema this service reconciles against.
    pub fn with_schema(mut self, schema: StandardSchema) -> Self {
        let schema = Arc::new(schema);
        self.objects = ObjectMetadataSynchronizer::new(schema.clone());
        self.relations = RelationMetadataSynchronizer::new(schema);
        self
    }

    /// Run one sync for `context`.
    ///
    /// Every failure is returned to the caller after cleanup. Only
    /// [`SyncError::MigrationExecution`] leaves committed metadata behind.
    pub async fn synchronize(
        &self,
        context: &WorkspaceSyncContext,
        options: SyncOptions,
    ) -> Result<SyncReport> {
        let workspace_id = context.workspace_id.as_str();
        let mut run = RunTracker::new(workspace_id);
        info!(
            "Starting workspace sync for {} (data source {}, dry_run={})",
            workspace_id, context.data_source_id, options.dry_run
        );

        let flags = match self.feature_flags.resolve(context).await {
            Ok(flags) => flags,
            Err(e) => return Err(run.fail(SyncError::FeatureFlags(e))),
        };

        let mut connection = match self.store.connect().await {
            Ok(connection) => connection,
            Err(e) => return Err(run.fail(SyncError::Connectivity(e))),
        };

        let outcome = match connection.start_transaction().await {
            Ok(()) => {
                run.transition(SyncState::TransactionOpen);
                self.run_transaction(context, options, &flags, connection.as_mut(), &mut run)
                    .await
            }
            Err(e) => Err(SyncError::Connectivity(e)),
        };

        if let Err(e) = connection.release().await {
            warn!("Failed to release metadata connection for {}: {}", workspace_id, e);
        }

        match outcome {
            Err(e) => Err(run.fail(e)),
            Ok(TransactionOutcome::RolledBack(storage, migrations)) => {
                if let Err(e) = self
                    .log_sink
                    .save_logs(context, &storage, &migrations)
                    .await
                {
                    return Err(run.fail(SyncError::LogPersistence(e)));
                }
                log_summary(workspace_id, &storage.summary());
                info!(
                    "Dry run for {} finished: {} diffs, {} migrations not applied",
                    workspace_id,
                    storage.summary().total(),
                    migrations.len()
                );
                Ok(SyncReport {
                    workspace_id: workspace_id.to_string(),
                    dry_run: true,
                    final_state: run.state,
                    summary: storage.summary(),
                    migrations,
                    executed_migrations: 0,
                })
            }
            Ok(TransactionOutcome::Committed(storage, migrations)) => {
                run.transition(SyncState::MigrationExecuting);
                let executed = match self
                    .migration_runner
                    .execute_pending_migrations(workspace_id)
                    .await
                {
                    Ok(executed) => executed,
                    Err(source) => {
                        return Err(run.fail(SyncError::MigrationExecution {
                            workspace_id: workspace_id.to_string(),
                            source,
                        }))
                    }
                };
                run.transition(SyncState::Done);
                log_summary(workspace_id, &storage.summary());
                info!(
                    "Workspace sync for {} finished: {} diffs, {} migrations generated, {} executed",
                    workspace_id,
                    storage.summary().total(),
                    migrations.len(),
                    executed
                );
                Ok(SyncReport {
                    workspace_id: workspace_id.to_string(),
                    dry_run: false,
                    final_state: run.state,
                    summary: storage.summary(),
                    migrations,
                    executed_migrations: executed,
                })
            }
        }
    }

    /// Diff, then roll back or commit. Rolls back on any error.
    async fn run_transaction(
        &self,
        context: &WorkspaceSyncContext,
        options: SyncOptions,
        flags: &FeatureFlagMap,
        connection: &mut dyn MetadataConnection,
        run: &mut RunTracker<'_>,
    ) -> Result<TransactionOutcome> {
        run.transition(SyncState::Diffing);
        let diff = self.diff(context, connection.manager(), flags).await;

        let (storage, migrations) = match diff {
            Ok(diff) => diff,
            Err(e) => {
                rollback_quietly(connection, &context.workspace_id).await;
                return Err(e);
            }
        };

        if options.dry_run {
            connection
                .rollback_transaction()
                .await
                .map_err(SyncError::Store)?;
            run.transition(SyncState::DryRunRollback);
            return Ok(TransactionOutcome::RolledBack(storage, migrations));
        }

        if let Err(e) = connection.commit_transaction().await {
            if connection.is_transaction_active() {
                rollback_quietly(connection, &context.workspace_id).await;
            }
            return Err(SyncError::Commit(e));
        }
        run.transition(SyncState::Committed);
        Ok(TransactionOutcome::Committed(storage, migrations))
    }

    async fn diff(
        &self,
        context: &WorkspaceSyncContext,
        manager: &mut dyn MetadataTransaction,
        flags: &FeatureFlagMap,
    ) -> Result<(SyncStorage, Vec<WorkspaceMigration>)> {
        let mut storage = SyncStorage::new();
        let mut migrations = self
            .objects
            .synchronize(context, &mut *manager, &mut storage, flags)
            .await?;
        debug!(
            "Object sync for {} produced {} migrations",
            context.workspace_id,
            migrations.len()
        );
        migrations.extend(
            self.relations
                .synchronize(context, &mut *manager, &mut storage, flags)
                .await?,
        );
        Ok((storage, migrations))
    }
}

fn log_summary(workspace_id: &str, summary: &SyncSummary) {
    for kind in [EntityKind::Object, EntityKind::Field, EntityKind::Relation] {
        let counts = summary.for_kind(kind);
        debug!(
            workspace_id,
            kind = %kind,
            created = counts.created,
            updated = counts.updated,
            deleted = counts.deleted,
            "Sync diff summary"
        );
    }
}

async fn rollback_quietly(connection: &mut dyn MetadataConnection, workspace_id: &str) {
    if let Err(e) = connection.rollback_transaction().await {
        warn!("Rollback failed for workspace {}: {}", workspace_id, e);
    }
}
