use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use workspace_sync_metadata::{MetadataConnection, MigrationRunner};

use crate::ddl::{quote_identifier, render_table_action, workspace_schema_name};
use crate::store::{DuckDbConnection, DuckDbMetadataStore};

/// Applies pending workspace migrations to per-workspace DuckDB schemas.
///
/// All pending migrations of a workspace are applied and marked in a single
/// transaction; if any statement fails nothing is applied.
#[derive(Clone)]
pub struct DuckDbMigrationRunner {
    store: DuckDbMetadataStore,
}

impl DuckDbMigrationRunner {
    pub fn new(store: DuckDbMetadataStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MigrationRunner for DuckDbMigrationRunner {
    async fn execute_pending_migrations(&self, workspace_id: &str) -> Result<usize> {
        let mut connection = self.store.open_handle()?;
        connection.start_transaction().await?;

        let result = apply_pending(&mut connection, workspace_id).await;
        let outcome = match result {
            Ok(count) => connection
                .commit_transaction()
                .await
                .map(|_| count)
                .context("Failed to commit applied migrations"),
            Err(e) => {
                if let Err(rollback) = connection.rollback_transaction().await {
                    warn!(
                        "Rollback of failed migrations for {} failed: {}",
                        workspace_id, rollback
                    );
                }
                Err(e)
            }
        };

        if let Err(e) = connection.release().await {
            warn!("Failed to release migration connection: {}", e);
        }
        outcome
    }
}

async fn apply_pending(
    connection: &mut DuckDbConnection,
    workspace_id: &str,
) -> Result<usize> {
    let pending = connection
        .manager()
        .list_pending_migrations(workspace_id)
        .await?;
    if pending.is_empty() {
        debug!("No pending migrations for workspace {}", workspace_id);
        return Ok(0);
    }

    let schema = workspace_schema_name(workspace_id);
    connection.execute_batch(&format!(
        "CREATE SCHEMA IF NOT EXISTS {}",
        quote_identifier(&schema)
    ))?;

    let applied_at = Utc::now();
    for migration in &pending {
        for action in &migration.actions {
            for statement in render_table_action(&schema, action) {
                debug!("{}: {}", migration.name, statement);
                connection
                    .execute_batch(&statement)
                    .with_context(|| format!("Migration '{}' failed", migration.name))?;
            }
        }
        connection
            .manager()
            .mark_migration_applied(migration.id, applied_at)
            .await?;
    }

    info!(
        "Applied {} migrations to schema {} for workspace {}",
        pending.len(),
        schema,
        workspace_id
    );
    Ok(pending.len())
}
