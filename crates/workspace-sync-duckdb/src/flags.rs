use anyhow::{Context, Result};
use async_trait::async_trait;
use duckdb::params;
use tracing::debug;

use workspace_sync_metadata::{FeatureFlagMap, FeatureFlagResolver, WorkspaceSyncContext};

use crate::store::DuckDbMetadataStore;

/// Feature flags stored per workspace in the `feature_flag` table, layered
/// over configured defaults.
#[derive(Clone)]
pub struct DuckDbFeatureFlagResolver {
    store: DuckDbMetadataStore,
    defaults: FeatureFlagMap,
}

impl DuckDbFeatureFlagResolver {
    pub fn new(store: DuckDbMetadataStore, defaults: FeatureFlagMap) -> Self {
        Self { store, defaults }
    }

    /// Set (or replace) one flag for a workspace.
    pub fn set_flag(&self, workspace_id: &str, key: &str, enabled: bool) -> Result<()> {
        let conn = self.store.raw_connection()?;
        conn.execute(
            "DELETE FROM feature_flag WHERE workspace_id = ? AND key = ?",
            params![workspace_id, key],
        )
        .context("Failed to clear feature flag")?;
        conn.execute(
            "INSERT INTO feature_flag (workspace_id, key, value) VALUES (?, ?, ?)",
            params![workspace_id, key, enabled],
        )
        .context("Failed to store feature flag")?;
        debug!("Set feature flag {}={} for {}", key, enabled, workspace_id);
        Ok(())
    }

    fn workspace_flags(&self, workspace_id: &str) -> Result<FeatureFlagMap> {
        let conn = self.store.raw_connection()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM feature_flag WHERE workspace_id = ?")
            .context("Failed to prepare feature flag query")?;
        let rows = stmt
            .query_map(params![workspace_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
            })
            .context("Failed to query feature flags")?;
        let flags = rows
            .collect::<duckdb::Result<FeatureFlagMap>>()
            .context("Failed to read feature flag row")?;
        Ok(flags)
    }
}

#[async_trait]
impl FeatureFlagResolver for DuckDbFeatureFlagResolver {
    async fn resolve(&self, context: &WorkspaceSyncContext) -> Result<FeatureFlagMap> {
        let overrides = self.workspace_flags(&context.workspace_id)?;
        Ok(self.defaults.clone().merged(&overrides))
    }
}
