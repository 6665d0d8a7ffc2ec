//! Persistence of dry-run diffs for inspection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::migration::WorkspaceMigration;
use crate::storage::{SyncStorage, SyncSummary};
use crate::types::{workspace_storage_key, WorkspaceSyncContext};

/// Receives the diff computed by a dry run.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn save_logs(
        &self,
        context: &WorkspaceSyncContext,
        storage: &SyncStorage,
        migrations: &[WorkspaceMigration],
    ) -> Result<()>;
}

#[derive(Serialize)]
struct DryRunLog<'a> {
    workspace_id: &'a str,
    data_source_id: &'a str,
    generated_at: String,
    summary: SyncSummary,
    storage: &'a SyncStorage,
    migrations: &'a [WorkspaceMigration],
}

/// Writes each dry run to `<root>/<workspace_id>/<timestamp>.json`.
#[derive(Debug, Clone)]
pub struct FileLogSink {
    root: PathBuf,
}

impl FileLogSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn workspace_dir(&self, workspace_id: &str) -> PathBuf {
        self.root.join(workspace_storage_key(workspace_id))
    }
}

#[async_trait]
impl LogSink for FileLogSink {
    async fn save_logs(
        &self,
        context: &WorkspaceSyncContext,
        storage: &SyncStorage,
        migrations: &[WorkspaceMigration],
    ) -> Result<()> {
        let now = Utc::now();
        let dir = self.workspace_dir(&context.workspace_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

        let log = DryRunLog {
            workspace_id: &context.workspace_id,
            data_source_id: &context.data_source_id,
            generated_at: now.to_rfc3339(),
            summary: storage.summary(),
            storage,
            migrations,
        };
        let body = serde_json::to_vec_pretty(&log).context("Failed to serialize sync log")?;

        let path = dir.join(format!("{}.json", now.format("%Y%m%dT%H%M%S%.6fZ")));
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write sync log {}", path.display()))?;

        info!("Saved dry-run sync log to {}", path.display());
        Ok(())
    }
}
