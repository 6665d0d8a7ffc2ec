use anyhow::Result;
use async_trait::async_trait;

/// Executes every pending migration recorded for a workspace.
///
/// Called only after a sync run has committed. Implementations read the
/// durable pending queue, so migrations left over from earlier runs are
/// applied as well.
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    /// Returns the number of migrations applied.
    async fn execute_pending_migrations(&self, workspace_id: &str) -> Result<usize>;
}
