//! Error types for workspace metadata synchronization.

use thiserror::Error;

/// Failures raised by a metadata store handle.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Metadata store unreachable: {0}")]
    Unreachable(String),

    #[error("No transaction is open on this handle")]
    NoTransaction,

    #[error("A transaction is already open on this handle")]
    TransactionAlreadyOpen,

    #[error("Handle has been released")]
    Released,

    #[error("Metadata store backend error: {0}")]
    Backend(String),

    #[error("Failed to (de)serialize metadata row: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by a sync run.
///
/// Everything except [`SyncError::MigrationExecution`] happens before commit
/// and leaves the metadata store untouched.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Metadata store connectivity failed: {0}")]
    Connectivity(#[source] StoreError),

    #[error("Failed to resolve feature flags: {0}")]
    FeatureFlags(#[source] anyhow::Error),

    #[error("Cannot compute diff: {0}")]
    DiffComputation(String),

    #[error("Relation {relation} references unresolved {missing}")]
    ReferentialIntegrity { relation: String, missing: String },

    #[error("Metadata store operation failed during diffing: {0}")]
    Store(#[source] StoreError),

    #[error("Transaction commit failed: {0}")]
    Commit(#[source] StoreError),

    #[error("Failed to persist dry-run logs: {0}")]
    LogPersistence(#[source] anyhow::Error),

    #[error("Metadata committed but migrations failed for workspace {workspace_id}: {source}")]
    MigrationExecution {
        workspace_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl SyncError {
    /// True when metadata changes are durable even though the run failed.
    pub fn is_post_commit(&self) -> bool {
        matches!(self, SyncError::MigrationExecution { .. })
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::Store(err)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
