//! Workspace metadata synchronization engine.
//!
//! This crate reconciles the standard objects, fields and relations declared in
//! code against the metadata persisted for each workspace, and turns the
//! differences into workspace migrations.
//!
//! # Features
//!
//! - **Flag-gated standard schema**: definitions can be tied to a feature flag
//!   and only count as declared while that flag is enabled.
//! - **Transactional diffing**: objects and fields are synchronized before
//!   relations inside one transaction, so relations resolve uncommitted creates.
//! - **Dry runs**: the diff is rolled back and handed to a [`LogSink`] instead of
//!   being committed.
//! - **Durable migration queue**: generated migrations become pending records on
//!   commit and are executed by a [`MigrationRunner`].
//!
//! # Usage
//!
//! Implement [`MetadataStore`] for your storage backend (or use
//! [`InMemoryMetadataStore`]), then build a [`WorkspaceSyncMetadataService`]:
//!
//! ```ignore
//! use workspace_sync_metadata::*;
//!
//! let service = WorkspaceSyncMetadataService::new(store, flags, runner, log_sink);
//! let context = WorkspaceSyncContext::new("workspace-1", "data-source-1");
//! let report = service.synchronize(&context, SyncOptions::default()).await?;
//! ```

pub mod error;
pub mod flags;
pub mod logs;
pub mod memory_store;
pub mod migration;
pub mod object_sync;
pub mod orchestrator;
pub mod relation_sync;
pub mod runner;
pub mod standard;
pub mod storage;
pub mod store;
pub mod test_utils;
pub mod types;

// Re-export main types for convenience
pub use error::{Result, StoreError, SyncError};
pub use flags::{keys, FeatureFlagMap, FeatureFlagResolver, StaticFeatureFlagResolver};
pub use logs::{FileLogSink, LogSink};
pub use memory_store::{InMemoryMetadataStore, MetadataSnapshot};
pub use migration::{
    ColumnAction, ColumnDefinition, TableAction, TableActionKind, WorkspaceMigration,
};
pub use object_sync::ObjectMetadataSynchronizer;
pub use orchestrator::{SyncOptions, SyncReport, SyncState, WorkspaceSyncMetadataService};
pub use relation_sync::RelationMetadataSynchronizer;
pub use runner::MigrationRunner;
pub use standard::{
    standard_schema, StandardFieldDefinition, StandardObjectDefinition,
    StandardRelationDefinition, StandardSchema,
};
pub use storage::{DiffCounts, DiffSet, EntityUpdate, SyncStorage, SyncSummary};
pub use store::{MetadataConnection, MetadataStore, MetadataTransaction, StoreResult};
pub use types::{
    ColumnType, EntityKind, FieldMetadata, FieldShape, FieldType, ObjectMetadata, ObjectShape,
    OnDeleteAction, RelationMetadata, RelationShape, RelationType, WorkspaceSyncContext,
    workspace_storage_key,
};
