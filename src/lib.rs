pub use workspace_sync_config::config;
pub use workspace_sync_duckdb as duckdb;
pub use workspace_sync_metadata::{
    error, flags, logs, memory_store, migration, object_sync, orchestrator, relation_sync,
    runner, standard, storage, store, test_utils, types,
};

pub mod cli;
