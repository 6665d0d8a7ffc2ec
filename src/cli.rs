//! Command-line interface for running workspace syncs against a DuckDB store.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use workspace_sync_config::WorkspaceSyncConfig;
use workspace_sync_duckdb::{DuckDbFeatureFlagResolver, DuckDbMetadataStore, DuckDbMigrationRunner};
use workspace_sync_metadata::{
    standard_schema, FeatureFlagMap, FileLogSink, MetadataStore, SyncOptions,
    WorkspaceSyncContext, WorkspaceSyncMetadataService,
};

#[derive(Parser, Debug)]
#[command(name = "workspace-sync")]
#[command(version)]
#[command(about = "Synchronize standard workspace metadata and generate migrations", long_about = None)]
pub struct Cli {
    /// Path to a config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Reconcile a workspace against the standard schema
    Sync {
        #[arg(long)]
        workspace_id: String,

        #[arg(long)]
        data_source_id: String,

        /// Compute and log the diff without applying it
        #[arg(long)]
        dry_run: bool,
    },

    /// List migrations waiting to be applied
    Pending {
        #[arg(long)]
        workspace_id: String,
    },

    /// Enable or disable a feature flag for a workspace
    Flag {
        #[arg(long)]
        workspace_id: String,

        #[arg(long)]
        key: String,

        #[arg(long, action = ArgAction::Set)]
        enabled: bool,
    },

    /// Print the built-in standard schema
    Schema,
}

impl Cli {
    pub fn load_config(&self) -> Result<WorkspaceSyncConfig> {
        let config = match &self.config {
            Some(path) => WorkspaceSyncConfig::load_from(path),
            None => WorkspaceSyncConfig::load(),
        };
        config.context("Failed to load configuration")
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
pub fn init_tracing(config: &WorkspaceSyncConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Configured defaults with the workspace's overrides applied.
pub fn flag_defaults(config: &WorkspaceSyncConfig, workspace_id: &str) -> FeatureFlagMap {
    let defaults: FeatureFlagMap = config.feature_flags.defaults.clone().into();
    match config.feature_flags.workspaces.get(workspace_id) {
        Some(overrides) => defaults.merged(&overrides.clone().into()),
        None => defaults,
    }
}

/// Run `command` and return what should be printed to stdout.
pub async fn execute(command: Command, config: &WorkspaceSyncConfig) -> Result<String> {
    match command {
        Command::Schema => {
            serde_json::to_string_pretty(&standard_schema()).context("Failed to render schema")
        }
        Command::Sync {
            workspace_id,
            data_source_id,
            dry_run,
        } => {
            let store = open_store(config)?;
            let service = WorkspaceSyncMetadataService::new(
                Arc::new(store.clone()),
                Arc::new(DuckDbFeatureFlagResolver::new(
                    store.clone(),
                    flag_defaults(config, &workspace_id),
                )),
                Arc::new(DuckDbMigrationRunner::new(store)),
                Arc::new(FileLogSink::new(&config.logs.directory)),
            );
            let context = WorkspaceSyncContext::new(workspace_id, data_source_id);

            let report = match service.synchronize(&context, SyncOptions { dry_run }).await {
                Ok(report) => report,
                Err(e) if e.is_post_commit() => {
                    warn!("Metadata was committed; rerun sync to retry pending migrations");
                    return Err(e.into());
                }
                Err(e) => return Err(e).context("Workspace sync failed"),
            };
            serde_json::to_string_pretty(&report).context("Failed to render sync report")
        }
        Command::Pending { workspace_id } => {
            let store = open_store(config)?;
            let mut connection = store.connect().await?;
            let pending = connection
                .manager()
                .list_pending_migrations(&workspace_id)
                .await?;
            connection.release().await?;
            serde_json::to_string_pretty(&pending).context("Failed to render migrations")
        }
        Command::Flag {
            workspace_id,
            key,
            enabled,
        } => {
            let store = open_store(config)?;
            DuckDbFeatureFlagResolver::new(store, FeatureFlagMap::new())
                .set_flag(&workspace_id, &key, enabled)?;
            Ok(format!("{}={} for workspace {}", key, enabled, workspace_id))
        }
    }
}

fn open_store(config: &WorkspaceSyncConfig) -> Result<DuckDbMetadataStore> {
    DuckDbMetadataStore::open(&config.store.path).with_context(|| {
        format!(
            "Failed to open metadata store at {}",
            config.store.path.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use workspace_sync_metadata::workspace_storage_key;

    fn config_in(dir: &std::path::Path) -> WorkspaceSyncConfig {
        let mut config = WorkspaceSyncConfig::default();
        config.store.path = dir.join("metadata.duckdb");
        config.logs.directory = dir.join("logs");
        config
    }

    #[test]
    fn parses_sync_command() {
        let cli = Cli::try_parse_from([
            "workspace-sync",
            "--config",
            "/tmp/ws.toml",
            "sync",
            "--workspace-id",
            "acme",
            "--data-source-id",
            "main",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/ws.toml")));
        assert_eq!(
            cli.command,
            Command::Sync {
                workspace_id: "acme".to_string(),
                data_source_id: "main".to_string(),
                dry_run: true,
            }
        );
    }

    #[test]
    fn flag_requires_explicit_value() {
        let cli = Cli::try_parse_from([
            "workspace-sync",
            "flag",
            "--workspace-id",
            "acme",
            "--key",
            "IS_CALENDAR_ENABLED",
            "--enabled",
            "false",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Flag { enabled: false, .. }));
        assert!(Cli::try_parse_from(["workspace-sync", "flag", "--workspace-id", "acme"]).is_err());
    }

    #[test]
    fn workspace_overrides_win_over_defaults() {
        let mut config = WorkspaceSyncConfig::default();
        config
            .feature_flags
            .defaults
            .insert("IS_CALENDAR_ENABLED".to_string(), true);
        config.feature_flags.workspaces.insert(
            "acme".to_string(),
            [("IS_CALENDAR_ENABLED".to_string(), false)].into_iter().collect(),
        );

        assert!(!flag_defaults(&config, "acme").is_enabled("IS_CALENDAR_ENABLED"));
        assert!(flag_defaults(&config, "other").is_enabled("IS_CALENDAR_ENABLED"));
    }

    #[tokio::test]
    async fn dry_run_writes_a_log_and_queues_nothing() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());

        let output = execute(
            Command::Sync {
                workspace_id: "acme".to_string(),
                data_source_id: "main".to_string(),
                dry_run: true,
            },
            &config,
        )
        .await
        .unwrap();
        let report: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(report["final_state"], "DRY_RUN_ROLLBACK");
        let log_dir = dir.path().join("logs").join(workspace_storage_key("acme"));
        assert_eq!(std::fs::read_dir(log_dir).unwrap().count(), 1);

        let pending = execute(
            Command::Pending {
                workspace_id: "acme".to_string(),
            },
            &config,
        )
        .await
        .unwrap();
        assert_eq!(serde_json::from_str::<Vec<serde_json::Value>>(&pending).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn flag_then_sync_creates_gated_object() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());

        execute(
            Command::Flag {
                workspace_id: "acme".to_string(),
                key: "IS_CALENDAR_ENABLED".to_string(),
                enabled: true,
            },
            &config,
        )
        .await
        .unwrap();

        let output = execute(
            Command::Sync {
                workspace_id: "acme".to_string(),
                data_source_id: "main".to_string(),
                dry_run: false,
            },
            &config,
        )
        .await
        .unwrap();
        let report: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(report["final_state"], "DONE");
        let names: Vec<&str> = report["migrations"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|m| m["name"].as_str())
            .collect();
        assert!(names.contains(&"create-calendarEvent"));
    }
}
