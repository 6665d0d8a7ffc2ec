//! Configuration for the workspace-sync binary.
//!
//! Settings come from a TOML file (by default in the platform config
//! directory) and can be overridden through environment variables.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const ENV_DATABASE_PATH: &str = "WORKSPACE_SYNC_DB";
pub const ENV_LOG_DIRECTORY: &str = "WORKSPACE_SYNC_LOG_DIR";
pub const ENV_LOG_FILTER: &str = "WORKSPACE_SYNC_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "workspace-sync", "workspace-sync")
}

fn data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Metadata database settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// DuckDB database file
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("metadata.duckdb"),
        }
    }
}

/// Where dry-run logs are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub directory: PathBuf,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            directory: data_dir().join("sync-logs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `workspace_sync_metadata=debug`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Flag defaults and per-workspace overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlagsConfig {
    pub defaults: BTreeMap<String, bool>,
    pub workspaces: BTreeMap<String, BTreeMap<String, bool>>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSyncConfig {
    pub store: StoreConfig,
    pub logs: LogsConfig,
    pub logging: LoggingConfig,
    pub feature_flags: FeatureFlagsConfig,
}

impl WorkspaceSyncConfig {
    /// Platform config file location, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                let mut config = Self::default();
                config.apply_env_overrides();
                Ok(config)
            }
        }
    }

    /// Load from `path`. A missing file yields defaults; a malformed one is an error.
    /// Environment overrides are applied in both cases.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(ENV_DATABASE_PATH) {
            self.store.path = PathBuf::from(path);
        }
        if let Ok(directory) = std::env::var(ENV_LOG_DIRECTORY) {
            self.logs.directory = PathBuf::from(directory);
        }
        if let Ok(filter) = std::env::var(ENV_LOG_FILTER) {
            self.logging.filter = filter;
        }
    }
}
