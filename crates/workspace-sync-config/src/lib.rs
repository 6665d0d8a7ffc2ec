pub mod config;

pub use config::{
    ConfigError, FeatureFlagsConfig, LoggingConfig, LogsConfig, StoreConfig, WorkspaceSyncConfig,
    ENV_DATABASE_PATH, ENV_LOG_DIRECTORY, ENV_LOG_FILTER,
};
