pub mod ddl;
pub mod flags;
pub mod runner;
pub mod schema;
pub mod store;

pub use ddl::{render_table_action, workspace_schema_name};
pub use flags::DuckDbFeatureFlagResolver;
pub use runner::DuckDbMigrationRunner;
pub use schema::initialize_metadata_schema;
pub use store::{DuckDbConnection, DuckDbMetadataStore};
