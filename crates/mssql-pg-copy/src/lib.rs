//! # mssql-pg-copy
//!
//! SQL Server to PostgreSQL schema translation and resumable bulk copy.
//!
//! A run reads the catalog of one source schema, recreates its tables in a
//! target PostgreSQL schema and copies their rows page by page in primary
//! key order. Keys, foreign keys and secondary indexes are created after the
//! rows are in place, followed by optional login roles.
//!
//! - **Type mapping** of columns, defaults and identity seeds
//! - **Resumable copy**: a rerun continues after the rows already present
//! - **Per-object failures** are reported without stopping the run
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_pg_copy::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mssql_pg_copy::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run(CancellationToken::new()).await?;
//!     println!("Copied {} rows", result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod ddl;
pub mod error;
pub mod orchestrator;
pub mod source;
pub mod target;
pub mod transfer;
pub mod typemap;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig, TasksConfig};
pub use error::{MigrateError, Result};
pub use orchestrator::{
    DryRunReport, HealthCheckResult, MigrationResult, Orchestrator, Stage, StageOutcome,
};
pub use source::{MssqlPool, SourcePool, Table};
pub use target::{PgPool, SqlValue, TargetPool};
pub use transfer::{TransferConfig, TransferEngine, TransferJob, TransferStats};
pub use typemap::{ColumnTypePolicy, PostgresTypeMap};
