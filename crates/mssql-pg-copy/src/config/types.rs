//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Rows per source page when `migration.batch_size` is not set.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Rows per INSERT statement when `migration.insert_batch_size` is not set.
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 1_000;

/// Command timeout applied to every statement when not set.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 18_000;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (MSSQL).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Copy behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Which stages of the pipeline run.
    #[serde(default)]
    pub tasks: TasksConfig,
}

/// Source database (MSSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database type (always "mssql").
    #[serde(default = "default_mssql")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Source schema (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: "true").
    #[serde(default = "default_true_string")]
    pub encrypt: String,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type (always "postgres").
    #[serde(default = "default_postgres")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Target schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// Owner of the target schema. Defaults to `user`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Create the target database when it does not exist (default: true).
    #[serde(default = "default_true")]
    pub create_database: bool,

    /// Roles to create or update, mapped to an optional login password.
    #[serde(default)]
    pub roles: BTreeMap<String, Option<String>>,
}

impl TargetConfig {
    /// Effective owner of the target schema.
    pub fn schema_owner(&self) -> &str {
        self.owner.as_deref().unwrap_or(&self.user)
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roles: Vec<&String> = self.roles.keys().collect();
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("owner", &self.owner)
            .field("create_database", &self.create_database)
            .field("roles", &roles)
            .finish()
    }
}

/// Copy behavior configuration.
/// Sizes use Option<T> to distinguish "not set" from "explicitly set".
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MigrationConfig {
    /// Rows per source page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Rows per destination INSERT statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_batch_size: Option<usize>,

    /// Timeout applied uniformly to every statement, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,

    /// Tables to include (case-insensitive names). Empty means all.
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Tables to exclude (case-insensitive names).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Maximum MSSQL connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_source_connections: Option<u32>,

    /// Maximum PostgreSQL connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_target_connections: Option<usize>,
}

impl MigrationConfig {
    pub fn get_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn get_insert_batch_size(&self) -> usize {
        self.insert_batch_size.unwrap_or(DEFAULT_INSERT_BATCH_SIZE)
    }

    pub fn get_command_timeout(&self) -> Duration {
        Duration::from_secs(
            self.command_timeout_secs
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
        )
    }

    pub fn get_max_source_connections(&self) -> u32 {
        self.max_source_connections.unwrap_or(4)
    }

    pub fn get_max_target_connections(&self) -> usize {
        self.max_target_connections.unwrap_or(4)
    }
}

/// Stage toggles. A disabled stage is skipped entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    #[serde(default = "default_true")]
    pub create_schema: bool,

    #[serde(default = "default_true")]
    pub create_tables: bool,

    #[serde(default = "default_true")]
    pub copy_rows: bool,

    /// Primary, unique and foreign keys.
    #[serde(default = "default_true")]
    pub create_constraints: bool,

    #[serde(default = "default_true")]
    pub create_indexes: bool,

    #[serde(default)]
    pub create_roles: bool,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            create_schema: true,
            create_tables: true,
            copy_rows: true,
            create_constraints: true,
            create_indexes: true,
            create_roles: false,
        }
    }
}

// Default value functions for serde
fn default_mssql() -> String {
    "mssql".to_string()
}

fn default_postgres() -> String {
    "postgres".to_string()
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_pg_port() -> u16 {
    5432
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_true_string() -> String {
    "true".to_string()
}

fn default_true() -> bool {
    true
}
