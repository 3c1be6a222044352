//! PostgreSQL target database operations.

pub mod literal;

pub use literal::{escape_sql_string, sql_value_to_literal};

use crate::config::TargetConfig;
use crate::error::{with_timeout, MigrateError, Result};
use crate::source::RowBatch;
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::time::Duration;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, info};

/// Trait for target database operations.
#[async_trait]
pub trait TargetPool: Send + Sync {
    /// Execute one or more statements as a single batch on one connection.
    async fn execute_batch(&self, sql: &str) -> Result<()>;

    /// Check whether a login role exists.
    async fn role_exists(&self, role: &str) -> Result<bool>;

    /// Get the row count for a table.
    async fn get_row_count(&self, schema: &str, table: &str) -> Result<i64>;

    /// Write one page of rows with multi-row INSERT statements of at most
    /// `insert_batch_size` rows each, all on the same connection.
    async fn insert_rows(
        &self,
        schema: &str,
        table: &str,
        batch: &RowBatch,
        insert_batch_size: usize,
    ) -> Result<u64>;

    /// Round-trip a trivial query.
    async fn ping(&self) -> Result<()>;

    /// Get the database type.
    fn db_type(&self) -> &str;
}

/// SQL value enum for type-safe row handling.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null(SqlNullType),
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Decimal(rust_decimal::Decimal),
    DateTime(chrono::NaiveDateTime),
    DateTimeOffset(chrono::DateTime<chrono::FixedOffset>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    /// Source types without a driver mapping, read as text.
    Other(String),
}

/// Type hint carried by NULL values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlNullType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    String,
    Bytes,
    Uuid,
    Decimal,
    DateTime,
    DateTimeOffset,
    Date,
    Time,
}

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Fully qualify a table name.
pub fn qualify_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// PostgreSQL target pool implementation.
pub struct PgPool {
    pool: Pool,
    command_timeout: Duration,
}

impl PgPool {
    /// Create a new PostgreSQL target pool and test one connection.
    pub async fn new(
        config: &TargetConfig,
        max_conns: usize,
        command_timeout: Duration,
    ) -> Result<Self> {
        let pool = build_pool(config, &config.database, max_conns)?;

        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "connecting to PostgreSQL"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            pool,
            command_timeout,
        })
    }

    /// Create the target database through the `postgres` maintenance
    /// database when it does not exist yet. Returns true when it was created.
    pub async fn ensure_database(config: &TargetConfig, command_timeout: Duration) -> Result<bool> {
        let pool = build_pool(config, "postgres", 1)?;
        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "connecting to the postgres database"))?;

        let exists = with_timeout(command_timeout, "checking pg_database", async {
            let row = client
                .query_opt(
                    "SELECT 1 FROM pg_database WHERE datname = $1",
                    &[&config.database],
                )
                .await?;
            Ok(row.is_some())
        })
        .await?;

        if exists {
            debug!("Database '{}' already exists", config.database);
            return Ok(false);
        }

        let sql = format!("CREATE DATABASE {}", quote_ident(&config.database));
        with_timeout(command_timeout, &sql, async {
            client.batch_execute(&sql).await?;
            Ok(())
        })
        .await?;

        info!("Created database '{}'", config.database);
        Ok(true)
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting PostgreSQL connection"))
    }
}

fn build_pool(config: &TargetConfig, database: &str, max_conns: usize) -> Result<Pool> {
    let mut pg_config = PgConfig::new();
    pg_config.host(&config.host);
    pg_config.port(config.port);
    pg_config.dbname(database);
    pg_config.user(&config.user);
    pg_config.password(&config.password);
    pg_config.application_name("mssql-pg-copy");

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
    Pool::builder(mgr)
        .max_size(max_conns)
        .build()
        .map_err(|e| MigrateError::pool(e, "creating PostgreSQL pool"))
}

#[async_trait]
impl TargetPool for PgPool {
    async fn execute_batch(&self, sql: &str) -> Result<()> {
        let client = self.client().await?;
        with_timeout(self.command_timeout, sql, async {
            client.batch_execute(sql).await?;
            Ok(())
        })
        .await?;

        debug!("Executed: {}", sql);
        Ok(())
    }

    async fn role_exists(&self, role: &str) -> Result<bool> {
        let client = self.client().await?;
        with_timeout(self.command_timeout, "checking pg_roles", async {
            let row = client
                .query_opt("SELECT 1 FROM pg_roles WHERE rolname = $1", &[&role])
                .await?;
            Ok(row.is_some())
        })
        .await
    }

    async fn get_row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let client = self.client().await?;
        let sql = format!("SELECT COUNT(*) FROM {}", qualify_table(schema, table));
        with_timeout(self.command_timeout, &sql, async {
            let row = client.query_one(&sql, &[]).await?;
            Ok(row.get(0))
        })
        .await
    }

    async fn insert_rows(
        &self,
        schema: &str,
        table: &str,
        batch: &RowBatch,
        insert_batch_size: usize,
    ) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let client = self.client().await?;
        let mut inserted = 0u64;

        for chunk in batch.rows.chunks(insert_batch_size.max(1)) {
            let sql = build_insert_sql_literals(schema, table, &batch.columns, chunk);
            let context = format!("INSERT INTO {} ({} rows)", qualify_table(schema, table), chunk.len());
            inserted += with_timeout(self.command_timeout, &context, async {
                Ok(client.execute(sql.as_str(), &[]).await?)
            })
            .await?;
        }

        debug!("Inserted {} rows into {}.{}", inserted, schema, table);
        Ok(inserted)
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client().await?;
        with_timeout(self.command_timeout, "SELECT 1", async {
            client.simple_query("SELECT 1").await?;
            Ok(())
        })
        .await
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

/// Build INSERT SQL with literal values (no parameters).
pub fn build_insert_sql_literals(
    schema: &str,
    table: &str,
    cols: &[String],
    rows: &[Vec<SqlValue>],
) -> String {
    let col_list: String = cols
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let value_rows: Vec<String> = rows
        .iter()
        .map(|row| {
            let values: Vec<String> = row.iter().map(sql_value_to_literal).collect();
            format!("({})", values.join(", "))
        })
        .collect();

    format!(
        "insert into {} ({}) values {}",
        qualify_table(schema, table),
        col_list,
        value_rows.join(", ")
    )
}
