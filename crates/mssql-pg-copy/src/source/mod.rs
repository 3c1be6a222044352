//! MSSQL source database operations.

mod types;

pub use types::*;

use crate::config::SourceConfig;
use crate::error::{with_timeout, MigrateError, Result};
use crate::target::{SqlNullType, SqlValue};
use crate::transfer::{OrderBy, PageWindow};
use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};
use uuid::Uuid;

/// Trait for source database operations.
#[async_trait]
pub trait SourcePool: Send + Sync {
    /// Base tables of a schema, ordered by name.
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>>;

    /// Columns of a table in ordinal order.
    async fn load_columns(&self, schema: &str, table: &str) -> Result<Vec<Column>>;

    /// Constraints of one kind, each with its columns in key order.
    async fn load_constraints(
        &self,
        schema: &str,
        table: &str,
        kind: ConstraintKind,
    ) -> Result<Vec<Constraint>>;

    /// Primary key columns in key order, with descending markers.
    async fn load_primary_key_order(&self, schema: &str, table: &str) -> Result<Vec<IndexColumn>>;

    /// Secondary indexes, excluding those backing primary key and unique constraints.
    async fn load_indexes(&self, schema: &str, table: &str) -> Result<Vec<Index>>;

    /// Fetch one ordered page of rows.
    async fn fetch_page(
        &self,
        table: &Table,
        order_by: &OrderBy,
        window: PageWindow,
    ) -> Result<RowBatch>;

    /// Round-trip a trivial query.
    async fn ping(&self) -> Result<()>;

    /// Get the database type.
    fn db_type(&self) -> &str;

    /// Load a table descriptor with its columns.
    async fn load_table(&self, schema: &str, table: &str) -> Result<Table> {
        let columns = self.load_columns(schema, table).await?;
        Ok(Table {
            schema: schema.to_string(),
            name: table.to_string(),
            columns,
        })
    }
}

const LIST_TABLES_SQL: &str = r#"
    SELECT TABLE_NAME
    FROM INFORMATION_SCHEMA.TABLES
    WHERE TABLE_TYPE = 'BASE TABLE'
      AND TABLE_SCHEMA = @P1
    ORDER BY TABLE_NAME
"#;

const COLUMNS_SQL: &str = r#"
    SELECT
        c.COLUMN_NAME,
        c.DATA_TYPE,
        CAST(ISNULL(c.CHARACTER_MAXIMUM_LENGTH, 0) AS INT),
        CAST(ISNULL(c.NUMERIC_PRECISION, 0) AS INT),
        CAST(ISNULL(c.NUMERIC_SCALE, 0) AS INT),
        CAST(CASE WHEN c.IS_NULLABLE = 'YES' THEN 1 ELSE 0 END AS INT),
        c.COLUMN_DEFAULT,
        CAST(CASE WHEN ic.column_id IS NULL THEN 0 ELSE 1 END AS INT),
        CAST(COALESCE(
            CAST(ic.last_value AS BIGINT) + CAST(ic.increment_value AS BIGINT),
            CAST(ic.seed_value AS BIGINT),
            1) AS BIGINT),
        CAST(COALESCE(CAST(ic.increment_value AS BIGINT), 1) AS BIGINT),
        CAST(c.ORDINAL_POSITION AS INT)
    FROM INFORMATION_SCHEMA.COLUMNS c
    LEFT JOIN sys.identity_columns ic
        ON ic.object_id = OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME))
       AND ic.name = c.COLUMN_NAME
    WHERE c.TABLE_SCHEMA = @P1 AND c.TABLE_NAME = @P2
    ORDER BY c.ORDINAL_POSITION
"#;

const KEY_CONSTRAINTS_SQL: &str = r#"
    SELECT tc.CONSTRAINT_NAME, kcu.COLUMN_NAME
    FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
        ON kcu.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA
       AND kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
       AND kcu.TABLE_NAME = tc.TABLE_NAME
    WHERE tc.TABLE_SCHEMA = @P1
      AND tc.TABLE_NAME = @P2
      AND tc.CONSTRAINT_TYPE = @P3
    ORDER BY tc.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
"#;

const FOREIGN_KEYS_SQL: &str = r#"
    SELECT
        fk.name,
        pc.name,
        rt.name,
        rc.name,
        fk.update_referential_action_desc,
        fk.delete_referential_action_desc
    FROM sys.foreign_keys fk
    JOIN sys.tables pt ON fk.parent_object_id = pt.object_id
    JOIN sys.schemas ps ON pt.schema_id = ps.schema_id
    JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
    JOIN sys.columns pc
        ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id
    JOIN sys.tables rt ON rt.object_id = fk.referenced_object_id
    JOIN sys.columns rc
        ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id
    WHERE ps.name = @P1 AND pt.name = @P2
    ORDER BY fk.name, fkc.constraint_column_id
"#;

const PRIMARY_KEY_ORDER_SQL: &str = r#"
    SELECT c.name, ic.is_descending_key
    FROM sys.indexes i
    JOIN sys.tables t ON i.object_id = t.object_id
    JOIN sys.schemas s ON t.schema_id = s.schema_id
    JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
    JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
    WHERE s.name = @P1 AND t.name = @P2 AND i.is_primary_key = 1
    ORDER BY ic.key_ordinal
"#;

// Rowstore clustered and nonclustered only; xml, spatial and columnstore
// indexes have no PostgreSQL equivalent. Partitioning columns that SQL Server
// adds to nonclustered indexes on its own (key_ordinal 0, not included) are
// left out.
const INDEXES_SQL: &str = r#"
    SELECT i.name, i.is_unique, c.name, ic.is_descending_key, ic.is_included_column
    FROM sys.indexes i
    JOIN sys.tables t ON i.object_id = t.object_id
    JOIN sys.schemas s ON t.schema_id = s.schema_id
    JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
    JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
    WHERE s.name = @P1 AND t.name = @P2
      AND i.type IN (1, 2)
      AND i.is_primary_key = 0
      AND i.is_unique_constraint = 0
      AND i.is_hypothetical = 0
      AND (ic.key_ordinal > 0 OR ic.is_included_column = 1)
    ORDER BY i.name, ic.is_included_column, ic.key_ordinal, ic.index_column_id
"#;

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: SourceConfig,
}

impl TiberiusConnectionManager {
    fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.application_name("mssql-pg-copy");
        config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));

        if self.config.encryption_enabled() {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// MSSQL source pool implementation with connection pooling.
pub struct MssqlPool {
    pool: Pool<TiberiusConnectionManager>,
    command_timeout: Duration,
}

impl MssqlPool {
    /// Create a new MSSQL source pool and test one connection.
    pub async fn new(config: &SourceConfig, max_size: u32, command_timeout: Duration) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .await
            .map_err(|e| MigrateError::pool(e, "creating MSSQL pool"))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| MigrateError::pool(e, "connecting to MSSQL"))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            "Connected to MSSQL: {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, max_size
        );

        Ok(Self {
            pool,
            command_timeout,
        })
    }

    /// Get a pooled connection.
    async fn get_client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting MSSQL connection"))
    }

    /// Run a parameterized query on one pooled connection and collect the first result set.
    async fn query_rows(&self, sql: &str, params: &[&str], context: &str) -> Result<Vec<Row>> {
        let mut client = self.get_client().await?;

        let mut query = Query::new(sql);
        for param in params {
            query.bind(*param);
        }

        with_timeout(self.command_timeout, context, async {
            let stream = query.query(&mut client).await?;
            Ok(stream.into_first_result().await?)
        })
        .await
    }

    /// Catalog query for one table; failures become introspection errors.
    async fn catalog_rows(&self, schema: &str, table: &str, sql: &str, extra: &[&str]) -> Result<Vec<Row>> {
        let full_name = format!("{}.{}", schema, table);
        let mut params = vec![schema, table];
        params.extend_from_slice(extra);

        self.query_rows(sql, &params, &full_name)
            .await
            .map_err(|e| MigrateError::introspection(&full_name, e))
    }
}

#[async_trait]
impl SourcePool for MssqlPool {
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let rows = self
            .query_rows(LIST_TABLES_SQL, &[schema], "listing tables")
            .await
            .map_err(|e| MigrateError::introspection(schema, e))?;

        let tables = rows
            .iter()
            .map(|row| get_string(row, 0))
            .collect::<Result<Vec<_>>>()?;

        debug!("Found {} tables in schema {}", tables.len(), schema);
        Ok(tables)
    }

    async fn load_columns(&self, schema: &str, table: &str) -> Result<Vec<Column>> {
        let rows = self.catalog_rows(schema, table, COLUMNS_SQL, &[]).await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut column = Column::new(get_string(row, 0)?, get_string(row, 1)?, get_i32(row, 10)?);
            column.max_length = get_i32(row, 2)?;
            column.precision = get_i32(row, 3)?;
            column.scale = get_i32(row, 4)?;
            column.is_nullable = get_i32(row, 5)? == 1;
            column.default = get_opt_string(row, 6)?;
            if get_i32(row, 7)? == 1 {
                column.identity = Some(Identity {
                    seed: get_i64(row, 8)?,
                    increment: get_i64(row, 9)?,
                });
            }
            columns.push(column);
        }

        debug!("Loaded {} columns for {}.{}", columns.len(), schema, table);
        Ok(columns)
    }

    async fn load_constraints(
        &self,
        schema: &str,
        table: &str,
        kind: ConstraintKind,
    ) -> Result<Vec<Constraint>> {
        let rows = match kind {
            ConstraintKind::PrimaryKey | ConstraintKind::Unique => {
                let rows = self
                    .catalog_rows(schema, table, KEY_CONSTRAINTS_SQL, &[kind.sql_keyword()])
                    .await?;
                rows.iter()
                    .map(|row| {
                        Ok(ConstraintRow {
                            name: get_string(row, 0)?,
                            column: get_string(row, 1)?,
                            ..Default::default()
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            ConstraintKind::ForeignKey => {
                let rows = self.catalog_rows(schema, table, FOREIGN_KEYS_SQL, &[]).await?;
                rows.iter()
                    .map(|row| {
                        Ok(ConstraintRow {
                            name: get_string(row, 0)?,
                            column: get_string(row, 1)?,
                            ref_table: get_opt_string(row, 2)?,
                            ref_column: get_opt_string(row, 3)?,
                            update_rule: get_opt_string(row, 4)?,
                            delete_rule: get_opt_string(row, 5)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            }
        };

        let constraints = group_constraint_rows(kind, rows);
        debug!(
            "Loaded {} {} constraints for {}.{}",
            constraints.len(),
            kind.sql_keyword(),
            schema,
            table
        );
        Ok(constraints)
    }

    async fn load_primary_key_order(&self, schema: &str, table: &str) -> Result<Vec<IndexColumn>> {
        let rows = self
            .catalog_rows(schema, table, PRIMARY_KEY_ORDER_SQL, &[])
            .await?;

        rows.iter()
            .map(|row| {
                Ok(IndexColumn {
                    name: get_string(row, 0)?,
                    descending: get_bool(row, 1)?,
                })
            })
            .collect()
    }

    async fn load_indexes(&self, schema: &str, table: &str) -> Result<Vec<Index>> {
        let rows = self.catalog_rows(schema, table, INDEXES_SQL, &[]).await?;

        let index_rows = rows
            .iter()
            .map(|row| {
                Ok(IndexRow {
                    name: get_string(row, 0)?,
                    is_unique: get_bool(row, 1)?,
                    column: get_string(row, 2)?,
                    descending: get_bool(row, 3)?,
                    included: get_bool(row, 4)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let indexes = group_index_rows(index_rows);
        debug!("Loaded {} indexes for {}.{}", indexes.len(), schema, table);
        Ok(indexes)
    }

    async fn fetch_page(
        &self,
        table: &Table,
        order_by: &OrderBy,
        window: PageWindow,
    ) -> Result<RowBatch> {
        let sql = page_sql(table, order_by);
        let context = format!(
            "{} page {} (offset {}, limit {})",
            table.full_name(),
            window.page_index,
            window.offset,
            window.limit
        );

        let mut client = self.get_client().await?;
        let mut query = Query::new(sql);
        query.bind(window.offset as i64);
        query.bind(window.limit as i64);

        let rows = with_timeout(self.command_timeout, &context, async {
            let stream = query.query(&mut client).await?;
            Ok(stream.into_first_result().await?)
        })
        .await?;

        let mut batch = RowBatch {
            columns: table.column_names(),
            rows: Vec::with_capacity(rows.len()),
        };

        for row in &rows {
            let values = table
                .columns
                .iter()
                .enumerate()
                .map(|(idx, col)| convert_row_value(row, idx, col))
                .collect::<Result<Vec<_>>>()?;
            batch.rows.push(values);
        }

        debug!("Fetched {} rows for {}", batch.len(), context);
        Ok(batch)
    }

    async fn ping(&self) -> Result<()> {
        let mut client = self.get_client().await?;
        with_timeout(self.command_timeout, "SELECT 1", async {
            client.simple_query("SELECT 1").await?.into_row().await?;
            Ok(())
        })
        .await
    }

    fn db_type(&self) -> &str {
        "mssql"
    }
}

/// Ordered page query; offset and row count are bound as `@P1` and `@P2`.
pub fn page_sql(table: &Table, order_by: &OrderBy) -> String {
    let select_list = table
        .columns
        .iter()
        .map(|c| c.select_expr())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT {} FROM {}.{} t ORDER BY {} OFFSET @P1 ROWS FETCH NEXT @P2 ROWS ONLY",
        select_list,
        quote_mssql_ident(&table.schema),
        quote_mssql_ident(&table.name),
        order_by.to_mssql()
    )
}

fn get_string(row: &Row, idx: usize) -> Result<String> {
    Ok(row.try_get::<&str, _>(idx)?.unwrap_or_default().to_string())
}

fn get_opt_string(row: &Row, idx: usize) -> Result<Option<String>> {
    Ok(row.try_get::<&str, _>(idx)?.map(str::to_string))
}

fn get_i32(row: &Row, idx: usize) -> Result<i32> {
    Ok(row.try_get::<i32, _>(idx)?.unwrap_or(0))
}

fn get_i64(row: &Row, idx: usize) -> Result<i64> {
    Ok(row.try_get::<i64, _>(idx)?.unwrap_or(0))
}

fn get_bool(row: &Row, idx: usize) -> Result<bool> {
    Ok(row.try_get::<bool, _>(idx)?.unwrap_or(false))
}

/// Value of a numeric read as text. Digits beyond what `Decimal` holds stay
/// as text and PostgreSQL casts the quoted literal on insert.
fn wide_numeric_value(text: &str) -> SqlValue {
    let text = text.trim();
    Decimal::from_str_exact(text)
        .map(SqlValue::Decimal)
        .unwrap_or_else(|_| SqlValue::Other(text.to_string()))
}

/// Read one cell as the value type matching the column's declared type.
fn convert_row_value(row: &Row, idx: usize, column: &Column) -> Result<SqlValue> {
    let null = SqlValue::Null(column.null_type());

    let value = match column.data_type.to_lowercase().as_str() {
        "bit" => row.try_get::<bool, _>(idx)?.map(SqlValue::Bool),
        "tinyint" => row.try_get::<u8, _>(idx)?.map(|v| SqlValue::I16(i16::from(v))),
        "smallint" => row.try_get::<i16, _>(idx)?.map(SqlValue::I16),
        "int" => row.try_get::<i32, _>(idx)?.map(SqlValue::I32),
        "bigint" => row.try_get::<i64, _>(idx)?.map(SqlValue::I64),
        "real" => row.try_get::<f32, _>(idx)?.map(SqlValue::F32),
        "float" => row.try_get::<f64, _>(idx)?.map(SqlValue::F64),
        "decimal" | "numeric" if column.reads_as_text() => {
            row.try_get::<&str, _>(idx)?.map(wide_numeric_value)
        }
        "decimal" | "numeric" => row.try_get::<Decimal, _>(idx)?.map(SqlValue::Decimal),
        // Money arrives as a float; keep exact decimal text where it converts.
        "money" | "smallmoney" => row.try_get::<f64, _>(idx)?.map(|f| {
            Decimal::try_from(f)
                .map(|d| SqlValue::Decimal(d.round_dp(4)))
                .unwrap_or(SqlValue::F64(f))
        }),
        "uniqueidentifier" => row.try_get::<Uuid, _>(idx)?.map(SqlValue::Uuid),
        "date" => row.try_get::<NaiveDate, _>(idx)?.map(SqlValue::Date),
        "time" => row.try_get::<NaiveTime, _>(idx)?.map(SqlValue::Time),
        "datetime" | "datetime2" | "smalldatetime" => {
            row.try_get::<NaiveDateTime, _>(idx)?.map(SqlValue::DateTime)
        }
        "datetimeoffset" => row
            .try_get::<DateTime<FixedOffset>, _>(idx)?
            .map(SqlValue::DateTimeOffset),
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => row
            .try_get::<&[u8], _>(idx)?
            .map(|v| SqlValue::Bytes(v.to_vec())),
        _ if column.kind == DataKind::Other => row
            .try_get::<&str, _>(idx)?
            .map(|s| SqlValue::Other(s.to_string())),
        _ => row
            .try_get::<&str, _>(idx)?
            .map(|s| SqlValue::String(s.to_string())),
    };

    Ok(value.unwrap_or(null))
}
