//! Schema and metadata types.

use crate::target::{SqlNullType, SqlValue};
use serde::{Deserialize, Serialize};

/// Table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Schema name.
    pub schema: String,

    /// Table name, case preserved.
    pub name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<Column>,
}

impl Table {
    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Column names in ordinal order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Widest decimal precision that always fits `rust_decimal::Decimal`.
pub const MAX_DECIMAL_DIGITS: i32 = 28;

/// Broad category of a source data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Text,
    Numeric,
    Temporal,
    Boolean,
    Binary,
    Other,
}

impl DataKind {
    /// Classify an MSSQL data type name.
    pub fn from_mssql(data_type: &str) -> Self {
        match data_type.to_lowercase().as_str() {
            "char" | "varchar" | "nchar" | "nvarchar" | "text" | "ntext" => DataKind::Text,
            "tinyint" | "smallint" | "int" | "bigint" | "decimal" | "numeric" | "money"
            | "smallmoney" | "float" | "real" => DataKind::Numeric,
            "date" | "time" | "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" => {
                DataKind::Temporal
            }
            "bit" => DataKind::Boolean,
            "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => DataKind::Binary,
            _ => DataKind::Other,
        }
    }
}

/// Identity (auto-increment) settings of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// First value the target sequence hands out.
    pub seed: i64,
    pub increment: i64,
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Data type (e.g., "int", "varchar", "datetime2").
    pub data_type: String,

    /// Category derived from `data_type`.
    pub kind: DataKind,

    /// Maximum length for string/binary types (-1 for max).
    pub max_length: i32,

    /// Numeric precision.
    pub precision: i32,

    /// Numeric scale.
    pub scale: i32,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Default expression as reported by the source catalog.
    pub default: Option<String>,

    /// Identity settings, if the column is an identity column.
    pub identity: Option<Identity>,

    /// Ordinal position (1-based).
    pub ordinal_pos: i32,
}

impl Column {
    /// Build a column, deriving its kind from the type name.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal_pos: i32) -> Self {
        let data_type = data_type.into();
        Self {
            name: name.into(),
            kind: DataKind::from_mssql(&data_type),
            data_type,
            max_length: 0,
            precision: 0,
            scale: 0,
            is_nullable: true,
            default: None,
            identity: None,
            ordinal_pos,
        }
    }

    /// Whether the page SELECT converts a decimal column to text.
    ///
    /// `Decimal` holds at most 28 digits of scale and 96 bits of mantissa;
    /// wider SQL Server decimals go over the wire as text.
    pub fn reads_as_text(&self) -> bool {
        matches!(self.data_type.to_lowercase().as_str(), "decimal" | "numeric")
            && (self.precision > MAX_DECIMAL_DIGITS || self.scale > MAX_DECIMAL_DIGITS)
    }

    /// Expression used in the page SELECT list.
    ///
    /// CLR and variant types have no driver mapping and are read as text.
    pub fn select_expr(&self) -> String {
        let ident = quote_mssql_ident(&self.name);
        if self.reads_as_text() {
            return format!("CONVERT(VARCHAR(50), t.{}) AS {}", ident, ident);
        }
        match self.data_type.to_lowercase().as_str() {
            "xml" | "sql_variant" => format!("CONVERT(NVARCHAR(MAX), t.{}) AS {}", ident, ident),
            "hierarchyid" | "geometry" | "geography" => {
                format!("t.{}.ToString() AS {}", ident, ident)
            }
            _ => format!("t.{}", ident),
        }
    }

    /// Type hint for NULL values read from this column.
    pub fn null_type(&self) -> SqlNullType {
        match self.data_type.to_lowercase().as_str() {
            "bit" => SqlNullType::Bool,
            "tinyint" | "smallint" => SqlNullType::I16,
            "int" => SqlNullType::I32,
            "bigint" => SqlNullType::I64,
            "real" => SqlNullType::F32,
            "float" => SqlNullType::F64,
            "decimal" | "numeric" | "money" | "smallmoney" => SqlNullType::Decimal,
            "uniqueidentifier" => SqlNullType::Uuid,
            "date" => SqlNullType::Date,
            "time" => SqlNullType::Time,
            "datetime" | "datetime2" | "smalldatetime" => SqlNullType::DateTime,
            "datetimeoffset" => SqlNullType::DateTimeOffset,
            "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => SqlNullType::Bytes,
            _ => SqlNullType::String,
        }
    }
}

/// Constraint kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
}

impl ConstraintKind {
    /// Creation order: referenced keys must exist before foreign keys.
    pub const ALL: [ConstraintKind; 3] = [
        ConstraintKind::PrimaryKey,
        ConstraintKind::Unique,
        ConstraintKind::ForeignKey,
    ];

    /// Keyword used both in INFORMATION_SCHEMA and in target DDL.
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            ConstraintKind::PrimaryKey => "PRIMARY KEY",
            ConstraintKind::Unique => "UNIQUE",
            ConstraintKind::ForeignKey => "FOREIGN KEY",
        }
    }
}

/// Referential action of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// Parse a catalog rule. Accepts both `SET NULL` and `SET_NULL` spellings.
    pub fn parse(rule: &str) -> Option<Self> {
        match rule.trim().to_uppercase().replace('_', " ").as_str() {
            "NO ACTION" => Some(ReferentialAction::NoAction),
            "CASCADE" => Some(ReferentialAction::Cascade),
            "SET NULL" => Some(ReferentialAction::SetNull),
            "SET DEFAULT" => Some(ReferentialAction::SetDefault),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// Primary key, unique or foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// Constraint name.
    pub name: String,

    pub kind: ConstraintKind,

    /// Constrained columns in key order.
    pub columns: Vec<String>,

    /// Referenced table (foreign keys only).
    pub ref_table: Option<String>,

    /// Referenced columns, positionally matching `columns` (foreign keys only).
    pub ref_columns: Vec<String>,

    /// ON UPDATE action. `None` means no action.
    pub on_update: Option<ReferentialAction>,

    /// ON DELETE action. `None` means no action.
    pub on_delete: Option<ReferentialAction>,
}

/// One catalog row of a constraint query: a single constrained column.
#[derive(Debug, Clone, Default)]
pub struct ConstraintRow {
    pub name: String,
    pub column: String,
    pub ref_table: Option<String>,
    pub ref_column: Option<String>,
    pub update_rule: Option<String>,
    pub delete_rule: Option<String>,
}

/// Fold per-column catalog rows into constraints, keeping row order.
///
/// Rows must arrive ordered by constraint name, then column position.
pub fn group_constraint_rows(kind: ConstraintKind, rows: Vec<ConstraintRow>) -> Vec<Constraint> {
    let mut constraints: Vec<Constraint> = Vec::new();

    for row in rows {
        let is_same = constraints.last().map(|c| c.name == row.name).unwrap_or(false);
        if !is_same {
            let (on_update, on_delete) = if kind == ConstraintKind::ForeignKey {
                (
                    row.update_rule.as_deref().and_then(ReferentialAction::parse),
                    row.delete_rule.as_deref().and_then(ReferentialAction::parse),
                )
            } else {
                (None, None)
            };
            constraints.push(Constraint {
                name: row.name.clone(),
                kind,
                columns: Vec::new(),
                ref_table: row.ref_table.clone().filter(|t| !t.is_empty()),
                ref_columns: Vec::new(),
                on_update,
                on_delete,
            });
        }

        if let Some(current) = constraints.last_mut() {
            current.columns.push(row.column);
            if let Some(ref_column) = row.ref_column {
                current.ref_columns.push(ref_column);
            }
        }
    }

    constraints
}

/// One key column of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub name: String,
    pub descending: bool,
}

impl IndexColumn {
    pub fn asc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descending: false,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descending: true,
        }
    }
}

/// Secondary index metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Source index name. Not used for the target name.
    pub name: String,

    /// Whether the index is unique.
    pub is_unique: bool,

    /// Key columns in key order.
    pub columns: Vec<IndexColumn>,

    /// Included columns (non-key).
    pub include_cols: Vec<String>,
}

/// One catalog row of the index query: a single key or included column.
#[derive(Debug, Clone)]
pub struct IndexRow {
    pub name: String,
    pub is_unique: bool,
    pub column: String,
    pub descending: bool,
    pub included: bool,
}

/// Fold per-column catalog rows into indexes, keeping row order.
pub fn group_index_rows(rows: Vec<IndexRow>) -> Vec<Index> {
    let mut indexes: Vec<Index> = Vec::new();

    for row in rows {
        if indexes.last().map(|i| i.name != row.name).unwrap_or(true) {
            indexes.push(Index {
                name: row.name.clone(),
                is_unique: row.is_unique,
                columns: Vec::new(),
                include_cols: Vec::new(),
            });
        }

        if let Some(index) = indexes.last_mut() {
            if row.included {
                index.include_cols.push(row.column);
            } else {
                index.columns.push(IndexColumn {
                    name: row.column,
                    descending: row.descending,
                });
            }
        }
    }

    indexes
}

/// Allow/deny list over table names, compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl TableFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        Self {
            include: include.iter().map(|t| t.to_lowercase()).collect(),
            exclude: exclude.iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    /// Whether a table passes the include list and is not excluded.
    pub fn allows(&self, table: &str) -> bool {
        let name = table.to_lowercase();
        if !self.include.is_empty() && !self.include.contains(&name) {
            return false;
        }
        !self.exclude.contains(&name)
    }

    /// Keep allowed tables, preserving order.
    pub fn apply(&self, tables: Vec<String>) -> Vec<String> {
        tables.into_iter().filter(|t| self.allows(t)).collect()
    }
}

/// One page of source rows.
#[derive(Debug, Clone, Default)]
pub struct RowBatch {
    /// Column names; every row is ordered the same way.
    pub columns: Vec<String>,

    pub rows: Vec<Vec<SqlValue>>,
}

impl RowBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Quote an MSSQL identifier.
pub fn quote_mssql_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}
