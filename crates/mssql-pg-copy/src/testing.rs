//! In-memory pools for unit tests.

use crate::error::{MigrateError, Result};
use crate::source::{
    Column, Constraint, ConstraintKind, Index, IndexColumn, RowBatch, SourcePool, Table,
};
use crate::target::{SqlValue, TargetPool};
use crate::transfer::{OrderBy, PageWindow};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

/// Orders the value kinds the fakes hold, with NULL first like SQL Server.
fn compare_values(a: &SqlValue, b: &SqlValue) -> Ordering {
    match (a, b) {
        (SqlValue::Null(_), SqlValue::Null(_)) => Ordering::Equal,
        (SqlValue::Null(_), _) => Ordering::Less,
        (_, SqlValue::Null(_)) => Ordering::Greater,
        (SqlValue::I16(x), SqlValue::I16(y)) => x.cmp(y),
        (SqlValue::I32(x), SqlValue::I32(y)) => x.cmp(y),
        (SqlValue::I64(x), SqlValue::I64(y)) => x.cmp(y),
        (SqlValue::String(x), SqlValue::String(y)) => x.cmp(y),
        (SqlValue::Decimal(x), SqlValue::Decimal(y)) => x.cmp(y),
        (SqlValue::DateTime(x), SqlValue::DateTime(y)) => x.cmp(y),
        (SqlValue::Date(x), SqlValue::Date(y)) => x.cmp(y),
        (x, y) => panic!("fake source cannot order {:?} against {:?}", x, y),
    }
}

/// One source table. Rows may be stored in any order; pages are served
/// sorted by the requested ORDER BY.
#[derive(Default, Clone)]
pub struct FakeTable {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<SqlValue>>,
    pub primary_key: Vec<IndexColumn>,
    pub constraints: Vec<Constraint>,
    pub indexes: Vec<Index>,
}

#[derive(Default)]
pub struct FakeSource {
    pub tables: BTreeMap<String, FakeTable>,
    pub fail_columns_for: Option<String>,
    pub windows: Mutex<Vec<(String, PageWindow)>>,
}

impl FakeSource {
    pub fn with_table(mut self, name: &str, table: FakeTable) -> Self {
        self.tables.insert(name.to_string(), table);
        self
    }

    pub fn windows_for(&self, table: &str) -> Vec<PageWindow> {
        self.windows
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, w)| *w)
            .collect()
    }

    fn table(&self, name: &str) -> Result<&FakeTable> {
        self.tables
            .get(name)
            .ok_or_else(|| MigrateError::introspection(name, "no such table"))
    }
}

#[async_trait]
impl SourcePool for FakeSource {
    async fn list_tables(&self, _schema: &str) -> Result<Vec<String>> {
        Ok(self.tables.keys().cloned().collect())
    }

    async fn load_columns(&self, schema: &str, table: &str) -> Result<Vec<Column>> {
        if self.fail_columns_for.as_deref() == Some(table) {
            return Err(MigrateError::introspection(
                format!("{}.{}", schema, table),
                "catalog unavailable",
            ));
        }
        Ok(self.table(table)?.columns.clone())
    }

    async fn load_constraints(
        &self,
        _schema: &str,
        table: &str,
        kind: ConstraintKind,
    ) -> Result<Vec<Constraint>> {
        Ok(self
            .table(table)?
            .constraints
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect())
    }

    async fn load_primary_key_order(&self, _schema: &str, table: &str) -> Result<Vec<IndexColumn>> {
        Ok(self.table(table)?.primary_key.clone())
    }

    async fn load_indexes(&self, _schema: &str, table: &str) -> Result<Vec<Index>> {
        Ok(self.table(table)?.indexes.clone())
    }

    async fn fetch_page(
        &self,
        table: &Table,
        order_by: &OrderBy,
        window: PageWindow,
    ) -> Result<RowBatch> {
        self.windows
            .lock()
            .unwrap()
            .push((table.name.clone(), window));

        let mut rows = self.table(&table.name)?.rows.clone();
        let keys: Vec<(usize, bool)> = order_by
            .columns()
            .iter()
            .map(|key| {
                let idx = table
                    .columns
                    .iter()
                    .position(|c| c.name == key.name)
                    .unwrap_or_else(|| panic!("order column {} not in {}", key.name, table.name));
                (idx, key.descending)
            })
            .collect();
        rows.sort_by(|a, b| {
            keys.iter()
                .map(|&(idx, descending)| {
                    let ord = compare_values(&a[idx], &b[idx]);
                    if descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                })
                .find(|ord| ord.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        let start = (window.offset as usize).min(rows.len());
        let end = (start + window.limit as usize).min(rows.len());

        Ok(RowBatch {
            columns: table.column_names(),
            rows: rows[start..end].to_vec(),
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "fake-mssql"
    }
}

#[derive(Default)]
pub struct FakeTarget {
    pub rows: Mutex<HashMap<String, Vec<Vec<SqlValue>>>>,
    pub statements: Mutex<Vec<String>>,
    pub insert_sizes: Mutex<Vec<usize>>,
    pub roles: BTreeSet<String>,
    /// Fail the Nth insert statement (0-based) across the run.
    pub fail_insert_at: Option<usize>,
    pub fail_role_lookup: bool,
}

impl FakeTarget {
    /// Pre-populate destination rows, as left behind by an earlier run.
    pub fn with_rows(self, schema: &str, table: &str, rows: Vec<Vec<SqlValue>>) -> Self {
        self.rows
            .lock()
            .unwrap()
            .insert(format!("{}.{}", schema, table), rows);
        self
    }

    pub fn rows_of(&self, schema: &str, table: &str) -> Vec<Vec<SqlValue>> {
        self.rows
            .lock()
            .unwrap()
            .get(&format!("{}.{}", schema, table))
            .cloned()
            .unwrap_or_default()
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl TargetPool for FakeTarget {
    async fn execute_batch(&self, sql: &str) -> Result<()> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(())
    }

    async fn role_exists(&self, role: &str) -> Result<bool> {
        if self.fail_role_lookup {
            return Err(MigrateError::pool("connection reset", "checking pg_roles"));
        }
        Ok(self.roles.contains(role))
    }

    async fn get_row_count(&self, schema: &str, table: &str) -> Result<i64> {
        Ok(self.rows_of(schema, table).len() as i64)
    }

    async fn insert_rows(
        &self,
        schema: &str,
        table: &str,
        batch: &RowBatch,
        insert_batch_size: usize,
    ) -> Result<u64> {
        let mut inserted = 0u64;
        for chunk in batch.rows.chunks(insert_batch_size.max(1)) {
            let attempt = {
                let mut sizes = self.insert_sizes.lock().unwrap();
                sizes.push(chunk.len());
                sizes.len() - 1
            };
            if self.fail_insert_at == Some(attempt) {
                return Err(MigrateError::Config("insert rejected".into()));
            }

            self.rows
                .lock()
                .unwrap()
                .entry(format!("{}.{}", schema, table))
                .or_default()
                .extend(chunk.iter().cloned());
            inserted += chunk.len() as u64;
        }
        Ok(inserted)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "fake-postgres"
    }
}

/// Rows `(Id int, Name nvarchar)` numbered from 1.
pub fn numbered_rows(count: usize) -> Vec<Vec<SqlValue>> {
    (1..=count)
        .map(|i| vec![SqlValue::I32(i as i32), SqlValue::String(format!("row {}", i))])
        .collect()
}

/// `Orders`-shaped table: `Id int` primary key plus a text column.
pub fn keyed_table(rows: usize) -> FakeTable {
    let mut id = Column::new("Id", "int", 1);
    id.is_nullable = false;
    FakeTable {
        columns: vec![id, Column::new("Name", "nvarchar", 2)],
        rows: numbered_rows(rows),
        primary_key: vec![IndexColumn::asc("Id")],
        ..Default::default()
    }
}
