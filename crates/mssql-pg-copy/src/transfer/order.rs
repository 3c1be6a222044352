//! Row order used for paging.

use crate::error::{MigrateError, Result};
use crate::source::{quote_mssql_ident, IndexColumn, Table};
use tracing::warn;

/// ORDER BY key for a table's pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    columns: Vec<IndexColumn>,
    primary_key: bool,
}

impl OrderBy {
    /// Order by the primary key, or by the first sortable column when there
    /// is none.
    ///
    /// The fallback is deterministic but only stable across runs if that
    /// column's values are unique.
    pub fn derive(table: &Table, primary_key: Vec<IndexColumn>) -> Result<Self> {
        if !primary_key.is_empty() {
            return Ok(Self {
                columns: primary_key,
                primary_key: true,
            });
        }

        if table.columns.is_empty() {
            return Err(MigrateError::copy(table.full_name(), "table has no columns"));
        }

        let first = table
            .columns
            .iter()
            .filter(|c| is_sortable(&c.data_type))
            .min_by_key(|c| c.ordinal_pos)
            .ok_or_else(|| {
                MigrateError::copy(
                    table.full_name(),
                    "no primary key and no column SQL Server can order by",
                )
            })?;

        warn!(
            "{}: no primary key, ordering pages by first sortable column '{}'; resume is only reliable if it is unique",
            table.full_name(),
            first.name
        );

        Ok(Self {
            columns: vec![IndexColumn::asc(first.name.clone())],
            primary_key: false,
        })
    }

    /// Whether the order comes from the primary key.
    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn columns(&self) -> &[IndexColumn] {
        &self.columns
    }

    /// Render as an MSSQL ORDER BY list against alias `t`.
    pub fn to_mssql(&self) -> String {
        self.columns
            .iter()
            .map(|c| {
                let ident = format!("t.{}", quote_mssql_ident(&c.name));
                if c.descending {
                    format!("{} DESC", ident)
                } else {
                    ident
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// SQL Server rejects these types in ORDER BY.
fn is_sortable(data_type: &str) -> bool {
    !matches!(
        data_type.to_lowercase().as_str(),
        "text" | "ntext" | "image" | "xml" | "geography" | "geometry"
    )
}
