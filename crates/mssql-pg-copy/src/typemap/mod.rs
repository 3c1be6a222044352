//! Type mapping between MSSQL and PostgreSQL.

use crate::source::Column;
use crate::target::quote_ident;
use tracing::warn;

/// Renders one column of a `create table` statement.
///
/// The DDL translator only decides statement shape; everything about a
/// single column comes from the policy.
pub trait ColumnTypePolicy: Send + Sync {
    /// Target type name.
    fn column_type(&self, column: &Column) -> String;

    /// Target default expression, if the source default translates.
    fn column_default(&self, column: &Column) -> Option<String>;

    /// Identity clause, if the column is an identity column.
    fn column_identity(&self, column: &Column) -> Option<String>;

    /// Full column fragment: name, type, default or identity, nullability.
    fn column_definition(&self, column: &Column) -> String {
        let mut def = format!("{} {}", quote_ident(&column.name), self.column_type(column));

        if let Some(identity) = self.column_identity(column) {
            def.push(' ');
            def.push_str(&identity);
        } else if let Some(default) = self.column_default(column) {
            def.push_str(" default ");
            def.push_str(&default);
        }

        if !column.is_nullable {
            def.push_str(" not null");
        }

        def
    }
}

/// Default MSSQL to PostgreSQL column policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresTypeMap;

impl ColumnTypePolicy for PostgresTypeMap {
    fn column_type(&self, column: &Column) -> String {
        mssql_to_postgres(
            &column.data_type,
            column.max_length,
            column.precision,
            column.scale,
        )
    }

    fn column_default(&self, column: &Column) -> Option<String> {
        let raw = column.default.as_deref()?;
        let converted = convert_default(raw, &column.data_type);
        if converted.is_none() {
            warn!(
                "Dropping default {} of column {}: no PostgreSQL equivalent",
                raw, column.name
            );
        }
        converted
    }

    fn column_identity(&self, column: &Column) -> Option<String> {
        let identity = column.identity?;
        if !matches!(
            self.column_type(column).as_str(),
            "smallint" | "integer" | "bigint"
        ) {
            warn!(
                "Column {} is an identity of type {}; created without identity",
                column.name, column.data_type
            );
            return None;
        }
        Some(format!(
            "generated by default as identity (start with {} increment by {})",
            identity.seed, identity.increment
        ))
    }
}

/// Map an MSSQL data type to PostgreSQL.
pub fn mssql_to_postgres(mssql_type: &str, max_length: i32, precision: i32, scale: i32) -> String {
    match mssql_type.to_lowercase().as_str() {
        // Boolean
        "bit" => "boolean".to_string(),

        // Integer types
        "tinyint" | "smallint" => "smallint".to_string(),
        "int" => "integer".to_string(),
        "bigint" => "bigint".to_string(),

        // Decimal/numeric
        "decimal" | "numeric" => {
            if precision > 0 {
                format!("numeric({},{})", precision, scale)
            } else {
                "numeric".to_string()
            }
        }
        "money" => "numeric(19,4)".to_string(),
        "smallmoney" => "numeric(10,4)".to_string(),

        // Floating point
        "float" => "double precision".to_string(),
        "real" => "real".to_string(),

        // String types
        "char" | "nchar" => {
            if max_length > 0 && max_length <= 10485760 {
                format!("char({})", max_length)
            } else {
                "text".to_string()
            }
        }
        "varchar" | "nvarchar" => {
            if max_length > 0 && max_length <= 10485760 {
                format!("varchar({})", max_length)
            } else {
                "text".to_string()
            }
        }
        "text" | "ntext" => "text".to_string(),

        // Binary types; rowversion is an opaque 8-byte counter
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => "bytea".to_string(),

        // Date/time types
        "date" => "date".to_string(),
        "time" => "time".to_string(),
        "datetime" | "datetime2" | "smalldatetime" => "timestamp".to_string(),
        "datetimeoffset" => "timestamptz".to_string(),

        "uniqueidentifier" => "uuid".to_string(),
        "xml" => "xml".to_string(),

        // geometry, geography, hierarchyid, sql_variant are read as text
        _ => "text".to_string(),
    }
}

/// Translate an MSSQL column default to a PostgreSQL expression.
///
/// Returns `None` for expressions with no known equivalent.
pub fn convert_default(expr: &str, data_type: &str) -> Option<String> {
    let inner = strip_outer_parens(expr.trim());
    let lower = inner.to_lowercase();

    match lower.as_str() {
        "getdate()" | "sysdatetime()" | "current_timestamp" | "sysdatetimeoffset()" => {
            return Some("CURRENT_TIMESTAMP".to_string())
        }
        "getutcdate()" | "sysutcdatetime()" => {
            return Some("(now() at time zone 'utc')".to_string())
        }
        "newid()" | "newsequentialid()" => return Some("gen_random_uuid()".to_string()),
        "null" => return Some("null".to_string()),
        _ => {}
    }

    if let Some(text) = string_literal(inner) {
        return Some(format!("'{}'", text));
    }

    if is_numeric_literal(inner) {
        if data_type.eq_ignore_ascii_case("bit") {
            let truthy = inner.parse::<f64>().map(|n| n != 0.0).unwrap_or(false);
            return Some(truthy.to_string());
        }
        return Some(inner.to_string());
    }

    None
}

/// Remove parentheses that wrap the whole expression, repeatedly.
fn strip_outer_parens(mut s: &str) -> &str {
    while s.starts_with('(') && s.ends_with(')') && closes_at_end(s) {
        s = s[1..s.len() - 1].trim();
    }
    s
}

/// Whether the parenthesis opening `s` is closed by its last character.
fn closes_at_end(s: &str) -> bool {
    let mut depth = 0usize;
    let mut in_string = false;
    for (i, c) in s.char_indices() {
        match c {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == s.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// Body of a `'...'` or `N'...'` literal, with doubled quotes kept doubled.
fn string_literal(s: &str) -> Option<&str> {
    let s = s
        .strip_prefix('N')
        .or_else(|| s.strip_prefix('n'))
        .unwrap_or(s);
    let body = s.strip_prefix('\'')?.strip_suffix('\'')?;
    // Every quote inside the body must be part of a doubled pair.
    if body.replace("''", "").contains('\'') {
        return None;
    }
    Some(body)
}

fn is_numeric_literal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|c| *c == '.').count() <= 1
        && digits.chars().any(|c| c.is_ascii_digit())
}
