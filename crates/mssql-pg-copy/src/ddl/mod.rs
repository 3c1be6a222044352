//! PostgreSQL DDL generation from source descriptors.
//!
//! Every object is emitted as a drop-if-exists statement followed by its
//! create statement, so re-running a stage needs no manual cleanup. Output
//! depends only on the descriptors passed in.

use crate::error::{MigrateError, Result};
use crate::source::{Constraint, ConstraintKind, Index, ReferentialAction, Table};
use crate::target::{escape_sql_string, qualify_table, quote_ident};
use crate::typemap::ColumnTypePolicy;
use sha2::{Digest, Sha256};

/// PostgreSQL truncates identifiers longer than this many bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Statements for one object, executed together in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlBatch {
    /// Object label used in logs and errors.
    pub object: String,
    pub statements: Vec<String>,
}

impl DdlBatch {
    fn new(object: impl Into<String>, statements: Vec<String>) -> Self {
        Self {
            object: object.into(),
            statements,
        }
    }

    /// Statements joined into one script.
    pub fn to_sql(&self) -> String {
        self.statements
            .iter()
            .map(|s| format!("{};", s))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Create the target schema and hand it to its owner.
pub fn schema_ddl(schema: &str, owner: &str) -> DdlBatch {
    let name = quote_ident(schema);
    DdlBatch::new(
        format!("schema {}", schema),
        vec![
            format!("create schema if not exists {}", name),
            format!("alter schema {} owner to {}", name, quote_ident(owner)),
        ],
    )
}

/// Recreate a table with its columns in ordinal order.
pub fn table_ddl(schema: &str, table: &Table, policy: &dyn ColumnTypePolicy) -> Result<DdlBatch> {
    let object = format!("table {}.{}", schema, table.name);
    if table.columns.is_empty() {
        return Err(MigrateError::translation(object, "table has no columns"));
    }

    let mut columns: Vec<_> = table.columns.iter().collect();
    columns.sort_by_key(|c| c.ordinal_pos);

    let column_list = columns
        .iter()
        .map(|c| policy.column_definition(c))
        .collect::<Vec<_>>()
        .join(", ");

    let qualified = qualify_table(schema, &table.name);
    Ok(DdlBatch::new(
        object,
        vec![
            format!("drop table if exists {} cascade", qualified),
            format!("create table {} ({})", qualified, column_list),
        ],
    ))
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn referential_clause(keyword: &str, action: Option<ReferentialAction>) -> Option<String> {
    match action {
        None | Some(ReferentialAction::NoAction) => None,
        Some(action) => Some(format!(" on {} {}", keyword, action.as_sql())),
    }
}

/// Recreate a primary key, unique or foreign key constraint.
///
/// Referenced tables are looked up in the same target schema.
pub fn constraint_ddl(schema: &str, table: &str, constraint: &Constraint) -> Result<DdlBatch> {
    let object = format!("constraint {} on {}.{}", constraint.name, schema, table);
    if constraint.columns.is_empty() {
        return Err(MigrateError::translation(object, "constraint has no columns"));
    }

    let qualified = qualify_table(schema, table);
    let name = quote_ident(&constraint.name);

    let mut create = format!(
        "alter table {} add constraint {} {} ({})",
        qualified,
        name,
        constraint.kind.sql_keyword(),
        column_list(&constraint.columns)
    );

    if constraint.kind == ConstraintKind::ForeignKey {
        let ref_table = constraint
            .ref_table
            .as_deref()
            .ok_or_else(|| MigrateError::translation(&object, "foreign key has no referenced table"))?;

        if constraint.ref_columns.len() != constraint.columns.len() {
            return Err(MigrateError::translation(
                object,
                format!(
                    "foreign key has {} columns but references {}",
                    constraint.columns.len(),
                    constraint.ref_columns.len()
                ),
            ));
        }

        create.push_str(&format!(
            " references {} ({})",
            qualify_table(schema, ref_table),
            column_list(&constraint.ref_columns)
        ));
        if let Some(clause) = referential_clause("update", constraint.on_update) {
            create.push_str(&clause);
        }
        if let Some(clause) = referential_clause("delete", constraint.on_delete) {
            create.push_str(&clause);
        }
    }

    Ok(DdlBatch::new(
        object,
        vec![
            format!("alter table {} drop constraint if exists {} cascade", qualified, name),
            create,
        ],
    ))
}

/// Generated index name: `IX_<table>_<key columns>_<included columns>`.
///
/// Segments are lower-cased and empty segments are left out. Names over the
/// identifier limit keep a prefix and end in a hash of the full name.
pub fn index_name(table: &str, index: &Index) -> String {
    let keys = index
        .columns
        .iter()
        .map(|c| c.name.to_lowercase())
        .collect::<Vec<_>>()
        .join("_");
    let included = index
        .include_cols
        .iter()
        .map(|c| c.to_lowercase())
        .collect::<Vec<_>>()
        .join("_");

    let name = ["IX".to_string(), table.to_lowercase(), keys, included]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    shorten_identifier(&name)
}

fn shorten_identifier(name: &str) -> String {
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name.to_string();
    }

    let digest = Sha256::digest(name.as_bytes());
    let suffix = hex::encode(&digest[..4]);

    let mut cut = MAX_IDENTIFIER_LEN - suffix.len() - 1;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}_{}", &name[..cut], suffix)
}

/// Recreate a secondary index under its generated name.
pub fn index_ddl(schema: &str, table: &str, index: &Index) -> Result<DdlBatch> {
    let name = index_name(table, index);
    let object = format!("index {} on {}.{}", name, schema, table);
    if index.columns.is_empty() {
        return Err(MigrateError::translation(object, "index has no key columns"));
    }

    let keys = index
        .columns
        .iter()
        .map(|c| {
            if c.descending {
                format!("{} DESC", quote_ident(&c.name))
            } else {
                quote_ident(&c.name)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut create = format!(
        "create {}index {} on {} ({})",
        if index.is_unique { "unique " } else { "" },
        quote_ident(&name),
        qualify_table(schema, table),
        keys
    );
    if !index.include_cols.is_empty() {
        create.push_str(&format!(" include ({})", column_list(&index.include_cols)));
    }

    Ok(DdlBatch::new(
        object,
        vec![
            format!("drop index if exists {} cascade", qualify_table(schema, &name)),
            create,
        ],
    ))
}

/// Create or update a role and grant it the schema, its tables and the database.
///
/// An existing role without a password is left as is apart from the grants.
pub fn role_ddl(
    role: &str,
    password: Option<&str>,
    exists: bool,
    schema: &str,
    database: &str,
) -> DdlBatch {
    let name = quote_ident(role);
    let mut statements = Vec::new();

    let login = password
        .filter(|p| !p.is_empty())
        .map(|p| format!(" with login encrypted password '{}'", escape_sql_string(p)));

    match (exists, login) {
        (true, Some(login)) => statements.push(format!("alter role {}{}", name, login)),
        (true, None) => {}
        (false, login) => statements.push(format!(
            "create role {}{}",
            name,
            login.unwrap_or_default()
        )),
    }

    statements.push(format!(
        "grant all privileges on all tables in schema {} to {}",
        quote_ident(schema),
        name
    ));
    statements.push(format!(
        "grant all privileges on schema {} to {}",
        quote_ident(schema),
        name
    ));
    statements.push(format!(
        "grant all privileges on database {} to {}",
        quote_ident(database),
        name
    ));

    DdlBatch::new(format!("role {}", role), statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Column, IndexColumn};
    use crate::typemap::PostgresTypeMap;

    fn fk(on_update: Option<ReferentialAction>, on_delete: Option<ReferentialAction>) -> Constraint {
        Constraint {
            name: "FK_Lines_Orders".into(),
            kind: ConstraintKind::ForeignKey,
            columns: vec!["OrderId".into(), "Region".into()],
            ref_table: Some("Orders".into()),
            ref_columns: vec!["Id".into(), "Region".into()],
            on_update,
            on_delete,
        }
    }

    #[test]
    fn test_schema_ddl() {
        let ddl = schema_ddl("sales", "app_owner");
        assert_eq!(
            ddl.to_sql(),
            "create schema if not exists \"sales\";\nalter schema \"sales\" owner to \"app_owner\";"
        );
    }

    #[test]
    fn test_table_ddl_orders_columns_by_ordinal() {
        let mut id = Column::new("Id", "int", 1);
        id.is_nullable = false;
        let mut name = Column::new("Name", "nvarchar", 2);
        name.max_length = 50;
        let table = Table {
            schema: "dbo".into(),
            name: "Customers".into(),
            columns: vec![name, id],
        };

        let ddl = table_ddl("public", &table, &PostgresTypeMap).unwrap();
        assert_eq!(ddl.statements[0], "drop table if exists \"public\".\"Customers\" cascade");
        assert_eq!(
            ddl.statements[1],
            "create table \"public\".\"Customers\" (\"Id\" integer not null, \"Name\" varchar(50))"
        );
    }

    #[test]
    fn test_table_without_columns_fails() {
        let table = Table {
            schema: "dbo".into(),
            name: "Empty".into(),
            columns: Vec::new(),
        };
        let err = table_ddl("public", &table, &PostgresTypeMap).unwrap_err();
        assert!(matches!(err, MigrateError::Translation { .. }));
    }

    #[test]
    fn test_primary_key_ddl() {
        let pk = Constraint {
            name: "PK_Orders".into(),
            kind: ConstraintKind::PrimaryKey,
            columns: vec!["OrderId".into(), "LineNo".into()],
            ref_table: None,
            ref_columns: Vec::new(),
            on_update: None,
            on_delete: None,
        };

        let ddl = constraint_ddl("public", "Orders", &pk).unwrap();
        assert_eq!(
            ddl.statements,
            vec![
                "alter table \"public\".\"Orders\" drop constraint if exists \"PK_Orders\" cascade",
                "alter table \"public\".\"Orders\" add constraint \"PK_Orders\" PRIMARY KEY (\"OrderId\", \"LineNo\")",
            ]
        );
    }

    #[test]
    fn test_foreign_key_without_actions() {
        let ddl = constraint_ddl("public", "Lines", &fk(None, Some(ReferentialAction::NoAction))).unwrap();
        assert_eq!(
            ddl.statements[1],
            "alter table \"public\".\"Lines\" add constraint \"FK_Lines_Orders\" FOREIGN KEY (\"OrderId\", \"Region\") \
             references \"public\".\"Orders\" (\"Id\", \"Region\")"
        );
    }

    #[test]
    fn test_foreign_key_actions_are_independent() {
        let delete_only = constraint_ddl("public", "Lines", &fk(None, Some(ReferentialAction::Cascade))).unwrap();
        assert!(delete_only.statements[1].ends_with("(\"Id\", \"Region\") on delete CASCADE"));

        let both = constraint_ddl(
            "public",
            "Lines",
            &fk(Some(ReferentialAction::SetNull), Some(ReferentialAction::SetDefault)),
        )
        .unwrap();
        assert!(both.statements[1].ends_with(" on update SET NULL on delete SET DEFAULT"));
    }

    #[test]
    fn test_malformed_foreign_keys_fail() {
        let mut missing_ref = fk(None, None);
        missing_ref.ref_table = None;
        assert!(constraint_ddl("public", "Lines", &missing_ref).is_err());

        let mut mismatched = fk(None, None);
        mismatched.ref_columns.pop();
        assert!(matches!(
            constraint_ddl("public", "Lines", &mismatched),
            Err(MigrateError::Translation { .. })
        ));
    }

    fn index(name: &str) -> Index {
        Index {
            name: name.into(),
            is_unique: false,
            columns: vec![IndexColumn::asc("CustomerId"), IndexColumn::desc("OrderDate")],
            include_cols: vec!["Total".into()],
        }
    }

    #[test]
    fn test_index_name_ignores_source_name() {
        assert_eq!(
            index_name("Orders", &index("IX_whatever")),
            "IX_orders_customerid_orderdate_total"
        );
        assert_eq!(
            index_name("Orders", &index("IX_whatever")),
            index_name("Orders", &index("nonclustered_1"))
        );

        let mut swapped = index("x");
        swapped.columns.reverse();
        assert_ne!(index_name("Orders", &swapped), index_name("Orders", &index("x")));
    }

    #[test]
    fn test_long_index_names_are_shortened_deterministically() {
        let mut wide = index("wide");
        wide.columns = (0..12)
            .map(|i| IndexColumn::asc(format!("SomeRatherLongColumnName{}", i)))
            .collect();

        let first = index_name("Orders", &wide);
        assert!(first.len() <= MAX_IDENTIFIER_LEN);
        assert_eq!(first, index_name("Orders", &wide));

        let mut other = wide.clone();
        other.columns[11] = IndexColumn::asc("SomeRatherLongColumnNameX");
        let second = index_name("Orders", &other);
        assert_eq!(first[..50], second[..50]);
        assert_ne!(first, second);
    }

    #[test]
    fn test_index_ddl() {
        let mut idx = index("IX_1");
        idx.is_unique = true;
        let ddl = index_ddl("public", "Orders", &idx).unwrap();
        assert_eq!(
            ddl.statements,
            vec![
                "drop index if exists \"public\".\"IX_orders_customerid_orderdate_total\" cascade",
                "create unique index \"IX_orders_customerid_orderdate_total\" on \"public\".\"Orders\" \
                 (\"CustomerId\", \"OrderDate\" DESC) include (\"Total\")",
            ]
        );

        idx.include_cols.clear();
        let ddl = index_ddl("public", "Orders", &idx).unwrap();
        assert!(!ddl.statements[1].contains("include"));
    }

    #[test]
    fn test_ddl_is_repeatable() {
        let idx = index("IX_1");
        assert_eq!(
            index_ddl("public", "Orders", &idx).unwrap(),
            index_ddl("public", "Orders", &idx).unwrap()
        );

        let schema = schema_ddl("sales", "app_owner");
        assert!(schema.statements[0].starts_with("create schema if not exists "));
        assert!(schema.statements[1].starts_with("alter schema "));

        let table = Table {
            schema: "dbo".into(),
            name: "Orders".into(),
            columns: vec![Column::new("Id", "int", 1)],
        };
        let first = table_ddl("public", &table, &PostgresTypeMap).unwrap();
        assert_eq!(first, table_ddl("public", &table, &PostgresTypeMap).unwrap());
        assert!(first.statements[0].starts_with("drop table if exists "));

        let foreign = fk(None, Some(ReferentialAction::Cascade));
        let first = constraint_ddl("public", "Lines", &foreign).unwrap();
        assert_eq!(first, constraint_ddl("public", "Lines", &foreign).unwrap());
        assert!(first.statements[0].contains(" drop constraint if exists "));

        // A second run sees the role and must not try to create it again.
        let rerun = role_ddl("reader", Some("pw"), true, "sales", "shop");
        assert!(rerun.statements.iter().all(|s| !s.starts_with("create role")));
        let grants = role_ddl("reader", None, true, "sales", "shop");
        assert!(grants.statements.iter().all(|s| s.starts_with("grant ")));
    }

    #[test]
    fn test_role_ddl() {
        let created = role_ddl("reader", Some("it's"), false, "sales", "shop");
        assert_eq!(
            created.statements[0],
            "create role \"reader\" with login encrypted password 'it''s'"
        );
        assert_eq!(created.statements.len(), 4);
        assert_eq!(
            created.statements[3],
            "grant all privileges on database \"shop\" to \"reader\""
        );

        let altered = role_ddl("reader", Some("pw"), true, "sales", "shop");
        assert!(altered.statements[0].starts_with("alter role \"reader\" with login"));

        let grants_only = role_ddl("reader", None, true, "sales", "shop");
        assert_eq!(grants_only.statements.len(), 3);

        let nologin = role_ddl("auditor", None, false, "sales", "shop");
        assert_eq!(nologin.statements[0], "create role \"auditor\"");
    }
}
