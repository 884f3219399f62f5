//! SQL dialect services.
//!
//! The pipeline never hard-codes quoting or placeholder syntax; it asks a
//! [`Dialect`]. The backend family name is only used for narrow branches
//! (transaction-wrapped statement text and the `ql` row-identity fix-up).

use crate::connection::Connection;
use crate::error::Result;
use crate::value::Value;
use std::fmt;

/// Backend-specific SQL rendering rules.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Backend family name (`"postgres"`, `"sqlite3"`, `"mysql"`, `"ql"`).
    fn name(&self) -> &'static str;

    /// Quote an identifier. Dotted names are quoted per segment.
    fn quote(&self, ident: &str) -> String;

    /// Placeholder for the parameter at `index` (1-based).
    fn bind_var(&self, index: usize) -> String;

    /// Prefix used to qualify a column with its table in predicates.
    fn query_field_name(&self, quoted_table: &str) -> String {
        format!("{quoted_table}.")
    }

    /// Whether `table` has a column named `column`.
    fn has_column(&self, conn: &dyn Connection, table: &str, column: &str) -> Result<bool>;

    /// Suffix that makes an INSERT return the generated primary key.
    fn returning_suffix(&self, _quoted_table: &str, _quoted_column: &str) -> Option<String> {
        None
    }
}

/// Whether `dialect` belongs to the `ql` family.
///
/// `ql` backends need DML wrapped in explicit transaction text and use
/// `id()` rather than an `id` column for row identity.
pub fn is_ql(dialect: &dyn Dialect) -> bool {
    dialect.name().starts_with("ql")
}

/// Wrap statement text in a `ql` transaction block.
pub fn wrap_transaction_text(sql: &str) -> String {
    format!("BEGIN TRANSACTION;\n\t{sql};\nCOMMIT;")
}

/// The dialects this workspace knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuiltinDialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders, supports RETURNING)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
    /// ql dialect (unquoted identifiers, $1 placeholders, `id()` row identity)
    Ql,
}

impl BuiltinDialect {
    fn quote_segment(self, segment: &str) -> String {
        match self {
            BuiltinDialect::Postgres | BuiltinDialect::Sqlite => {
                let escaped = segment.replace('"', "\"\"");
                format!("\"{}\"", escaped)
            }
            BuiltinDialect::Mysql => {
                let escaped = segment.replace('`', "``");
                format!("`{}`", escaped)
            }
            BuiltinDialect::Ql => segment.to_string(),
        }
    }

    fn column_probe(self, table: &str, column: &str) -> (String, Vec<Value>) {
        let args = vec![Value::from(table), Value::from(column)];
        let sql = match self {
            BuiltinDialect::Postgres => "SELECT count(*) FROM information_schema.columns \
                 WHERE table_schema = CURRENT_SCHEMA() AND table_name = $1 AND column_name = $2"
                .to_string(),
            BuiltinDialect::Mysql => "SELECT count(*) FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?"
                .to_string(),
            BuiltinDialect::Ql => {
                "SELECT count() FROM __Column WHERE TableName = $1 AND Name = $2".to_string()
            }
            BuiltinDialect::Sqlite => {
                return (
                    format!("PRAGMA table_info({})", self.quote_segment(table)),
                    Vec::new(),
                );
            }
        };
        (sql, args)
    }
}

impl Dialect for BuiltinDialect {
    fn name(&self) -> &'static str {
        match self {
            BuiltinDialect::Postgres => "postgres",
            BuiltinDialect::Sqlite => "sqlite3",
            BuiltinDialect::Mysql => "mysql",
            BuiltinDialect::Ql => "ql",
        }
    }

    fn quote(&self, ident: &str) -> String {
        ident
            .split('.')
            .map(|segment| self.quote_segment(segment))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn bind_var(&self, index: usize) -> String {
        match self {
            BuiltinDialect::Postgres | BuiltinDialect::Ql => format!("${index}"),
            BuiltinDialect::Sqlite => format!("?{index}"),
            BuiltinDialect::Mysql => "?".to_string(),
        }
    }

    fn query_field_name(&self, quoted_table: &str) -> String {
        match self {
            BuiltinDialect::Ql => String::new(),
            _ => format!("{quoted_table}."),
        }
    }

    fn has_column(&self, conn: &dyn Connection, table: &str, column: &str) -> Result<bool> {
        let (sql, args) = self.column_probe(table, column);
        let rows = conn.query(&sql, &args)?;
        if *self == BuiltinDialect::Sqlite {
            return Ok(rows.iter().any(|row| {
                row.get_by_name("name").and_then(Value::as_str) == Some(column)
            }));
        }
        Ok(rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_i64)
            .is_some_and(|count| count > 0))
    }

    fn returning_suffix(&self, quoted_table: &str, quoted_column: &str) -> Option<String> {
        match self {
            BuiltinDialect::Postgres => Some(format!("RETURNING {quoted_table}.{quoted_column}")),
            _ => None,
        }
    }
}
