//! sqlbook - a hook-driven ORM operation pipeline.
//!
//! Every operation (create, query, update, delete) runs as an ordered list
//! of named steps kept in a [`Book`]. The default book implements the usual
//! ORM behavior:
//!
//! - timestamps and lifecycle hooks around each write
//! - belongs_to records saved before their owner, has_one / has_many /
//!   many_to_many records saved after it
//! - soft delete for tables with a `deleted_at` column
//! - eager loading of relationship paths such as `"Posts.Comments"` with
//!   one query per path segment
//!
//! Steps can be replaced, reordered or extended through the [`Book`], so an
//! application can hook its own behavior into any operation.
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlbook::prelude::*;
//!
//! #[derive(Debug, Clone, Default, Record)]
//! #[record(table = "users")]
//! struct User {
//!     id: i64,
//!     name: String,
//!     #[record(relationship(has_many, foreign_key = "UserID", references = "ID"))]
//!     posts: Vec<Post>,
//! }
//!
//! let engine = sqlbook::open_sqlite(&SqliteConfig::memory())?;
//! engine.create(&mut user)?;
//! let users: Vec<User> = engine.find(Search::new().preload("Posts"))?;
//! ```

pub use sqlbook_core::{
    Association, BuiltinDialect, ColumnInfo, ConfigError, Connection, ConnectionError,
    ConnectionErrorKind, Dialect, DynRecords, Error, ExecResult, FieldDescriptor, FromValue,
    JoinTable, QueryError, QueryErrorKind, Record, RecordExt, RecordHooks, RecordMetadata,
    RecordSet, RecordType, Relationship, RelationshipKind, Result, Row, Transaction,
    TransactionError, TransactionErrorKind, TypeError, UsageError, UsageErrorKind, Value,
    in_transaction, metadata_cache, to_db_name,
};
pub use sqlbook_hooks::{
    Book, Clause, Context, Engine, EngineConfig, Group, Hook, Options, Order, PreloadPath,
    Search, Step, Target, is_new_record, save_record,
};

/// `#[derive(Record)]`.
pub use sqlbook_macros::Record;

/// The individual pipeline steps, for building custom books.
pub use sqlbook_hooks::steps;

#[cfg(feature = "sqlite")]
pub use sqlbook_sqlite::{OpenFlags, SqliteConfig, SqliteConnection, sqlite_version};

#[cfg(feature = "sqlite")]
use std::sync::Arc;

/// Open a SQLite database and bind it to an engine with the default book.
#[cfg(feature = "sqlite")]
pub fn open_sqlite(config: &SqliteConfig) -> Result<Engine> {
    let conn = SqliteConnection::open(config)?;
    tracing::info!(path = %config.path, version = sqlite_version(), "sqlbook engine ready");
    Ok(Engine::new(Arc::new(conn), Arc::new(BuiltinDialect::Sqlite)))
}

/// Open a SQLite database, run `schema` on it, and bind it to an engine.
///
/// ```ignore
/// let engine = sqlbook::open_sqlite_with_schema(
///     &SqliteConfig::memory(),
///     "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);",
/// )?;
/// ```
#[cfg(feature = "sqlite")]
pub fn open_sqlite_with_schema(config: &SqliteConfig, schema: &str) -> Result<Engine> {
    let conn = SqliteConnection::open(config)?;
    conn.execute_raw(schema)?;
    Ok(Engine::new(Arc::new(conn), Arc::new(BuiltinDialect::Sqlite)))
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Association, BuiltinDialect, Clause, Connection, Engine, EngineConfig, Error,
        FieldDescriptor, FromValue, JoinTable, Options, Order, Record, RecordHooks,
        RecordMetadata, Relationship, Result, Row, Search, Target, Value,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::{SqliteConfig, SqliteConnection};
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;

    #[test]
    fn open_sqlite_with_schema_runs_ddl() {
        let engine = open_sqlite_with_schema(
            &SqliteConfig::memory(),
            "CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t DEFAULT VALUES;",
        )
        .unwrap();
        let rows = engine
            .connection()
            .query("SELECT COUNT(*) FROM t", &[])
            .unwrap();
        assert_eq!(rows[0].get(0), Some(&Value::Int(1)));
        assert_eq!(engine.dialect().name(), "sqlite3");
    }

    #[test]
    fn bad_schema_is_a_query_error() {
        let err = open_sqlite_with_schema(&SqliteConfig::memory(), "CREATE TABLE (").unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }
}
