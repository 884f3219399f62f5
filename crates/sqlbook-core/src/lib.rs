//! Core types and traits for sqlbook.
//!
//! This crate provides the foundations the operation pipeline is built on:
//!
//! - `Value` and `Row` for parameters and results
//! - `Record`, `Association` and `RecordSet` for descriptor-driven record access
//! - `RecordMetadata` and the per-type metadata cache
//! - `Connection` and `Transaction` for blocking backend access
//! - `Dialect` for quoting and placeholder rules

pub mod connection;
pub mod dialect;
pub mod error;
pub mod metadata;
pub mod record;
pub mod row;
pub mod value;

pub use connection::{Connection, ExecResult, Transaction, in_transaction};
pub use dialect::{BuiltinDialect, Dialect, is_ql, wrap_transaction_text};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, QueryError, QueryErrorKind, Result,
    TransactionError, TransactionErrorKind, TypeError, UsageError, UsageErrorKind,
};
pub use metadata::{
    FieldDescriptor, JoinKey, JoinProjection, JoinTable, MetadataCache, Polymorphic,
    RecordMetadata, Relationship, RelationshipKind, metadata_cache, to_db_name,
};
pub use record::{
    Association, DynRecords, Record, RecordExt, RecordHooks, RecordSet, RecordType,
    downcast_record, field_values, scan_row, unknown_field,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::{Value, key_string};
