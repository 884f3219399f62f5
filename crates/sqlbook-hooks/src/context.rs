//! Per-operation state.
//!
//! A [`Context`] is created for every operation, threaded through each of
//! its steps and discarded when the operation returns. Cascades and preloads
//! run on fresh contexts, so SQL text and parameters never leak between a
//! parent operation and the sub-operations it spawns.

use crate::engine::Engine;
use crate::search::Search;
use serde::{Deserialize, Serialize};
use sqlbook_core::{
    Dialect, Error, Record, RecordMetadata, RecordSet, RecordType, Result, UsageErrorKind, Value,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What an operation reads into or writes from.
pub enum Target<'a> {
    /// No destination. Only useful for steps that need none.
    None,
    /// A single record.
    One(&'a mut dyn Record),
    /// A growable sequence of records.
    Many(&'a mut dyn RecordSet),
}

impl<'a> Target<'a> {
    /// Record type of the destination.
    pub fn record_type(&self) -> Option<RecordType> {
        match self {
            Target::None => None,
            Target::One(record) => Some(record.record_type()),
            Target::Many(set) => Some(set.record_type()),
        }
    }

    /// The single record, or a usage error for any other destination.
    pub fn one(&mut self) -> Result<&mut dyn Record> {
        match self {
            Target::One(record) => Ok(&mut **record),
            _ => Err(unsupported_destination()),
        }
    }

    /// The single record, read-only.
    pub fn one_ref(&self) -> Option<&dyn Record> {
        match self {
            Target::One(record) => Some(&**record),
            _ => None,
        }
    }

    /// Every record currently held.
    pub fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        match self {
            Target::None => Vec::new(),
            Target::One(record) => vec![&mut **record],
            Target::Many(set) => set.members_mut(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Target::None)
    }
}

impl fmt::Debug for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::None => f.write_str("None"),
            Target::One(record) => f.debug_tuple("One").field(record).finish(),
            Target::Many(set) => f
                .debug_struct("Many")
                .field("type", &set.record_type())
                .field("len", &set.count())
                .finish(),
        }
    }
}

pub(crate) fn unsupported_destination() -> Error {
    Error::usage(
        UsageErrorKind::UnsupportedDestination,
        "unsupported destination, should be a record or a record sequence",
    )
}

/// Bound parameters, matched 1:1 with placeholders in the SQL text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vars {
    values: Vec<Value>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` and return the placeholder that refers to it.
    pub fn push(&mut self, dialect: &dyn Dialect, value: Value) -> String {
        self.values.push(value);
        dialect.bind_var(self.values.len())
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.values.get_mut(index)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// Typed values passed between steps of one operation.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Caller-supplied attributes to update, keyed by field or column name.
    pub update_attrs: Option<BTreeMap<String, Value>>,
    /// `update_attrs` resolved to `(column, value)` pairs.
    pub resolved_attrs: Option<Vec<(String, Value)>>,
    /// Column-only update: no timestamps, no lifecycle hooks.
    pub update_column: bool,
    /// Default primary-key ordering for queries without an explicit order.
    pub order_by_pk: Option<Order>,
    pub insert_option: Option<String>,
    pub update_option: Option<String>,
    pub delete_option: Option<String>,
    pub query_option: Option<String>,
    /// Quoted columns left out of the last INSERT because they were blank
    /// and have a database default.
    pub blank_columns_with_default: Vec<String>,
    /// Overrides the engine's `save_associations` setting.
    pub save_associations: Option<bool>,
    /// Let `update_attrs` write primary key and non-changeable fields.
    pub ignore_protected_attrs: bool,
}

/// State for one operation.
pub struct Context<'a> {
    pub engine: Engine,
    pub target: Target<'a>,
    pub sql: String,
    pub vars: Vars,
    pub rows_affected: u64,
    pub search: Search,
    pub options: Options,
}

impl<'a> Context<'a> {
    pub fn new(engine: Engine, target: Target<'a>) -> Self {
        Self::with_search(engine, target, Search::default())
    }

    pub fn with_search(engine: Engine, target: Target<'a>, search: Search) -> Self {
        Self {
            engine,
            target,
            sql: String::new(),
            vars: Vars::new(),
            rows_affected: 0,
            search,
            options: Options::default(),
        }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.engine.dialect()
    }

    /// Metadata of the target's record type.
    pub fn metadata(&self) -> Result<Arc<RecordMetadata>> {
        self.target
            .record_type()
            .map(|rt| rt.metadata())
            .ok_or_else(unsupported_destination)
    }

    /// Quoted table name: the search override, else the record type's table.
    pub fn quoted_table(&self, meta: &RecordMetadata) -> String {
        let table = self.search.table.as_deref().unwrap_or(&meta.table_name);
        self.dialect().quote(table)
    }

    /// Append a parameter and return its placeholder.
    pub fn add_var(&mut self, value: Value) -> String {
        self.vars.push(self.engine.dialect(), value)
    }

    /// Whether associations should be saved along with the target.
    pub fn should_save_associations(&self) -> bool {
        self.options
            .save_associations
            .unwrap_or(self.engine.config().save_associations)
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("target", &self.target)
            .field("sql", &self.sql)
            .field("vars", &self.vars)
            .field("rows_affected", &self.rows_affected)
            .field("search", &self.search)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
