//! Query conditions and eager-loading requests.

use sqlbook_core::Value;

/// A SQL fragment with `?` markers and the values that fill them.
///
/// Markers are rewritten to the dialect's placeholders when the fragment is
/// rendered, so fragments are written the same way for every backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clause {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Clause {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    /// A fragment without arguments.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// One dotted relationship path to preload, e.g. `"Posts.Comments"`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreloadPath {
    pub path: String,
    /// Extra conditions for the last segment of the path.
    pub conditions: Vec<Clause>,
}

/// Conditions, ordering and preloads for one operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Search {
    pub where_clauses: Vec<Clause>,
    pub joins: Vec<Clause>,
    pub orders: Vec<String>,
    /// Select expression. `*` when absent.
    pub select: Option<Clause>,
    /// Fields create and update may write. Empty means all.
    pub select_fields: Vec<String>,
    /// Fields create and update must not write.
    pub omit_fields: Vec<String>,
    /// Table name override.
    pub table: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Skip the soft-delete filter.
    pub unscoped: bool,
    pub preload: Vec<PreloadPath>,
}

impl Search {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition. Conditions are joined with `AND`.
    ///
    /// ```ignore
    /// Search::new().filter("name = ? AND age > ?", vec!["ada".into(), 30.into()])
    /// ```
    pub fn filter(mut self, sql: impl Into<String>, args: Vec<Value>) -> Self {
        self.where_clauses.push(Clause::new(sql, args));
        self
    }

    pub fn join(mut self, sql: impl Into<String>, args: Vec<Value>) -> Self {
        self.joins.push(Clause::new(sql, args));
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.orders.push(order.into());
        self
    }

    pub fn select(mut self, sql: impl Into<String>, args: Vec<Value>) -> Self {
        self.select = Some(Clause::new(sql, args));
        self
    }

    pub fn select_fields(mut self, fields: &[&str]) -> Self {
        self.select_fields = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }

    pub fn omit_fields(mut self, fields: &[&str]) -> Self {
        self.omit_fields = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn unscoped(mut self) -> Self {
        self.unscoped = true;
        self
    }

    /// Eager-load a relationship path.
    pub fn preload(mut self, path: impl Into<String>) -> Self {
        self.preload.push(PreloadPath {
            path: path.into(),
            conditions: Vec::new(),
        });
        self
    }

    /// Eager-load a relationship path, filtering its last segment.
    pub fn preload_with(mut self, path: impl Into<String>, conditions: Vec<Clause>) -> Self {
        self.preload.push(PreloadPath {
            path: path.into(),
            conditions,
        });
        self
    }
}
