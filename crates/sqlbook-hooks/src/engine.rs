//! The engine: connection, dialect, hook book and configuration bundled
//! behind the operation entry points.

use crate::book::{Book, Group, Step};
use crate::config::EngineConfig;
use crate::context::{Context, Options, Order, Target};
use crate::search::Search;
use crate::steps::association;
use sqlbook_core::{Connection, Dialect, Record, Result, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Runs operations against one connection.
///
/// Cloning is cheap; every clone shares the connection, dialect and book.
///
/// ```ignore
/// let engine = Engine::new(Arc::new(conn), Arc::new(BuiltinDialect::Sqlite));
/// engine.create(&mut user)?;
/// let users: Vec<User> = engine.find(Search::new().preload("Posts"))?;
/// ```
#[derive(Clone)]
pub struct Engine {
    conn: Arc<dyn Connection>,
    dialect: Arc<dyn Dialect>,
    book: Arc<Book>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(conn: Arc<dyn Connection>, dialect: Arc<dyn Dialect>) -> Self {
        Self {
            conn,
            dialect,
            book: Arc::new(Book::default()),
            config: EngineConfig::default(),
        }
    }

    /// Replace the hook book.
    pub fn with_book(mut self, book: Book) -> Self {
        self.book = Arc::new(book);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connection(&self) -> &dyn Connection {
        self.conn.as_ref()
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current time as a microsecond timestamp.
    pub fn now(&self) -> Value {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX));
        Value::Timestamp(micros)
    }

    pub fn context<'a>(&self, target: Target<'a>) -> Context<'a> {
        Context::new(self.clone(), target)
    }

    pub fn context_with<'a>(&self, target: Target<'a>, search: Search) -> Context<'a> {
        Context::with_search(self.clone(), target, search)
    }

    /// Run a required step on `ctx` and return its row count.
    pub fn exec(&self, group: Group, step: Step, ctx: &mut Context<'_>) -> Result<u64> {
        let book = Arc::clone(&self.book);
        book.exec_required(group, step, ctx)?;
        Ok(ctx.rows_affected)
    }

    pub(crate) fn log_statement(&self, sql: &str, params: &[Value]) {
        if self.config.log_statements {
            tracing::info!(sql = %sql, params = params.len(), "executing statement");
        } else {
            tracing::debug!(sql = %sql, params = params.len(), "executing statement");
        }
    }

    /// Insert `record`, filling its primary key when the backend generates one.
    pub fn create(&self, record: &mut dyn Record) -> Result<u64> {
        let mut ctx = self.context(Target::One(record));
        self.exec(Group::Create, Step::Create, &mut ctx)
    }

    /// Create `record` if its primary key is blank, update it otherwise.
    pub fn save(&self, record: &mut dyn Record) -> Result<u64> {
        association::save_record(&self.book, self, record)
    }

    /// Query into `target`. Returns the number of rows read.
    pub fn query(&self, target: Target<'_>, search: Search) -> Result<u64> {
        self.query_with(target, search, Options::default())
    }

    /// Query with explicit per-operation options.
    pub fn query_with(&self, target: Target<'_>, search: Search, options: Options) -> Result<u64> {
        let mut ctx = self.context_with(target, search);
        ctx.options = options;
        if ctx.options.order_by_pk.is_none() {
            ctx.options.order_by_pk = self.config.order_by_pk;
        }
        self.exec(Group::Query, Step::Query, &mut ctx)
    }

    /// All matching records.
    pub fn find<R: Record + Default>(&self, search: Search) -> Result<Vec<R>> {
        let mut out: Vec<R> = Vec::new();
        self.query(Target::Many(&mut out), search)?;
        Ok(out)
    }

    /// One matching record; `RecordNotFound` when nothing matches.
    pub fn find_one<R: Record + Default>(&self, search: Search) -> Result<R> {
        let mut record = R::default();
        self.query(Target::One(&mut record), search)?;
        Ok(record)
    }

    /// The matching record with the lowest primary key.
    pub fn first<R: Record + Default>(&self, search: Search) -> Result<R> {
        self.ordered_one(search, Order::Asc)
    }

    /// The matching record with the highest primary key.
    pub fn last<R: Record + Default>(&self, search: Search) -> Result<R> {
        self.ordered_one(search, Order::Desc)
    }

    fn ordered_one<R: Record + Default>(&self, search: Search, order: Order) -> Result<R> {
        let mut record = R::default();
        let options = Options {
            order_by_pk: Some(order),
            ..Options::default()
        };
        self.query_with(Target::One(&mut record), search.limit(1), options)?;
        Ok(record)
    }

    /// Update every changeable field of `record`.
    pub fn update(&self, record: &mut dyn Record, search: Search) -> Result<u64> {
        self.update_with(record, search, Options::default())
    }

    /// Update only `attrs`, keyed by field or column name. Timestamps and
    /// lifecycle hooks run as for a full update.
    pub fn update_attrs(
        &self,
        record: &mut dyn Record,
        attrs: BTreeMap<String, Value>,
        search: Search,
    ) -> Result<u64> {
        let options = Options {
            update_attrs: Some(attrs),
            ..Options::default()
        };
        self.update_with(record, search, options)
    }

    /// Update only `attrs`, skipping timestamps and lifecycle hooks.
    pub fn update_columns(
        &self,
        record: &mut dyn Record,
        attrs: BTreeMap<String, Value>,
        search: Search,
    ) -> Result<u64> {
        let options = Options {
            update_attrs: Some(attrs),
            update_column: true,
            ..Options::default()
        };
        self.update_with(record, search, options)
    }

    pub fn update_with(
        &self,
        record: &mut dyn Record,
        search: Search,
        options: Options,
    ) -> Result<u64> {
        let mut ctx = self.context_with(Target::One(record), search);
        ctx.options = options;
        self.exec(Group::Update, Step::Update, &mut ctx)
    }

    /// Delete `record`, or soft-delete it when its table has `deleted_at`.
    pub fn delete(&self, record: &mut dyn Record, search: Search) -> Result<u64> {
        self.delete_with(record, search, Options::default())
    }

    pub fn delete_with(
        &self,
        record: &mut dyn Record,
        search: Search,
        options: Options,
    ) -> Result<u64> {
        let mut ctx = self.context_with(Target::One(record), search);
        ctx.options = options;
        self.exec(Group::Delete, Step::Delete, &mut ctx)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("dialect", &self.dialect)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
