//! SQLite connection implementation.
//!
//! Safe wrappers around the SQLite C API implementing the blocking
//! `Connection` and `Transaction` traits from `sqlbook-core`.

#![allow(clippy::borrow_as_ptr)]
#![allow(clippy::result_large_err)] // Error type is defined in sqlbook-core

use crate::types;
use libsqlite3_sys as ffi;
use sqlbook_core::{
    ColumnInfo, Connection, ConnectionError, ConnectionErrorKind, Error, ExecResult, QueryError,
    QueryErrorKind, Result, Row, Transaction, TransactionError, TransactionErrorKind, Value,
};
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard};

// `libsqlite3-sys` 0.37 blocklists `sqlite3_close_v2` from its generated
// bindings; the bundled library still exports it, so declare it here.
unsafe extern "C" {
    fn sqlite3_close_v2(db: *mut ffi::sqlite3) -> c_int;
}

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds. Zero disables the busy handler.
    pub busy_timeout_ms: u32,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Read-write access; the database must already exist.
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Read-write access, creating the database if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;
        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }
        // The handle is guarded by our own mutex.
        flags | ffi::SQLITE_OPEN_NOMUTEX
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn memory() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

struct SqliteInner {
    db: *mut ffi::sqlite3,
    in_transaction: bool,
}

// SAFETY: the handle is opened with SQLITE_OPEN_NOMUTEX and only ever used
// while holding the connection's Mutex, so it is never touched from two
// threads at once.
unsafe impl Send for SqliteInner {}

/// A connection to a SQLite database.
///
/// All access to the underlying handle goes through a mutex, so a
/// connection can be shared behind an `Arc`.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str())
            .map_err(|_| connect_error("Invalid path: contains null byte".to_string()))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: valid path pointer and out-pointer; rc is checked below
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                error_string(rc)
            } else {
                // SAFETY: db is a handle returned by sqlite3_open_v2
                let msg = unsafe { errmsg(db) };
                unsafe { ffi::sqlite3_close(db) };
                msg
            };
            return Err(connect_error(format!("Failed to open database: {msg}")));
        }

        if config.busy_timeout_ms > 0 {
            let ms = c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX);
            // SAFETY: db is valid
            unsafe { ffi::sqlite3_busy_timeout(db, ms) };
        }

        tracing::debug!(path = %config.path, "opened sqlite database");
        Ok(Self {
            inner: Mutex::new(SqliteInner {
                db,
                in_transaction: false,
            }),
            path: config.path.clone(),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database, creating it if needed.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, SqliteInner>> {
        self.inner.lock().map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "sqlite connection lock poisoned".to_string(),
                source: None,
            })
        })
    }

    /// Execute one or more statements without parameters (DDL, pragmas).
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        let inner = self.lock()?;
        exec_batch(inner.db, sql)
    }

    /// Rowid of the most recent successful INSERT on this connection.
    pub fn last_insert_rowid(&self) -> Result<i64> {
        let inner = self.lock()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(inner.db) })
    }

    /// Rows changed by the most recent statement.
    pub fn changes(&self) -> Result<u64> {
        let inner = self.lock()?;
        // SAFETY: db is valid
        let changes = unsafe { ffi::sqlite3_changes(inner.db) };
        Ok(u64::try_from(changes).unwrap_or(0))
    }

    /// Whether an explicit transaction is open.
    pub fn in_transaction(&self) -> Result<bool> {
        Ok(self.lock()?.in_transaction)
    }

    fn run_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let inner = self.lock()?;
        tracing::trace!(sql = %sql, params = params.len(), "sqlite query");
        let stmt = Statement::prepare(inner.db, sql)?;
        if stmt.is_empty() {
            return Ok(Vec::new());
        }
        stmt.bind_all(inner.db, sql, params)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.raw) };
        let names = (0..col_count)
            .map(|i| unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{i}")))
            .collect();
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt.raw) } {
                ffi::SQLITE_ROW => {
                    let values = (0..col_count)
                        // SAFETY: the last step returned SQLITE_ROW
                        .map(|i| unsafe { types::read_column(stmt.raw, i) })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(last_error(inner.db, sql)),
            }
        }
        Ok(rows)
    }

    fn run_execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        let inner = self.lock()?;
        tracing::trace!(sql = %sql, params = params.len(), "sqlite execute");
        let stmt = Statement::prepare(inner.db, sql)?;
        if stmt.is_empty() {
            return Ok(ExecResult::default());
        }
        stmt.bind_all(inner.db, sql, params)?;

        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt.raw) } {
                ffi::SQLITE_ROW => {}
                ffi::SQLITE_DONE => break,
                _ => return Err(last_error(inner.db, sql)),
            }
        }

        // SAFETY: db is valid
        let changes = u64::try_from(unsafe { ffi::sqlite3_changes(inner.db) }).unwrap_or(0);
        let last_insert_id = (changes > 0 && is_insert(sql))
            // SAFETY: db is valid
            .then(|| unsafe { ffi::sqlite3_last_insert_rowid(inner.db) });
        Ok(ExecResult {
            rows_affected: changes,
            last_insert_id,
        })
    }

    fn begin_transaction(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.in_transaction {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NestedNotSupported,
                message: "Already in a transaction".to_string(),
            }));
        }
        exec_batch(inner.db, "BEGIN")?;
        inner.in_transaction = true;
        tracing::debug!(path = %self.path, "BEGIN");
        Ok(())
    }

    /// Run COMMIT or ROLLBACK and resync the transaction flag with SQLite.
    fn finish_transaction(&self, sql: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.in_transaction {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NotActive,
                message: "Not in a transaction".to_string(),
            }));
        }
        let result = exec_batch(inner.db, sql);
        // SAFETY: db is valid
        inner.in_transaction = unsafe { ffi::sqlite3_get_autocommit(inner.db) } == 0;
        tracing::debug!(path = %self.path, ok = result.is_ok(), "{sql}");
        result
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.lock() {
            if !inner.db.is_null() {
                // SAFETY: db is valid and no statements outlive this call
                unsafe { sqlite3_close_v2(inner.db) };
            }
        }
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Connection for SqliteConnection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.run_query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        self.run_execute(sql, params)
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        self.begin_transaction()?;
        Ok(Box::new(SqliteTransaction {
            conn: self,
            finished: false,
        }))
    }
}

/// An open SQLite transaction. Rolled back on drop unless committed.
pub struct SqliteTransaction<'conn> {
    conn: &'conn SqliteConnection,
    finished: bool,
}

impl Transaction for SqliteTransaction<'_> {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.conn.run_query(sql, params)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        self.conn.run_execute(sql, params)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.finish_transaction("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        self.conn.finish_transaction("ROLLBACK")
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.conn.in_transaction() {
            Ok(true) => {
                if let Err(e) = self.conn.finish_transaction("ROLLBACK") {
                    tracing::error!(error = %e, "rollback of dropped transaction failed");
                }
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "dropped transaction on unusable connection"),
        }
    }
}

/// A prepared statement, finalized on drop.
struct Statement {
    raw: *mut ffi::sqlite3_stmt,
}

impl Statement {
    /// Prepare the first statement of `sql`. Whitespace or comment-only SQL
    /// yields an empty statement.
    fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<Self> {
        let Ok(len) = c_int::try_from(sql.len()) else {
            return Err(query_error(
                QueryErrorKind::DataTruncation,
                sql,
                "SQL text too long".to_string(),
            ));
        };
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();
        // SAFETY: pointer and length describe `sql`; rc is checked
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(db, sql.as_ptr().cast(), len, &mut raw, ptr::null_mut())
        };
        if rc != ffi::SQLITE_OK {
            return Err(last_error(db, sql));
        }
        Ok(Self { raw })
    }

    fn is_empty(&self) -> bool {
        self.raw.is_null()
    }

    fn bind_all(&self, db: *mut ffi::sqlite3, sql: &str, params: &[Value]) -> Result<()> {
        for (i, param) in params.iter().enumerate() {
            let index = c_int::try_from(i + 1).unwrap_or(c_int::MAX);
            // SAFETY: stmt is valid, index is 1-based
            let rc = unsafe { types::bind_value(self.raw, index, param) };
            if rc != ffi::SQLITE_OK {
                // SAFETY: db is valid
                let msg = unsafe { errmsg(db) };
                return Err(query_error(
                    error_code_to_kind(rc, &msg),
                    sql,
                    format!("Failed to bind parameter {}: {msg}", i + 1),
                ));
            }
        }
        Ok(())
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            // SAFETY: raw came from sqlite3_prepare_v2 and is finalized once
            unsafe { ffi::sqlite3_finalize(self.raw) };
        }
    }
}

fn exec_batch(db: *mut ffi::sqlite3, sql: &str) -> Result<()> {
    let c_sql = CString::new(sql).map_err(|_| {
        query_error(
            QueryErrorKind::Syntax,
            sql,
            "SQL contains null byte".to_string(),
        )
    })?;
    let mut err: *mut std::ffi::c_char = ptr::null_mut();

    // SAFETY: all pointers are valid for the duration of the call
    let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut err) };
    if rc == ffi::SQLITE_OK {
        return Ok(());
    }
    let msg = if err.is_null() {
        error_string(rc)
    } else {
        // SAFETY: err was allocated by SQLite and is freed exactly once
        let msg = unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned();
        unsafe { ffi::sqlite3_free(err.cast()) };
        msg
    };
    Err(query_error(error_code_to_kind(rc, &msg), sql, msg))
}

fn is_insert(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("insert"))
}

/// # Safety
///
/// `db` must be a valid handle.
unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    // SAFETY: errmsg always returns a valid NUL-terminated string
    unsafe { CStr::from_ptr(ffi::sqlite3_errmsg(db)) }
        .to_string_lossy()
        .into_owned()
}

fn error_string(code: c_int) -> String {
    // SAFETY: errstr returns a static string for every code
    unsafe { CStr::from_ptr(ffi::sqlite3_errstr(code)) }
        .to_string_lossy()
        .into_owned()
}

fn last_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (code, msg) = unsafe { (ffi::sqlite3_errcode(db), errmsg(db)) };
    query_error(error_code_to_kind(code, &msg), sql, msg)
}

fn query_error(kind: QueryErrorKind, sql: &str, message: String) -> Error {
    Error::Query(QueryError {
        kind,
        sql: Some(sql.to_string()),
        message,
        source: None,
    })
}

fn connect_error(message: String) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Connect,
        message,
        source: None,
    })
}

fn error_code_to_kind(code: c_int, message: &str) -> QueryErrorKind {
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH | ffi::SQLITE_READONLY => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_TOOBIG => QueryErrorKind::DataTruncation,
        ffi::SQLITE_INTERRUPT => QueryErrorKind::Interrupted,
        ffi::SQLITE_ERROR if message.contains("syntax error") => QueryErrorKind::Syntax,
        ffi::SQLITE_ERROR if message.starts_with("no such") => QueryErrorKind::NotFound,
        _ => QueryErrorKind::Database,
    }
}
