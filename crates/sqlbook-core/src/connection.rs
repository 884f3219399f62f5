//! Database connection traits.
//!
//! This module defines the blocking backend contract the pipeline runs on:
//!
//! - [`Connection`] - Execute statements and open transactions
//! - [`Transaction`] - Statements scoped to one explicit transaction
//! - [`in_transaction`] - Commit-or-rollback wrapper used by write steps

use crate::error::{Error, Result, TransactionError, TransactionErrorKind};
use crate::row::Row;
use crate::value::Value;

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    /// Rows inserted, updated or deleted.
    pub rows_affected: u64,
    /// Backend-generated id of the last inserted row, if the backend reports one.
    pub last_insert_id: Option<i64>,
}

/// A blocking database connection.
///
/// Every call runs to completion on the calling thread. Timeouts and
/// cancellation belong to the implementation, not to callers.
pub trait Connection: Send + Sync {
    /// Execute a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement that returns no rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult>;

    /// Begin an explicit transaction.
    fn begin(&self) -> Result<Box<dyn Transaction + '_>>;
}

/// An open transaction.
///
/// Dropping a transaction that was neither committed nor rolled back
/// must roll it back.
pub trait Transaction {
    /// Execute a query within this transaction.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement within this transaction.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult>;

    /// Commit the transaction.
    fn commit(self: Box<Self>) -> Result<()>;

    /// Roll back the transaction.
    fn rollback(self: Box<Self>) -> Result<()>;
}

/// Run `f` inside a transaction on `conn`.
///
/// Commits when `f` succeeds. When `f` fails the transaction is rolled back
/// and the original error returned; if the rollback itself fails, the
/// rollback failure is returned instead so it is never lost.
pub fn in_transaction<T>(
    conn: &dyn Connection,
    f: impl FnOnce(&mut dyn Transaction) -> Result<T>,
) -> Result<T> {
    let mut tx = conn.begin()?;
    match f(tx.as_mut()) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => match tx.rollback() {
            Ok(()) => Err(err),
            Err(rollback_err) => {
                tracing::error!(
                    error = %err,
                    rollback_error = %rollback_err,
                    "rollback failed after statement error"
                );
                Err(Error::Transaction(TransactionError {
                    kind: TransactionErrorKind::RollbackFailed,
                    message: format!("rollback failed: {} (after: {})", rollback_err, err),
                }))
            }
        },
    }
}
