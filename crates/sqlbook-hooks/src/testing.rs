//! Mock connection and record fixtures for unit tests.

use crate::engine::Engine;
use sqlbook_core::{
    BuiltinDialect, Connection, Error, ExecResult, RecordHooks, Result, Row, Transaction, Value,
};
use sqlbook_macros::Record;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Shared state behind a [`MockConnection`].
#[derive(Debug, Default)]
pub struct MockState {
    pub statements: Vec<(String, Vec<Value>)>,
    pub query_results: VecDeque<Vec<Row>>,
    pub exec_results: VecDeque<ExecResult>,
    pub fail_on: Option<String>,
    pub transactions: Vec<&'static str>,
}

/// A connection that records every statement and answers from scripted queues.
///
/// Queries pop the next scripted row set, or return no rows. Executes pop
/// the next scripted result, or report one affected row.
#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_rows(&self, rows: Vec<Row>) -> &Self {
        self.state.lock().unwrap().query_results.push_back(rows);
        self
    }

    pub fn push_exec(&self, result: ExecResult) -> &Self {
        self.state.lock().unwrap().exec_results.push_back(result);
        self
    }

    pub fn fail_on(&self, needle: &str) {
        self.state.lock().unwrap().fail_on = Some(needle.to_string());
    }

    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|(sql, _)| sql).collect()
    }

    pub fn transactions(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().transactions.clone()
    }

    fn record(&self, sql: &str, params: &[Value]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.statements.push((sql.to_string(), params.to_vec()));
        if state.fail_on.as_deref().is_some_and(|n| sql.contains(n)) {
            return Err(Error::Custom(format!("mock failure: {sql}")));
        }
        Ok(())
    }

    fn answer_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.record(sql, params)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .query_results
            .pop_front()
            .unwrap_or_default())
    }

    fn answer_execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        self.record(sql, params)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .exec_results
            .pop_front()
            .unwrap_or(ExecResult {
                rows_affected: 1,
                last_insert_id: None,
            }))
    }
}

impl Connection for MockConnection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.answer_query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        self.answer_execute(sql, params)
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        self.state.lock().unwrap().transactions.push("BEGIN");
        Ok(Box::new(MockTransaction { conn: self }))
    }
}

struct MockTransaction<'a> {
    conn: &'a MockConnection,
}

impl Transaction for MockTransaction<'_> {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.conn.answer_query(sql, params)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        self.conn.answer_execute(sql, params)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.conn.state.lock().unwrap().transactions.push("COMMIT");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        self.conn.state.lock().unwrap().transactions.push("ROLLBACK");
        Ok(())
    }
}

pub fn engine_with(conn: MockConnection) -> Engine {
    engine_with_dialect(conn, BuiltinDialect::Sqlite)
}

pub fn engine_with_dialect(conn: MockConnection, dialect: BuiltinDialect) -> Engine {
    Engine::new(Arc::new(conn), Arc::new(dialect))
}

pub fn row(columns: &[&str], values: Vec<Value>) -> Row {
    Row::new(columns.iter().map(|c| (*c).to_string()).collect(), values)
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
#[record(table = "companies")]
pub struct Company {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
#[record(table = "comments")]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
#[record(table = "posts")]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    #[record(relationship(has_many, foreign_key = "PostID", references = "ID"))]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
#[record(table = "profiles")]
pub struct Profile {
    pub id: i64,
    pub user_id: i64,
    pub bio: String,
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
#[record(table = "languages")]
pub struct Language {
    pub id: i64,
    pub name: String,
}

/// The main fixture: a user with one relationship of every kind.
///
/// `trail` records lifecycle hook calls and is not a column.
#[derive(Debug, Clone, Default, PartialEq, Record)]
#[record(table = "users", hooks)]
pub struct User {
    pub id: i64,
    pub name: String,
    #[record(default)]
    pub age: i64,
    pub company_id: i64,
    #[record(timestamp)]
    pub created_at: i64,
    #[record(timestamp)]
    pub updated_at: i64,
    #[record(relationship(belongs_to, foreign_key = "CompanyID", references = "ID"))]
    pub company: Option<Company>,
    #[record(relationship(has_many, foreign_key = "UserID", references = "ID"))]
    pub posts: Vec<Post>,
    #[record(relationship(has_one, foreign_key = "UserID", references = "ID"))]
    pub profile: Option<Profile>,
    #[record(relationship(
        many_to_many,
        join_table = "user_languages",
        join_foreign_key = "user_id",
        join_references = "language_id"
    ))]
    pub languages: Vec<Language>,
    #[record(skip)]
    pub trail: Vec<&'static str>,
}

impl RecordHooks for User {
    fn before_save(&mut self) -> Result<()> {
        self.trail.push("before_save");
        Ok(())
    }

    fn before_create(&mut self) -> Result<()> {
        self.trail.push("before_create");
        Ok(())
    }

    fn after_create(&mut self) -> Result<()> {
        self.trail.push("after_create");
        Ok(())
    }

    fn after_save(&mut self) -> Result<()> {
        self.trail.push("after_save");
        Ok(())
    }

    fn before_update(&mut self) -> Result<()> {
        self.trail.push("before_update");
        Ok(())
    }

    fn after_update(&mut self) -> Result<()> {
        self.trail.push("after_update");
        Ok(())
    }

    fn before_delete(&mut self) -> Result<()> {
        self.trail.push("before_delete");
        Ok(())
    }

    fn after_delete(&mut self) -> Result<()> {
        self.trail.push("after_delete");
        Ok(())
    }

    fn after_find(&mut self) -> Result<()> {
        self.trail.push("after_find");
        Ok(())
    }
}

/// A soft-deletable record.
#[derive(Debug, Clone, Default, PartialEq, Record)]
#[record(table = "notes")]
pub struct Note {
    pub id: i64,
    pub body: String,
    #[record(timestamp)]
    pub deleted_at: Option<i64>,
}
