//! Shared fixtures for the SQLite end-to-end tests.
#![allow(dead_code)]

use sqlbook::{
    BuiltinDialect, Connection, Engine, ExecResult, Record, RecordHooks, Result, Row,
    SqliteConnection, Transaction, Value,
};
use std::sync::{Arc, Mutex};

pub const SCHEMA: &str = "
    CREATE TABLE companies (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        age INTEGER NOT NULL DEFAULT 18,
        company_id INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL, title TEXT NOT NULL);
    CREATE TABLE comments (id INTEGER PRIMARY KEY, post_id INTEGER NOT NULL, body TEXT NOT NULL);
    CREATE TABLE profiles (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL, bio TEXT NOT NULL);
    CREATE TABLE languages (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
    CREATE TABLE user_languages (
        user_id INTEGER NOT NULL,
        language_id INTEGER NOT NULL,
        PRIMARY KEY (user_id, language_id)
    );
    CREATE TABLE toys (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        owner_id INTEGER NOT NULL,
        owner_type TEXT NOT NULL
    );
    CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL, deleted_at INTEGER);
";

/// A SQLite connection that logs every statement it runs.
pub struct Recording {
    inner: SqliteConnection,
    log: Mutex<Vec<String>>,
}

impl Recording {
    pub fn new() -> Self {
        let inner = SqliteConnection::open_memory().unwrap();
        inner.execute_raw(SCHEMA).unwrap();
        Self {
            inner,
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn raw(&self, sql: &str) {
        self.inner.execute_raw(sql).unwrap();
    }

    /// SELECT statements run since the last call, oldest first.
    pub fn take_selects(&self) -> Vec<String> {
        let mut log = self.log.lock().unwrap();
        let selects = log.iter().filter(|s| s.starts_with("SELECT")).cloned().collect();
        log.clear();
        selects
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn count(&self, table: &str) -> i64 {
        let rows = self
            .inner
            .query(&format!("SELECT COUNT(*) AS n FROM {table}"), &[])
            .unwrap();
        rows[0].get_named::<i64>("n").unwrap()
    }

    pub fn rows(&self, sql: &str) -> Vec<Row> {
        self.inner.query(sql, &[]).unwrap()
    }

    fn note(&self, sql: &str) {
        self.log.lock().unwrap().push(sql.to_string());
    }
}

impl Connection for Recording {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.note(sql);
        self.inner.query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        self.note(sql);
        self.inner.execute(sql, params)
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        self.inner.begin()
    }
}

pub fn setup() -> (Engine, Arc<Recording>) {
    let conn = Arc::new(Recording::new());
    let engine = Engine::new(conn.clone(), Arc::new(BuiltinDialect::Sqlite));
    (engine, conn)
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

impl Comment {
    pub fn new(body: &str) -> Self {
        Self {
            body: body.to_string(),
            ..Self::default()
        }
    }
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

impl Post {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }

    pub fn with_comments(title: &str, bodies: &[&str]) -> Self {
        Self {
            comments: bodies.iter().map(|b| Comment::new(b)).collect(),
            ..Self::new(title)
        }
    }
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

impl Language {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

/// Owned polymorphically: `owner_type` names the owning table.
#[derive(Debug, Clone, Default, PartialEq, Record)]
#[record(table = "toys")]
pub struct Toy {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub owner_type: String,
}

impl Toy {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

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
    #[record(relationship(
        has_many,
        foreign_key = "OwnerID",
        references = "ID",
        polymorphic = "OwnerType",
        polymorphic_value = "users"
    ))]
    pub toys: Vec<Toy>,
    #[record(skip)]
    pub trail: Vec<&'static str>,
}

impl User {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
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

/// Soft-deletable through its `deleted_at` column.
#[derive(Debug, Clone, Default, PartialEq, Record)]
#[record(table = "notes")]
pub struct Note {
    pub id: i64,
    pub body: String,
    #[record(timestamp)]
    pub deleted_at: Option<i64>,
}
