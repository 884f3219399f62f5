//! The operation pipeline.
//!
//! Create, query, update and delete are each a sequence of named steps
//! registered in a [`Book`]. An [`Engine`] binds a book to a connection and
//! a dialect and exposes the operations; a [`Context`] carries the state of
//! one operation through its steps.
//!
//! ```ignore
//! let engine = Engine::new(conn, Arc::new(BuiltinDialect::Sqlite));
//! engine.create(&mut user)?;
//! let users: Vec<User> = engine.find(Search::new().preload("Posts.Comments"))?;
//! ```

pub mod book;
pub mod builder;
pub mod config;
pub mod context;
pub mod engine;
pub mod preload;
pub mod search;
pub mod steps;

#[cfg(test)]
pub(crate) mod testing;

pub use book::{Book, Group, Hook, Step};
pub use config::EngineConfig;
pub use context::{Context, Options, Order, Target, Vars};
pub use engine::Engine;
pub use search::{Clause, PreloadPath, Search};
pub use steps::association::{is_new_record, save_record};
