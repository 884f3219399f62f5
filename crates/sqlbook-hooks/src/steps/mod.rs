//! Built-in step functions.
//!
//! Each function has the [`Hook`](crate::Hook) shape and is registered by
//! `Book::default()`. Entry steps (`create`, `query`, `update`, `delete`)
//! only sequence other steps through the book, so any step can be replaced
//! without touching the rest of the pipeline.

pub mod association;
pub mod create;
pub mod delete;
pub mod lifecycle;
pub mod query;
pub mod update;

pub(crate) mod ql;
