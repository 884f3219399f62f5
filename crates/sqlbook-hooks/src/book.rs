//! The hook registry.
//!
//! Every operation is a sequence of named steps. A [`Book`] maps each
//! `(Group, Step)` pair to an ordered list of functions; running a step runs
//! every function registered for it, in registration order, stopping at the
//! first error.

use crate::context::Context;
use crate::steps::{association, create, delete, lifecycle, query, update};
use sqlbook_core::{Error, Result, UsageErrorKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The operation a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    Create,
    Query,
    Update,
    Delete,
}

impl Group {
    pub const fn as_str(self) -> &'static str {
        match self {
            Group::Create => "create",
            Group::Query => "query",
            Group::Update => "update",
            Group::Delete => "delete",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named point in an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    // Entry points
    Create,
    Query,
    Update,
    Delete,

    // Create
    BeforeCreate,
    SaveBeforeAssociations,
    UpdateTimestamp,
    CreateSql,
    CreateExec,
    AfterCreate,
    SaveAfterAssociations,

    // Update
    BeforeUpdate,
    AssignUpdatingAttrs,
    UpdateSql,
    UpdateExec,
    AfterUpdate,

    // Query
    QuerySql,
    QueryExec,
    AfterQuery,
    Preload,

    // Delete
    BeforeDelete,
    DeleteSql,
    DeleteExec,
    AfterDelete,

    // Record lifecycle hooks; always run in optional mode
    HookBeforeSave,
    HookBeforeCreate,
    HookAfterCreate,
    HookAfterSave,
    HookBeforeUpdate,
    HookAfterUpdate,
    HookBeforeDelete,
    HookAfterDelete,
    HookAfterFind,
}

/// A registered step function.
///
/// Steps receive the book they were run from so they can run other steps,
/// on the same context or on a fresh one.
pub type Hook = Arc<dyn Fn(&Book, &mut Context<'_>) -> Result<()> + Send + Sync>;

/// Registry of step functions.
///
/// `Book::default()` holds the built-in pipeline. `Book::empty()` holds
/// nothing, for callers assembling their own.
#[derive(Clone)]
pub struct Book {
    hooks: HashMap<(Group, Step), Vec<Hook>>,
}

impl Book {
    /// A book with nothing registered.
    pub fn empty() -> Self {
        Self {
            hooks: HashMap::new(),
        }
    }

    /// Append `hook` to the list for `(group, step)`.
    pub fn register<F>(&mut self, group: Group, step: Step, hook: F) -> &mut Self
    where
        F: Fn(&Book, &mut Context<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks
            .entry((group, step))
            .or_default()
            .push(Arc::new(hook));
        self
    }

    /// Replace everything registered for `(group, step)` with `hook`.
    pub fn replace<F>(&mut self, group: Group, step: Step, hook: F) -> &mut Self
    where
        F: Fn(&Book, &mut Context<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let hook: Hook = Arc::new(hook);
        self.hooks.insert((group, step), vec![hook]);
        self
    }

    /// Remove everything registered for `(group, step)`.
    pub fn clear(&mut self, group: Group, step: Step) -> &mut Self {
        self.hooks.remove(&(group, step));
        self
    }

    /// Number of functions registered for `(group, step)`.
    pub fn count(&self, group: Group, step: Step) -> usize {
        self.hooks.get(&(group, step)).map_or(0, Vec::len)
    }

    /// Run `(group, step)`, failing if nothing is registered for it.
    pub fn exec_required(&self, group: Group, step: Step, ctx: &mut Context<'_>) -> Result<()> {
        let Some(hooks) = self.hooks.get(&(group, step)).filter(|h| !h.is_empty()) else {
            return Err(Error::usage(
                UsageErrorKind::NotImplemented,
                format!("{group} step {step:?} is not implemented"),
            ));
        };
        self.run(group, step, hooks, ctx)
    }

    /// Run `(group, step)`; nothing registered is success.
    pub fn exec_optional(&self, group: Group, step: Step, ctx: &mut Context<'_>) -> Result<()> {
        match self.hooks.get(&(group, step)) {
            Some(hooks) => self.run(group, step, hooks, ctx),
            None => Ok(()),
        }
    }

    fn run(&self, group: Group, step: Step, hooks: &[Hook], ctx: &mut Context<'_>) -> Result<()> {
        tracing::trace!(group = %group, step = ?step, count = hooks.len(), "running step");
        for hook in hooks {
            hook(self, ctx)?;
        }
        Ok(())
    }
}

impl Default for Book {
    fn default() -> Self {
        let mut book = Book::empty();

        book.register(Group::Create, Step::Create, create::create)
            .register(Group::Create, Step::BeforeCreate, create::before_create)
            .register(
                Group::Create,
                Step::SaveBeforeAssociations,
                association::save_before_associations,
            )
            .register(Group::Create, Step::UpdateTimestamp, create::update_timestamp)
            .register(Group::Create, Step::CreateSql, create::create_sql)
            .register(Group::Create, Step::CreateExec, create::create_exec)
            .register(Group::Create, Step::AfterCreate, create::after_create)
            .register(Group::Create, Step::HookBeforeSave, lifecycle::before_save)
            .register(Group::Create, Step::HookBeforeCreate, lifecycle::before_create)
            .register(Group::Create, Step::HookAfterCreate, lifecycle::after_create)
            .register(Group::Create, Step::HookAfterSave, lifecycle::after_save);

        book.register(Group::Query, Step::Query, query::query)
            .register(Group::Query, Step::QuerySql, query::query_sql)
            .register(Group::Query, Step::QueryExec, query::query_exec)
            .register(Group::Query, Step::AfterQuery, query::after_query)
            .register(Group::Query, Step::Preload, crate::preload::preload)
            .register(Group::Query, Step::HookAfterFind, lifecycle::after_find);

        book.register(Group::Update, Step::Update, update::update)
            .register(Group::Update, Step::BeforeUpdate, update::before_update)
            .register(Group::Update, Step::UpdateTimestamp, update::update_timestamp)
            .register(
                Group::Update,
                Step::AssignUpdatingAttrs,
                update::assign_updating_attrs,
            )
            .register(
                Group::Update,
                Step::SaveBeforeAssociations,
                association::save_before_associations,
            )
            .register(Group::Update, Step::UpdateSql, update::update_sql)
            .register(Group::Update, Step::UpdateExec, update::update_exec)
            .register(Group::Update, Step::AfterUpdate, update::after_update)
            .register(
                Group::Update,
                Step::SaveAfterAssociations,
                association::save_after_associations,
            )
            .register(Group::Update, Step::HookBeforeSave, lifecycle::before_save)
            .register(Group::Update, Step::HookBeforeUpdate, lifecycle::before_update)
            .register(Group::Update, Step::HookAfterUpdate, lifecycle::after_update)
            .register(Group::Update, Step::HookAfterSave, lifecycle::after_save);

        book.register(Group::Delete, Step::Delete, delete::delete)
            .register(Group::Delete, Step::BeforeDelete, delete::before_delete)
            .register(Group::Delete, Step::DeleteSql, delete::delete_sql)
            .register(Group::Delete, Step::DeleteExec, delete::delete_exec)
            .register(Group::Delete, Step::AfterDelete, delete::after_delete)
            .register(Group::Delete, Step::HookBeforeDelete, lifecycle::before_delete)
            .register(Group::Delete, Step::HookAfterDelete, lifecycle::after_delete);

        book
    }
}

impl fmt::Debug for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .hooks
            .iter()
            .map(|((group, step), hooks)| format!("{group}:{step:?}x{}", hooks.len()))
            .collect();
        keys.sort();
        f.debug_struct("Book").field("steps", &keys).finish()
    }
}
