//! Row-identity fix-up for `ql` backends.
//!
//! `ql` identifies rows by the built-in `id()` function rather than by an
//! `id` column, and wants it compared against a signed integer. After an
//! INSERT, the record is written again through an UPDATE whose last
//! `id = $n` predicate is rewritten to `id()= $n`.

use crate::book::{Book, Group, Step};
use crate::context::{Context, Target, Vars};
use regex::Regex;
use sqlbook_core::{Error, Result, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

const ID_PREDICATE: &str = " id = ";

fn placeholder_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\$(\d+)"))
        .as_ref()
        .map_err(|e| Error::Custom(format!("invalid placeholder pattern: {e}")))
}

pub(crate) fn after_create(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    let meta = ctx.metadata()?;
    let engine = ctx.engine.clone();
    let record = ctx.target.one()?;
    let attrs: BTreeMap<String, Value> = meta
        .normal_fields()
        .filter(|f| !f.is_primary_key)
        .filter_map(|f| record.field(&f.name).map(|v| (f.name.clone(), v)))
        .collect();

    let mut sub = Context::new(engine, Target::One(record));
    sub.options.ignore_protected_attrs = true;
    sub.options.update_attrs = Some(attrs);
    book.exec_required(Group::Update, Step::UpdateSql, &mut sub)?;
    fix_where(&mut sub.sql, &mut sub.vars)?;
    book.exec_required(Group::Update, Step::UpdateExec, &mut sub)
}

/// Rewrite the last `id = $n` after the last `WHERE` to `id()= $n` and
/// convert parameter `n` to a signed integer.
///
/// SQL without such a predicate is left untouched.
pub(crate) fn fix_where(sql: &mut String, vars: &mut Vars) -> Result<()> {
    let (Some(where_at), Some(id_at)) = (sql.rfind("WHERE"), sql.rfind(ID_PREDICATE)) else {
        return Ok(());
    };
    if id_at < where_at {
        return Ok(());
    }
    let rest = id_at + ID_PREDICATE.len();
    let index = placeholder_pattern()?
        .captures(&sql[rest..])
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .ok_or_else(|| {
            Error::Custom(format!(
                "expected a numbered placeholder after `id =` in: {sql}"
            ))
        })?;

    sql.replace_range(id_at..rest, " id()= ");
    if let Some(value) = index.checked_sub(1).and_then(|i| vars.get_mut(i)) {
        *value = std::mem::replace(value, Value::Null).to_signed();
    }
    Ok(())
}
