//! Delete pipeline. Tables with a `deleted_at` column are soft-deleted.

use crate::book::{Book, Group, Step};
use crate::builder::{has_conditions, push_option, where_sql};
use crate::context::Context;
use sqlbook_core::{
    Error, Result, UsageErrorKind, in_transaction, is_ql, wrap_transaction_text,
};

const SOFT_DELETE_COLUMN: &str = "deleted_at";

/// Entry step.
pub fn delete(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    book.exec_required(Group::Delete, Step::BeforeDelete, ctx)?;
    book.exec_required(Group::Delete, Step::DeleteSql, ctx)?;
    book.exec_required(Group::Delete, Step::DeleteExec, ctx)?;
    book.exec_required(Group::Delete, Step::AfterDelete, ctx)
}

pub fn before_delete(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    let meta = ctx.metadata()?;
    if !has_conditions(ctx, &meta) {
        return Err(Error::usage(
            UsageErrorKind::MissingWhere,
            "Missing WHERE clause while deleting",
        ));
    }
    book.exec_optional(Group::Delete, Step::HookBeforeDelete, ctx)
}

/// Build the DELETE, or an UPDATE of `deleted_at` when the record type
/// declares it and the table has the column.
pub fn delete_sql(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    let meta = ctx.metadata()?;
    let quoted_table = ctx.quoted_table(&meta);
    let table = ctx
        .search
        .table
        .clone()
        .unwrap_or_else(|| meta.table_name.clone());

    let soft_field = match meta.soft_delete_field() {
        Some(field)
            if ctx
                .dialect()
                .has_column(ctx.engine.connection(), &table, SOFT_DELETE_COLUMN)? =>
        {
            Some(field)
        }
        _ => None,
    };

    let mut sql = if let Some(field) = soft_field {
        let now = ctx.engine.now();
        ctx.target.one()?.set_field(&field.name, now.clone())?;
        let column = ctx.dialect().quote(SOFT_DELETE_COLUMN);
        let placeholder = ctx.add_var(now);
        format!("UPDATE {quoted_table} SET {column} = {placeholder}")
    } else {
        format!("DELETE FROM {quoted_table}")
    };

    let condition = where_sql(ctx, &meta, false)?;
    if !condition.is_empty() {
        sql.push(' ');
        sql.push_str(&condition);
    }
    push_option(&mut sql, ctx.options.delete_option.as_deref());
    if is_ql(ctx.dialect()) {
        sql = wrap_transaction_text(&sql);
    }
    ctx.sql = sql;
    Ok(())
}

pub fn delete_exec(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    if ctx.sql.is_empty() {
        return Err(Error::usage(UsageErrorKind::MissingSql, "missing delete sql"));
    }
    ctx.engine.log_statement(&ctx.sql, ctx.vars.as_slice());
    let result = in_transaction(ctx.engine.connection(), |tx| {
        tx.execute(&ctx.sql, ctx.vars.as_slice())
    })?;
    ctx.rows_affected = result.rows_affected;
    Ok(())
}

pub fn after_delete(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    book.exec_optional(Group::Delete, Step::HookAfterDelete, ctx)
}
