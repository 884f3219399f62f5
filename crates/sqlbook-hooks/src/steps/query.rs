//! Query pipeline: build the SELECT, scan rows into the destination, then
//! preload and run `after_find`.

use crate::book::{Book, Group, Step};
use crate::builder::{self, push_option};
use crate::context::{Context, Target, unsupported_destination};
use sqlbook_core::{Error, Result, scan_row};

/// Entry step: `QuerySql`, `QueryExec`, then the optional `AfterQuery`.
pub fn query(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    book.exec_required(Group::Query, Step::QuerySql, ctx)?;
    book.exec_required(Group::Query, Step::QueryExec, ctx)?;
    book.exec_optional(Group::Query, Step::AfterQuery, ctx)
}

pub fn query_sql(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    if let Some(order) = ctx.options.order_by_pk.filter(|_| ctx.search.orders.is_empty()) {
        let meta = ctx.metadata()?;
        if let Some(pk) = meta.primary_field() {
            let quoted_table = ctx.quoted_table(&meta);
            let dialect = ctx.dialect();
            let clause = format!(
                "{}{} {}",
                dialect.query_field_name(&quoted_table),
                dialect.quote(&pk.db_name),
                order.as_sql()
            );
            ctx.search.orders.push(clause);
        }
    }
    builder::prepare_query(ctx)
}

/// Run the SELECT and scan every row.
///
/// A sequence destination is emptied first and receives one element per
/// row. A single-record destination is scanned once per row, so the last
/// row wins; no rows is [`Error::RecordNotFound`].
pub fn query_exec(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    if ctx.target.is_none() {
        return Err(unsupported_destination());
    }
    let meta = ctx.metadata()?;
    push_option(&mut ctx.sql, ctx.options.query_option.as_deref());

    ctx.engine.log_statement(&ctx.sql, ctx.vars.as_slice());
    let rows = ctx.engine.connection().query(&ctx.sql, ctx.vars.as_slice())?;
    ctx.rows_affected = rows.len() as u64;

    match &mut ctx.target {
        Target::Many(set) => {
            set.reset();
            for row in &rows {
                scan_row(set.push_blank(), &meta, row)?;
            }
        }
        Target::One(record) => {
            if rows.is_empty() {
                return Err(Error::RecordNotFound);
            }
            for row in &rows {
                scan_row(&mut **record, &meta, row)?;
            }
        }
        Target::None => return Err(unsupported_destination()),
    }
    Ok(())
}

pub fn after_query(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    if !ctx.search.preload.is_empty() {
        book.exec_required(Group::Query, Step::Preload, ctx)?;
    }
    book.exec_optional(Group::Query, Step::HookAfterFind, ctx)
}
