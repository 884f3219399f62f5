//! Steps that call the record lifecycle methods.

use crate::book::Book;
use crate::context::Context;
use sqlbook_core::{Record, Result};

fn each_record(ctx: &mut Context<'_>, hook: impl Fn(&mut dyn Record) -> Result<()>) -> Result<()> {
    for record in ctx.target.records_mut() {
        hook(record)?;
    }
    Ok(())
}

pub fn before_save(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    each_record(ctx, |r| r.before_save())
}

pub fn before_create(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    each_record(ctx, |r| r.before_create())
}

pub fn after_create(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    each_record(ctx, |r| r.after_create())
}

pub fn after_save(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    each_record(ctx, |r| r.after_save())
}

pub fn before_update(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    each_record(ctx, |r| r.before_update())
}

pub fn after_update(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    each_record(ctx, |r| r.after_update())
}

pub fn before_delete(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    each_record(ctx, |r| r.before_delete())
}

pub fn after_delete(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    each_record(ctx, |r| r.after_delete())
}

/// Runs for the single record or every record of a sequence.
pub fn after_find(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    each_record(ctx, |r| r.after_find())
}
