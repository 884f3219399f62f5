//! Update pipeline.

use crate::book::{Book, Group, Step};
use crate::builder::{changeable_field, has_conditions, push_option, where_sql};
use crate::context::{Context, unsupported_destination};
use sqlbook_core::{
    Error, RelationshipKind, Result, UsageErrorKind, Value, in_transaction, is_ql,
    wrap_transaction_text,
};

/// Entry step.
pub fn update(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    book.exec_required(Group::Update, Step::BeforeUpdate, ctx)?;
    book.exec_required(Group::Update, Step::UpdateSql, ctx)?;
    book.exec_required(Group::Update, Step::UpdateExec, ctx)?;
    book.exec_required(Group::Update, Step::AfterUpdate, ctx)
}

fn require_conditions(ctx: &Context<'_>) -> Result<()> {
    let meta = ctx.metadata()?;
    if has_conditions(ctx, &meta) {
        Ok(())
    } else {
        Err(Error::usage(
            UsageErrorKind::MissingWhere,
            "missing WHERE condition for update",
        ))
    }
}

pub fn before_update(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    require_conditions(ctx)?;
    book.exec_required(Group::Update, Step::UpdateTimestamp, ctx)?;
    book.exec_required(Group::Update, Step::AssignUpdatingAttrs, ctx)?;
    book.exec_required(Group::Update, Step::SaveBeforeAssociations, ctx)?;
    if !ctx.options.update_column {
        book.exec_optional(Group::Update, Step::HookBeforeSave, ctx)?;
        book.exec_optional(Group::Update, Step::HookBeforeUpdate, ctx)?;
    }
    Ok(())
}

/// Set `UpdatedAt`, unless this is a column-only update.
pub fn update_timestamp(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    if ctx.options.update_column {
        return Ok(());
    }
    let meta = ctx.metadata()?;
    let Some(field) = meta.field("UpdatedAt").filter(|f| f.is_normal) else {
        return Ok(());
    };
    let now = ctx.engine.now();
    ctx.target.one()?.set_field(&field.name, now.clone())?;
    if let Some(attrs) = ctx.options.update_attrs.as_mut() {
        attrs.insert(field.name.clone(), now);
    }
    Ok(())
}

/// Resolve `options.update_attrs` to columns and copy the values into the
/// record.
///
/// Keys that name no field are kept as raw column names. Unless
/// `ignore_protected_attrs` is set, primary key and non-changeable fields
/// are dropped.
pub fn assign_updating_attrs(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    let Some(attrs) = ctx.options.update_attrs.clone() else {
        return Ok(());
    };
    let meta = ctx.metadata()?;
    let ignore_protected = ctx.options.ignore_protected_attrs;
    let record = ctx.target.one()?;

    let mut resolved = Vec::with_capacity(attrs.len());
    for (key, value) in attrs {
        match meta.field(&key) {
            Some(field) if field.is_normal && !field.is_ignored => {
                if !ignore_protected
                    && (field.is_primary_key || !changeable_field(&ctx.search, field))
                {
                    continue;
                }
                record.set_field(&field.name, value.clone())?;
                resolved.push((field.db_name.clone(), value));
            }
            Some(_) => {}
            None => resolved.push((key, value)),
        }
    }
    ctx.options.resolved_attrs = Some(resolved);
    Ok(())
}

/// Build the UPDATE.
///
/// With `update_attrs` only those columns are set; otherwise every
/// changeable non-key column. An empty SET list leaves `ctx.sql` empty.
pub fn update_sql(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    if ctx.options.update_attrs.is_some() && ctx.options.resolved_attrs.is_none() {
        book.exec_optional(Group::Update, Step::AssignUpdatingAttrs, ctx)?;
    }
    let meta = ctx.metadata()?;
    let quoted_table = ctx.quoted_table(&meta);

    let pending: Vec<(String, Value)> = match ctx.options.resolved_attrs.clone() {
        Some(resolved) => resolved,
        None => {
            let record = ctx.target.one_ref().ok_or_else(unsupported_destination)?;
            let mut pending = Vec::new();
            for field in &meta.fields {
                if !changeable_field(&ctx.search, field) {
                    continue;
                }
                if field.is_normal && !field.is_ignored {
                    if field.is_primary_key {
                        continue;
                    }
                    if let Some(value) = record.field(&field.name) {
                        pending.push((field.db_name.clone(), value));
                    }
                } else if let Some(rel) = field
                    .relationship
                    .as_ref()
                    .filter(|r| r.kind == RelationshipKind::BelongsTo)
                {
                    for name in &rel.foreign_field_names {
                        let Some(fk) = meta.field(name) else { continue };
                        if changeable_field(&ctx.search, fk) {
                            continue;
                        }
                        if let Some(value) = record.field(&fk.name) {
                            pending.push((fk.db_name.clone(), value));
                        }
                    }
                }
            }
            pending
        }
    };

    if pending.is_empty() {
        ctx.sql.clear();
        return Ok(());
    }

    let mut sets = Vec::with_capacity(pending.len());
    for (column, value) in pending {
        let column = ctx.dialect().quote(&column);
        let placeholder = ctx.add_var(value);
        sets.push(format!("{column} = {placeholder}"));
    }

    let mut sql = format!("UPDATE {quoted_table} SET {}", sets.join(", "));
    let condition = where_sql(ctx, &meta, false)?;
    if !condition.is_empty() {
        sql.push(' ');
        sql.push_str(&condition);
    }
    push_option(&mut sql, ctx.options.update_option.as_deref());
    if is_ql(ctx.dialect()) {
        sql = wrap_transaction_text(&sql);
    }
    ctx.sql = sql;
    Ok(())
}

/// Run the UPDATE in a transaction.
pub fn update_exec(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    if ctx.sql.is_empty() {
        return Err(Error::usage(UsageErrorKind::MissingSql, "missing update sql"));
    }
    ctx.engine.log_statement(&ctx.sql, ctx.vars.as_slice());
    let result = in_transaction(ctx.engine.connection(), |tx| {
        tx.execute(&ctx.sql, ctx.vars.as_slice())
    })?;
    ctx.rows_affected = result.rows_affected;
    Ok(())
}

pub fn after_update(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    require_conditions(ctx)?;
    if !ctx.options.update_column {
        book.exec_optional(Group::Update, Step::HookAfterUpdate, ctx)?;
        book.exec_optional(Group::Update, Step::HookAfterSave, ctx)?;
    }
    book.exec_required(Group::Update, Step::SaveAfterAssociations, ctx)
}
