//! Create pipeline.

use crate::book::{Book, Group, Step};
use crate::builder::{changeable_field, push_option};
use crate::context::{Context, unsupported_destination};
use crate::steps::ql;
use sqlbook_core::{
    Error, RelationshipKind, Result, UsageErrorKind, Value, in_transaction, is_ql,
    wrap_transaction_text,
};

/// Entry step.
///
/// belongs_to associations are saved before the INSERT so their keys can be
/// copied into the record; everything else is saved from `AfterCreate`.
pub fn create(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    book.exec_required(Group::Create, Step::BeforeCreate, ctx)?;
    if ctx.should_save_associations() {
        book.exec_required(Group::Create, Step::SaveBeforeAssociations, ctx)?;
    }
    book.exec_optional(Group::Create, Step::UpdateTimestamp, ctx)?;
    book.exec_required(Group::Create, Step::CreateSql, ctx)?;
    book.exec_required(Group::Create, Step::CreateExec, ctx)?;
    book.exec_required(Group::Create, Step::AfterCreate, ctx)
}

pub fn before_create(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    book.exec_optional(Group::Create, Step::HookBeforeSave, ctx)?;
    book.exec_optional(Group::Create, Step::HookBeforeCreate, ctx)
}

/// Fill blank `CreatedAt` and `UpdatedAt` fields with the current time.
pub fn update_timestamp(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    let meta = ctx.metadata()?;
    let now = ctx.engine.now();
    let record = ctx.target.one()?;
    for name in ["CreatedAt", "UpdatedAt"] {
        let Some(field) = meta.field(name).filter(|f| f.is_normal) else {
            continue;
        };
        if record.field(&field.name).is_none_or(|v| v.is_blank()) {
            record.set_field(&field.name, now.clone())?;
        }
    }
    Ok(())
}

/// Build the INSERT.
///
/// Blank fields with a database default are left out and recorded in
/// `options.blank_columns_with_default`. A blank primary key is left out so
/// the backend can generate it.
pub fn create_sql(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    let meta = ctx.metadata()?;
    let quoted_table = ctx.quoted_table(&meta);

    let mut pending: Vec<(String, Value)> = Vec::new();
    let mut blank_with_default = Vec::new();
    {
        let record = ctx.target.one_ref().ok_or_else(unsupported_destination)?;
        let read = |name: &str| {
            record.field(name).ok_or_else(|| {
                Error::usage(
                    UsageErrorKind::UnknownField,
                    format!("{} has no field {name}", meta.type_name),
                )
            })
        };
        for field in &meta.fields {
            if !changeable_field(&ctx.search, field) {
                continue;
            }
            if field.is_normal && !field.is_ignored {
                let value = read(&field.name)?;
                let blank = value.is_blank();
                if blank && field.has_default {
                    blank_with_default.push(field.db_name.clone());
                } else if !field.is_primary_key || !blank {
                    pending.push((field.db_name.clone(), value));
                }
            } else if let Some(rel) = field
                .relationship
                .as_ref()
                .filter(|r| r.kind == RelationshipKind::BelongsTo)
            {
                for name in &rel.foreign_field_names {
                    let Some(fk) = meta.field(name) else { continue };
                    if !changeable_field(&ctx.search, fk) {
                        pending.push((fk.db_name.clone(), read(&fk.name)?));
                    }
                }
            }
        }
    }

    let mut columns = Vec::with_capacity(pending.len());
    let mut placeholders = Vec::with_capacity(pending.len());
    for (column, value) in pending {
        columns.push(ctx.dialect().quote(&column));
        placeholders.push(ctx.add_var(value));
    }
    let blank_with_default: Vec<String> = blank_with_default
        .iter()
        .map(|c| ctx.dialect().quote(c))
        .collect();
    ctx.options.blank_columns_with_default = blank_with_default;

    let mut sql = if columns.is_empty() {
        format!("INSERT INTO {quoted_table} DEFAULT VALUES")
    } else {
        format!(
            "INSERT INTO {quoted_table} ({}) VALUES ({})",
            columns.join(","),
            placeholders.join(",")
        )
    };
    push_option(&mut sql, ctx.options.insert_option.as_deref());
    if let Some(pk) = meta.primary_field() {
        let suffix = ctx
            .dialect()
            .returning_suffix(&quoted_table, &ctx.dialect().quote(&pk.db_name));
        push_option(&mut sql, suffix.as_deref());
    }
    if is_ql(ctx.dialect()) {
        sql = wrap_transaction_text(&sql);
    }
    ctx.sql = sql;
    Ok(())
}

/// Run the INSERT and write the generated key back into the record.
pub fn create_exec(_book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    if ctx.sql.is_empty() {
        return Err(Error::usage(UsageErrorKind::MissingSql, "missing insert sql"));
    }
    let meta = ctx.metadata()?;
    let quoted_table = ctx.quoted_table(&meta);
    let pk = meta.primary_field();
    let returning = pk.and_then(|f| {
        ctx.dialect()
            .returning_suffix(&quoted_table, &ctx.dialect().quote(&f.db_name))
    });

    ctx.engine.log_statement(&ctx.sql, ctx.vars.as_slice());

    if let (Some(pk), Some(_)) = (pk, returning) {
        let rows = ctx.engine.connection().query(&ctx.sql, ctx.vars.as_slice())?;
        ctx.rows_affected = rows.len() as u64;
        if let Some(value) = rows.first().and_then(|row| row.get(0)).cloned() {
            ctx.target
                .one()?
                .set_field(&pk.name, value)
                .map_err(|_| Error::Unaddressable {
                    field: pk.name.clone(),
                })?;
        }
        return Ok(());
    }

    let pk_was_blank = pk.is_some_and(|f| {
        ctx.target
            .one_ref()
            .and_then(|r| r.field(&f.name))
            .is_none_or(|v| v.is_blank())
    });
    let result = if is_ql(ctx.dialect()) {
        in_transaction(ctx.engine.connection(), |tx| {
            tx.execute(&ctx.sql, ctx.vars.as_slice())
        })?
    } else {
        ctx.engine.connection().execute(&ctx.sql, ctx.vars.as_slice())?
    };
    ctx.rows_affected = result.rows_affected;

    if let (Some(pk), true, Some(id)) = (pk, pk_was_blank, result.last_insert_id) {
        ctx.target
            .one()?
            .set_field(&pk.name, Value::BigInt(id))
            .map_err(|_| Error::Unaddressable {
                field: pk.name.clone(),
            })?;
    }
    Ok(())
}

/// Post-insert work: the `ql` row-identity fix-up, the after hooks, then
/// the remaining associations.
pub fn after_create(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    if is_ql(ctx.dialect()) {
        ql::after_create(book, ctx)?;
    }
    book.exec_optional(Group::Create, Step::HookAfterCreate, ctx)?;
    book.exec_optional(Group::Create, Step::HookAfterSave, ctx)?;
    book.exec_required(Group::Update, Step::SaveAfterAssociations, ctx)
}
