//! SQL fragment rendering shared by the steps.

use crate::context::{Context, Vars};
use crate::search::{Clause, Search};
use sqlbook_core::{Dialect, FieldDescriptor, Record, RecordMetadata, Result, Value};

/// Render `clause`, replacing each `?` marker with the dialect placeholder
/// for the next argument. Markers beyond the last argument are kept as-is.
pub fn render_clause(dialect: &dyn Dialect, vars: &mut Vars, clause: &Clause) -> String {
    let mut out = String::with_capacity(clause.sql.len() + 8);
    let mut args = clause.args.iter();
    for c in clause.sql.chars() {
        if c == '?' {
            if let Some(arg) = args.next() {
                out.push_str(&vars.push(dialect, arg.clone()));
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Whether create/update may write `field` under `search`'s select/omit lists.
pub fn changeable_field(search: &Search, field: &FieldDescriptor) -> bool {
    let named = |s: &String| *s == field.name || *s == field.db_name;
    if !search.select_fields.is_empty() {
        return search.select_fields.iter().any(named);
    }
    !search.omit_fields.iter().any(named)
}

/// Primary key `(column, value)` pairs of `record`, or nothing if any part
/// of the key is blank.
pub fn primary_key_values(record: Option<&dyn Record>, meta: &RecordMetadata) -> Vec<(String, Value)> {
    let Some(record) = record else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for field in meta.primary_fields() {
        match record.field(&field.name) {
            Some(value) if !value.is_blank() => out.push((field.db_name.clone(), value)),
            _ => return Vec::new(),
        }
    }
    out
}

/// Whether the operation is restricted by a primary key or a condition.
pub fn has_conditions(ctx: &Context<'_>, meta: &RecordMetadata) -> bool {
    !ctx.search.where_clauses.is_empty() || !primary_key_values(ctx.target.one_ref(), meta).is_empty()
}

/// Render the WHERE clause for the operation, or an empty string.
///
/// The target's primary key comes first, unparenthesized, as
/// `<qualifier><column> = <placeholder>`; then each condition in
/// parentheses; then, when `soft_delete` is set and the search is scoped,
/// the `deleted_at IS NULL` filter.
pub fn where_sql(ctx: &mut Context<'_>, meta: &RecordMetadata, soft_delete: bool) -> Result<String> {
    let quoted_table = ctx.quoted_table(meta);
    let qualifier = ctx.dialect().query_field_name(&quoted_table);
    let mut parts = Vec::new();

    for (db_name, value) in primary_key_values(ctx.target.one_ref(), meta) {
        let column = ctx.dialect().quote(&db_name);
        let placeholder = ctx.add_var(value);
        parts.push(format!("{qualifier}{column} = {placeholder}"));
    }

    let dialect = ctx.engine.dialect();
    for clause in &ctx.search.where_clauses {
        let rendered = render_clause(dialect, &mut ctx.vars, clause);
        parts.push(format!("({rendered})"));
    }

    if soft_delete && !ctx.search.unscoped {
        if let Some(field) = meta.soft_delete_field() {
            parts.push(format!(
                "{qualifier}{} IS NULL",
                dialect.quote(&field.db_name)
            ));
        }
    }

    if parts.is_empty() {
        return Ok(String::new());
    }
    Ok(format!("WHERE {}", parts.join(" AND ")))
}

/// `key IN (...)` over one or more columns.
///
/// A single column renders `col IN (?,?)`; composite keys render
/// `(a,b) IN ((?,?),(?,?))`.
pub fn in_condition(dialect: &dyn Dialect, columns: &[String], keys: &[Vec<Value>]) -> Clause {
    let quoted: Vec<String> = columns.iter().map(|c| dialect.quote(c)).collect();
    in_quoted(&quoted, keys)
}

/// [`in_condition`] over columns that are already quoted.
pub fn in_quoted(quoted: &[String], keys: &[Vec<Value>]) -> Clause {
    let args: Vec<Value> = keys.iter().flatten().cloned().collect();
    let sql = if quoted.len() == 1 {
        let marks = vec!["?"; keys.len()].join(",");
        format!("{} IN ({})", quoted[0], marks)
    } else {
        let tuple = format!("({})", vec!["?"; quoted.len()].join(","));
        let tuples = vec![tuple.as_str(); keys.len()].join(",");
        format!("({}) IN ({})", quoted.join(","), tuples)
    };
    Clause::new(sql, args)
}

/// Build the SELECT statement for the context into `ctx.sql`.
pub fn prepare_query(ctx: &mut Context<'_>) -> Result<()> {
    let meta = ctx.metadata()?;
    let quoted_table = ctx.quoted_table(&meta);

    let mut sql = {
        let dialect = ctx.engine.dialect();
        let select = match &ctx.search.select {
            Some(clause) => render_clause(dialect, &mut ctx.vars, clause),
            None => "*".to_string(),
        };
        let mut sql = format!("SELECT {select} FROM {quoted_table}");
        for join in &ctx.search.joins {
            sql.push(' ');
            sql.push_str(&render_clause(dialect, &mut ctx.vars, join));
        }
        sql
    };

    let condition = where_sql(ctx, &meta, true)?;
    if !condition.is_empty() {
        sql.push(' ');
        sql.push_str(&condition);
    }
    if !ctx.search.orders.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&ctx.search.orders.join(","));
    }
    if let Some(limit) = ctx.search.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = ctx.search.offset {
        sql.push_str(&format!(" OFFSET {offset}"));
    }

    ctx.sql = sql;
    Ok(())
}

/// Append `" {extra}"` when `extra` is set and non-empty.
pub fn push_option(sql: &mut String, extra: Option<&str>) {
    if let Some(extra) = extra.filter(|e| !e.is_empty()) {
        sql.push(' ');
        sql.push_str(extra);
    }
}
