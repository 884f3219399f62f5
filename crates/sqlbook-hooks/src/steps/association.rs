//! Saving associated records along with their owner.
//!
//! belongs_to targets are saved before the owner so their keys can be
//! copied into the owner's foreign key fields. has_one, has_many and
//! many_to_many targets are saved after it, once the owner's key is known.
//! Each associated record is saved through its own operation on a fresh
//! context: created when its primary key is blank, updated otherwise.

use crate::book::{Book, Group, Step};
use crate::builder::{changeable_field, primary_key_values};
use crate::context::{Context, Target, Vars};
use crate::engine::Engine;
use sqlbook_core::{
    Error, JoinTable, Record, RecordMetadata, RelationshipKind, Result, UsageErrorKind, Value,
    field_values, in_transaction, is_ql, wrap_transaction_text,
};

/// Whether `record` has not been stored yet, judged by a blank primary key.
pub fn is_new_record(record: &dyn Record) -> bool {
    let meta = record.record_type().metadata();
    primary_key_values(Some(record), &meta).is_empty()
}

/// Create `record` if it is new, update it otherwise.
pub fn save_record(book: &Book, engine: &Engine, record: &mut dyn Record) -> Result<u64> {
    let (group, step) = if is_new_record(record) {
        (Group::Create, Step::Create)
    } else {
        (Group::Update, Step::Update)
    };
    let mut ctx = engine.context(Target::One(record));
    book.exec_required(group, step, &mut ctx)?;
    Ok(ctx.rows_affected)
}

/// Map field or column names to the in-memory field names of `meta`.
pub(crate) fn field_names(meta: &RecordMetadata, names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|n| meta.field(n).map_or_else(|| n.clone(), |f| f.name.clone()))
        .collect()
}

pub fn save_before_associations(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    if !ctx.should_save_associations() {
        return Ok(());
    }
    let meta = ctx.metadata()?;
    let engine = ctx.engine.clone();

    for (field, rel) in meta.relationships() {
        if rel.kind != RelationshipKind::BelongsTo || !changeable_field(&ctx.search, field) {
            continue;
        }
        let related = rel.related.metadata();
        let key_fields = field_names(&related, &rel.association_foreign_field_names);
        let owner_fields = field_names(&meta, &rel.foreign_field_names);

        let record = ctx.target.one()?;
        let mut keys = Vec::new();
        if let Some(slot) = record.association_mut(&field.name) {
            for child in slot.records_mut() {
                save_record(book, &engine, child)?;
                keys = field_values(child, &key_fields)?;
            }
        }
        for (name, value) in owner_fields.iter().zip(keys) {
            record.set_field(name, value)?;
        }
        tracing::debug!(association = %field.name, "saved belongs_to association");
    }
    Ok(())
}

pub fn save_after_associations(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    if !ctx.should_save_associations() {
        return Ok(());
    }
    let meta = ctx.metadata()?;
    let engine = ctx.engine.clone();

    for (field, rel) in meta.relationships() {
        if rel.kind == RelationshipKind::BelongsTo || !changeable_field(&ctx.search, field) {
            continue;
        }
        let related = rel.related.metadata();
        let record = ctx.target.one()?;

        match rel.kind {
            RelationshipKind::HasOne | RelationshipKind::HasMany => {
                let owner_keys = field_values(
                    record,
                    &field_names(&meta, &rel.association_foreign_field_names),
                )?;
                let child_fields = field_names(&related, &rel.foreign_field_names);
                let type_field = rel.polymorphic.as_ref().map(|p| {
                    let name = related
                        .field(&p.type_field)
                        .map_or_else(|| p.type_field.clone(), |f| f.name.clone());
                    (name, Value::from(p.value.as_str()))
                });

                let Some(slot) = record.association_mut(&field.name) else {
                    continue;
                };
                for child in slot.records_mut() {
                    for (name, value) in child_fields.iter().zip(&owner_keys) {
                        child.set_field(name, value.clone())?;
                    }
                    if let Some((name, value)) = &type_field {
                        child.set_field(name, value.clone())?;
                    }
                    save_record(book, &engine, child)?;
                }
            }
            RelationshipKind::ManyToMany => {
                let Some(join) = rel.join_table.as_ref() else {
                    return Err(Error::usage(
                        UsageErrorKind::UnknownRelationship,
                        format!("many_to_many field {} has no join table", field.name),
                    ));
                };
                let owner_keys =
                    field_values(record, &field_names(&meta, &rel.foreign_db_names))?;
                let child_fields = field_names(&related, &rel.association_foreign_db_names);

                let Some(slot) = record.association_mut(&field.name) else {
                    continue;
                };
                for child in slot.records_mut() {
                    save_record(book, &engine, child)?;
                    let child_keys = field_values(child, &child_fields)?;
                    add_join_row(&engine, join, &owner_keys, &child_keys)?;
                }
            }
            RelationshipKind::BelongsTo => {}
        }
        tracing::debug!(association = %field.name, kind = %rel.kind, "saved association");
    }
    Ok(())
}

/// Insert the join row linking an owner and a related record, unless it
/// already exists.
fn add_join_row(
    engine: &Engine,
    join: &JoinTable,
    owner_keys: &[Value],
    related_keys: &[Value],
) -> Result<()> {
    let dialect = engine.dialect();
    let table = dialect.quote(&join.table);
    let pairs: Vec<(&str, &Value)> = join
        .source_keys
        .iter()
        .map(|k| k.db_name.as_str())
        .zip(owner_keys)
        .chain(
            join.destination_keys
                .iter()
                .map(|k| k.db_name.as_str())
                .zip(related_keys),
        )
        .collect();

    let mut vars = Vars::new();
    let columns: Vec<String> = pairs.iter().map(|(c, _)| dialect.quote(c)).collect();
    let values: Vec<String> = pairs
        .iter()
        .map(|(_, v)| vars.push(dialect, (*v).clone()))
        .collect();
    let matches: Vec<String> = pairs
        .iter()
        .map(|(c, v)| format!("{} = {}", dialect.quote(c), vars.push(dialect, (*v).clone())))
        .collect();

    let sql = format!(
        "INSERT INTO {table} ({}) SELECT {} WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE {})",
        columns.join(","),
        values.join(","),
        matches.join(" AND ")
    );
    engine.log_statement(&sql, vars.as_slice());
    if is_ql(dialect) {
        let sql = wrap_transaction_text(&sql);
        in_transaction(engine.connection(), |tx| tx.execute(&sql, vars.as_slice()))?;
    } else {
        engine.connection().execute(&sql, vars.as_slice())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Search;
    use crate::testing::{
        Company, Language, MockConnection, Post, Profile, User, engine_with,
    };
    use sqlbook_core::ExecResult;

    fn inserted(id: i64) -> ExecResult {
        ExecResult {
            rows_affected: 1,
            last_insert_id: Some(id),
        }
    }

    #[test]
    fn new_record_is_judged_by_blank_key() {
        assert!(is_new_record(&User::default()));
        assert!(!is_new_record(&User {
            id: 1,
            ..User::default()
        }));
    }

    #[test]
    fn belongs_to_is_saved_first_and_key_copied() {
        let conn = MockConnection::new();
        conn.push_exec(inserted(10)).push_exec(inserted(1));
        let engine = engine_with(conn.clone());
        let mut user = User {
            name: "ada".to_string(),
            company: Some(Company {
                name: "acme".to_string(),
                ..Company::default()
            }),
            ..User::default()
        };
        engine.create(&mut user).unwrap();

        assert_eq!(user.company_id, 10);
        let statements = conn.statements();
        assert_eq!(
            statements[0].0,
            "INSERT INTO \"companies\" (\"name\") VALUES (?1)"
        );
        assert!(statements[1].0.starts_with("INSERT INTO \"users\""));
        assert_eq!(statements[1].1[1], Value::BigInt(10));
    }

    #[test]
    fn has_many_and_has_one_receive_owner_key() {
        let conn = MockConnection::new();
        conn.push_exec(inserted(3))
            .push_exec(inserted(20))
            .push_exec(inserted(21))
            .push_exec(inserted(30));
        let engine = engine_with(conn.clone());
        let mut user = User {
            name: "ada".to_string(),
            posts: vec![
                Post {
                    title: "a".to_string(),
                    ..Post::default()
                },
                Post {
                    title: "b".to_string(),
                    ..Post::default()
                },
            ],
            profile: Some(Profile::default()),
            ..User::default()
        };
        engine.create(&mut user).unwrap();

        assert_eq!(user.id, 3);
        assert!(user.posts.iter().all(|p| p.user_id == 3));
        assert_eq!(user.posts[0].id, 20);
        assert_eq!(user.posts[1].id, 21);
        let profile = user.profile.as_ref().unwrap();
        assert_eq!((profile.id, profile.user_id), (30, 3));
        assert_eq!(
            conn.sql()[1],
            "INSERT INTO \"posts\" (\"user_id\",\"title\") VALUES (?1,?2)"
        );
    }

    #[test]
    fn stored_children_are_updated_not_inserted() {
        let conn = MockConnection::new();
        let engine = engine_with(conn.clone());
        let mut user = User {
            id: 5,
            posts: vec![Post {
                id: 8,
                title: "kept".to_string(),
                ..Post::default()
            }],
            ..User::default()
        };
        engine.save(&mut user).unwrap();

        let sql = conn.sql();
        assert_eq!(sql.len(), 2);
        assert!(sql[0].starts_with("UPDATE \"users\" SET"));
        assert_eq!(
            sql[1],
            "UPDATE \"posts\" SET \"user_id\" = ?1, \"title\" = ?2 WHERE \"posts\".\"id\" = ?3"
        );
        assert_eq!(user.posts[0].user_id, 5);
    }

    #[test]
    fn many_to_many_adds_join_row_once() {
        let conn = MockConnection::new();
        conn.push_exec(inserted(1)).push_exec(inserted(40));
        let engine = engine_with(conn.clone());
        let mut user = User {
            name: "ada".to_string(),
            languages: vec![Language {
                name: "rust".to_string(),
                ..Language::default()
            }],
            ..User::default()
        };
        engine.create(&mut user).unwrap();

        let statements = conn.statements();
        assert_eq!(statements.len(), 3);
        assert_eq!(
            statements[2].0,
            "INSERT INTO \"user_languages\" (\"user_id\",\"language_id\") SELECT ?1,?2 \
             WHERE NOT EXISTS (SELECT 1 FROM \"user_languages\" WHERE \"user_id\" = ?3 AND \"language_id\" = ?4)"
        );
        assert_eq!(
            statements[2].1,
            vec![
                Value::BigInt(1),
                Value::BigInt(40),
                Value::BigInt(1),
                Value::BigInt(40)
            ]
        );
    }

    #[test]
    fn disabled_or_omitted_associations_are_not_saved() {
        let conn = MockConnection::new();
        let engine = engine_with(conn.clone());
        let mut user = User {
            id: 2,
            posts: vec![Post::default()],
            ..User::default()
        };
        let mut ctx = engine.context(Target::One(&mut user));
        ctx.options.save_associations = Some(false);
        engine.exec(Group::Update, Step::Update, &mut ctx).unwrap();
        drop(ctx);
        assert_eq!(conn.sql().len(), 1);

        let conn = MockConnection::new();
        let engine = engine_with(conn.clone());
        engine
            .update(&mut user, Search::new().omit_fields(&["Posts"]))
            .unwrap();
        assert_eq!(conn.sql().len(), 1);
    }
}
