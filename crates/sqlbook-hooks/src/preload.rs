//! Eager loading of relationships.
//!
//! Each requested path is walked one segment at a time. For every segment
//! the keys of all current owners are collected, the related records are
//! fetched with a single `IN` query and distributed back to their owners;
//! the loaded records then become the owners for the next segment. A path
//! prefix shared by several requests is only loaded once.

use crate::book::{Book, Group, Step};
use crate::builder::{in_condition, in_quoted};
use crate::context::{Context, Target, unsupported_destination};
use crate::engine::Engine;
use crate::search::{Clause, Search};
use crate::steps::association::field_names;
use sqlbook_core::{
    DynRecords, Error, Polymorphic, Record, RecordMetadata, RecordSet, Relationship,
    RelationshipKind, Result, UsageErrorKind, Value, field_values, key_string, scan_row,
};
use std::collections::{HashMap, HashSet};

/// The `Preload` step: load every path in `search.preload` into the target.
#[tracing::instrument(level = "debug", skip_all)]
pub fn preload(book: &Book, ctx: &mut Context<'_>) -> Result<()> {
    if ctx.search.preload.is_empty() {
        return Ok(());
    }
    let root = ctx.target.record_type().ok_or_else(unsupported_destination)?;
    let requests = ctx.search.preload.clone();
    let engine = ctx.engine.clone();
    let mut loaded: HashSet<String> = HashSet::new();

    for request in &requests {
        let segments: Vec<&str> = request.path.split('.').collect();
        let last = segments.len() - 1;
        let mut owners = ctx.target.records_mut();
        let mut owner_type = root;

        for (idx, segment) in segments.iter().enumerate() {
            if owners.is_empty() {
                tracing::debug!(path = %request.path, segment, "no owners left, skipping");
                break;
            }
            let meta = owner_type.metadata();
            let Some((field, rel)) = meta
                .fields
                .iter()
                .find(|f| f.name == *segment)
                .and_then(|f| f.relationship.as_ref().map(|r| (f, r)))
            else {
                return Err(Error::usage(
                    UsageErrorKind::UnresolvedPreload,
                    format!(
                        "can't preload field {segment} for {} (path {})",
                        meta.type_name, request.path
                    ),
                ));
            };

            let prefix = segments[..=idx].join(".");
            if !loaded.contains(&prefix) {
                let loader = Loader {
                    book,
                    engine: &engine,
                    field: &field.name,
                    rel,
                    conditions: if idx == last { request.conditions.as_slice() } else { &[] },
                };
                match rel.kind {
                    RelationshipKind::BelongsTo => loader.belongs_to(&meta, &mut owners)?,
                    RelationshipKind::HasOne | RelationshipKind::HasMany => {
                        loader.has(&meta, &mut owners)?;
                    }
                    RelationshipKind::ManyToMany => loader.many_to_many(&meta, &mut owners)?,
                }
                loaded.insert(prefix);
            }

            if idx < last {
                owner_type = rel.related;
                owners = next_level(owners, &field.name);
            }
        }
    }
    Ok(())
}

/// The records held in `field` of every owner.
fn next_level<'a>(owners: Vec<&'a mut dyn Record>, field: &str) -> Vec<&'a mut dyn Record> {
    let mut next = Vec::new();
    for owner in owners {
        if let Some(slot) = owner.association_mut(field) {
            next.extend(slot.records_mut());
        }
    }
    next
}

/// Distinct key tuples of `owners`, skipping all-blank tuples.
fn collect_keys(owners: &[&mut dyn Record], fields: &[String]) -> Result<Vec<Vec<Value>>> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for owner in owners {
        let values = field_values(&**owner, fields)?;
        if values.iter().all(Value::is_blank) {
            continue;
        }
        if seen.insert(key_string(&values)) {
            keys.push(values);
        }
    }
    Ok(keys)
}

/// Positions of `records` grouped by the key in `fields`.
fn index_by_key(records: &[Box<dyn Record>], fields: &[String]) -> Result<HashMap<String, Vec<usize>>> {
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        let key = key_string(&field_values(&**record, fields)?);
        index.entry(key).or_default().push(i);
    }
    Ok(index)
}

struct Loader<'l> {
    book: &'l Book,
    engine: &'l Engine,
    field: &'l str,
    rel: &'l Relationship,
    conditions: &'l [Clause],
}

impl Loader<'_> {
    fn assign(&self, owner: &mut dyn Record, records: Vec<Box<dyn Record>>) -> Result<()> {
        let type_name = owner.record_type().name();
        let slot = owner.association_mut(self.field).ok_or_else(|| {
            Error::usage(
                UsageErrorKind::UnknownField,
                format!("{type_name} has no association {}", self.field),
            )
        })?;
        slot.assign(records)
    }

    /// Fetch related records whose `columns` match one of `keys`.
    fn query_related(
        &self,
        columns: &[String],
        keys: &[Vec<Value>],
        polymorphic: Option<&Polymorphic>,
    ) -> Result<Vec<Box<dyn Record>>> {
        let dialect = self.engine.dialect();
        let mut search = Search::new();
        search.where_clauses.push(in_condition(dialect, columns, keys));
        if let Some(p) = polymorphic {
            search.where_clauses.push(Clause::new(
                format!("{} = ?", dialect.quote(&p.type_db_name)),
                vec![Value::from(p.value.as_str())],
            ));
        }
        search.where_clauses.extend(self.conditions.iter().cloned());

        let mut set = DynRecords::new(self.rel.related);
        {
            let mut sub = self.engine.context_with(Target::Many(&mut set), search);
            self.book.exec_required(Group::Query, Step::Query, &mut sub)?;
        }
        tracing::debug!(
            field = self.field,
            kind = %self.rel.kind,
            keys = keys.len(),
            loaded = set.count(),
            "preloaded association"
        );
        Ok(set.into_inner())
    }

    fn belongs_to(&self, owner_meta: &RecordMetadata, owners: &mut [&mut dyn Record]) -> Result<()> {
        let related = self.rel.related.metadata();
        let owner_fields = field_names(owner_meta, &self.rel.foreign_field_names);
        let keys = collect_keys(owners, &owner_fields)?;
        if keys.is_empty() {
            return Ok(());
        }
        let results = self.query_related(&self.rel.association_foreign_db_names, &keys, None)?;
        let index = index_by_key(
            &results,
            &field_names(&related, &self.rel.association_foreign_field_names),
        )?;

        for owner in owners.iter_mut() {
            let key = key_string(&field_values(&**owner, &owner_fields)?);
            if let Some(&i) = index.get(&key).and_then(|group| group.first()) {
                self.assign(&mut **owner, vec![results[i].clone_record()])?;
            }
        }
        Ok(())
    }

    /// has_one and has_many. A has_many owner without matches gets an
    /// empty sequence; a has_one owner keeps whatever it held.
    fn has(&self, owner_meta: &RecordMetadata, owners: &mut [&mut dyn Record]) -> Result<()> {
        let related = self.rel.related.metadata();
        let owner_fields = field_names(owner_meta, &self.rel.association_foreign_field_names);
        let keys = collect_keys(owners, &owner_fields)?;
        if keys.is_empty() {
            return Ok(());
        }
        let results = self.query_related(
            &self.rel.foreign_db_names,
            &keys,
            self.rel.polymorphic.as_ref(),
        )?;
        let index = index_by_key(&results, &field_names(&related, &self.rel.foreign_field_names))?;

        for owner in owners.iter_mut() {
            let key = key_string(&field_values(&**owner, &owner_fields)?);
            let group = index.get(&key);
            if self.rel.kind == RelationshipKind::HasMany {
                let records = group
                    .map(|positions| positions.iter().map(|&i| results[i].clone_record()).collect())
                    .unwrap_or_default();
                self.assign(&mut **owner, records)?;
            } else if let Some(&i) = group.and_then(|g| g.first()) {
                self.assign(&mut **owner, vec![results[i].clone_record()])?;
            }
        }
        Ok(())
    }

    /// Related records are read together with the join table's source
    /// columns, then grouped by them. A record linked twice to the same
    /// owner is kept once.
    ///
    /// The statement is built by `QuerySql` but run here, since the rows
    /// carry join columns the related type has no field for; `QueryExec`
    /// and `AfterQuery` are not involved. `HookAfterFind` runs on the
    /// distinct records before they are handed to their owners.
    fn many_to_many(&self, owner_meta: &RecordMetadata, owners: &mut [&mut dyn Record]) -> Result<()> {
        let Some(join) = self.rel.join_table.as_ref() else {
            return Err(Error::usage(
                UsageErrorKind::UnknownRelationship,
                format!("many_to_many field {} has no join table", self.field),
            ));
        };
        let related_type = self.rel.related;
        let related = related_type.metadata();
        let owner_fields = field_names(owner_meta, &self.rel.foreign_db_names);
        let keys = collect_keys(owners, &owner_fields)?;
        if keys.is_empty() {
            return Ok(());
        }

        let dialect = self.engine.dialect();
        let join_table = dialect.quote(&join.table);
        let related_table = dialect.quote(&related.table_name);

        let mut select = format!("{related_table}.*");
        for (column, alias) in &join.projection.aliases {
            select.push_str(&format!(
                ", {join_table}.{} AS {}",
                dialect.quote(column),
                dialect.quote(alias)
            ));
        }
        let on: Vec<String> = join
            .destination_keys
            .iter()
            .map(|k| {
                format!(
                    "{join_table}.{} = {related_table}.{}",
                    dialect.quote(&k.db_name),
                    dialect.quote(&k.association_db_name)
                )
            })
            .collect();
        let join_columns: Vec<String> = join
            .source_keys
            .iter()
            .map(|k| format!("{join_table}.{}", dialect.quote(&k.db_name)))
            .collect();

        let mut search = Search::new()
            .select(select, Vec::new())
            .join(format!("INNER JOIN {join_table} ON {}", on.join(" AND ")), Vec::new());
        search
            .where_clauses
            .push(in_quoted(&join_columns, &keys));
        search.where_clauses.extend(self.conditions.iter().cloned());

        let mut set = DynRecords::new(related_type);
        let (sql, vars) = {
            let mut sub = self.engine.context_with(Target::Many(&mut set), search);
            self.book.exec_required(Group::Query, Step::QuerySql, &mut sub)?;
            (std::mem::take(&mut sub.sql), std::mem::take(&mut sub.vars))
        };
        self.engine.log_statement(&sql, vars.as_slice());
        let rows = self.engine.connection().query(&sql, vars.as_slice())?;

        let pk_fields: Vec<String> = related.primary_fields().map(|f| f.name.clone()).collect();
        let mut owner_keys: Vec<String> = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for row in &rows {
            let mut record = related_type.blank();
            scan_row(&mut *record, &related, row)?;
            let link: Vec<Value> = join
                .projection
                .aliases
                .iter()
                .map(|(_, alias)| row.get_by_name(alias).cloned().unwrap_or(Value::Null))
                .collect();
            let owner_key = key_string(&link);
            if !pk_fields.is_empty() {
                let pk = key_string(&field_values(&*record, &pk_fields)?);
                if !seen.insert((owner_key.clone(), pk)) {
                    continue;
                }
            }
            owner_keys.push(owner_key);
            set.push(record);
        }
        {
            let mut sub = self.engine.context_with(Target::Many(&mut set), Search::new());
            self.book.exec_optional(Group::Query, Step::HookAfterFind, &mut sub)?;
        }

        let mut groups: HashMap<String, Vec<Box<dyn Record>>> = HashMap::new();
        for (owner_key, record) in owner_keys.into_iter().zip(set.into_inner()) {
            groups.entry(owner_key).or_default().push(record);
        }
        tracing::debug!(
            field = self.field,
            rows = rows.len(),
            owners = groups.len(),
            "preloaded many_to_many association"
        );

        for owner in owners.iter_mut() {
            let key = key_string(&field_values(&**owner, &owner_fields)?);
            let records = groups
                .get(&key)
                .map(|group| group.iter().map(|r| r.clone_record()).collect())
                .unwrap_or_default();
            self.assign(&mut **owner, records)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        Comment, Company, Language, MockConnection, Post, User, engine_with, row,
    };
    use std::sync::{Arc, Mutex};

    fn user_rows(ids: &[i32]) -> Vec<sqlbook_core::Row> {
        ids.iter()
            .map(|&id| row(&["id", "name", "company_id"], vec![Value::Int(id), "u".into(), Value::Int(id * 10)]))
            .collect()
    }

    fn post(id: i32, user_id: i32) -> sqlbook_core::Row {
        row(
            &["id", "user_id", "title"],
            vec![Value::Int(id), Value::Int(user_id), format!("p{id}").into()],
        )
    }

    #[test]
    fn has_many_loads_with_one_query_and_empties_unmatched_owners() {
        let conn = MockConnection::new();
        conn.push_rows(user_rows(&[1, 2, 3]));
        conn.push_rows(vec![post(10, 1), post(11, 1), post(12, 3)]);
        let engine = engine_with(conn.clone());

        let users: Vec<User> = engine.find(Search::new().preload("Posts")).unwrap();

        assert_eq!(users[0].posts.len(), 2);
        assert!(users[1].posts.is_empty());
        assert_eq!(users[2].posts[0].id, 12);
        let statements = conn.statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[1].0,
            "SELECT * FROM \"posts\" WHERE (\"user_id\" IN (?1,?2,?3))"
        );
    }

    #[test]
    fn belongs_to_and_has_one() {
        let conn = MockConnection::new();
        conn.push_rows(user_rows(&[1, 2]));
        conn.push_rows(vec![row(&["id", "name"], vec![Value::Int(10), "acme".into()])]);
        conn.push_rows(vec![row(
            &["id", "user_id", "bio"],
            vec![Value::Int(5), Value::Int(2), "hi".into()],
        )]);
        let engine = engine_with(conn.clone());

        let users: Vec<User> = engine
            .find(Search::new().preload("Company").preload("Profile"))
            .unwrap();

        assert_eq!(
            users[0].company,
            Some(Company {
                id: 10,
                name: "acme".to_string()
            })
        );
        assert_eq!(users[1].company, None);
        assert_eq!(users[0].profile, None);
        assert_eq!(users[1].profile.as_ref().map(|p| p.id), Some(5));
        assert_eq!(
            conn.sql()[1],
            "SELECT * FROM \"companies\" WHERE (\"id\" IN (?1,?2))"
        );
    }

    #[test]
    fn nested_path_skips_when_first_level_is_empty() {
        let conn = MockConnection::new();
        conn.push_rows(user_rows(&[1]));
        let engine = engine_with(conn.clone());

        let users: Vec<User> = engine.find(Search::new().preload("Posts.Comments")).unwrap();

        assert!(users[0].posts.is_empty());
        assert_eq!(conn.sql().len(), 2);
    }

    #[test]
    fn nested_path_loads_each_level_once() {
        let conn = MockConnection::new();
        conn.push_rows(user_rows(&[1, 2]));
        conn.push_rows(vec![post(10, 1), post(11, 2)]);
        conn.push_rows(vec![row(
            &["id", "post_id", "body"],
            vec![Value::Int(100), Value::Int(11), "c".into()],
        )]);
        let engine = engine_with(conn.clone());

        let users: Vec<User> = engine
            .find(Search::new().preload("Posts").preload("Posts.Comments"))
            .unwrap();

        assert!(users[0].posts[0].comments.is_empty());
        assert_eq!(
            users[1].posts[0].comments,
            vec![Comment {
                id: 100,
                post_id: 11,
                body: "c".to_string()
            }]
        );
        let sql = conn.sql();
        assert_eq!(sql.len(), 3);
        assert_eq!(
            sql[2],
            "SELECT * FROM \"comments\" WHERE (\"post_id\" IN (?1,?2))"
        );
    }

    #[test]
    fn conditions_apply_to_the_last_segment_only() {
        let conn = MockConnection::new();
        conn.push_rows(user_rows(&[1]));
        conn.push_rows(vec![post(10, 1)]);
        let engine = engine_with(conn.clone());

        let _: Vec<User> = engine
            .find(Search::new().preload_with(
                "Posts.Comments",
                vec![Clause::new("body <> ?", vec!["spam".into()])],
            ))
            .unwrap();

        let statements = conn.statements();
        assert_eq!(statements[1].0, "SELECT * FROM \"posts\" WHERE (\"user_id\" IN (?1))");
        assert_eq!(
            statements[2].0,
            "SELECT * FROM \"comments\" WHERE (\"post_id\" IN (?1)) AND (body <> ?2)"
        );
    }

    #[test]
    fn many_to_many_groups_by_join_row_and_dedupes() {
        let conn = MockConnection::new();
        conn.push_rows(user_rows(&[1, 2]));
        let lang = |id: i32, name: &str, owner: i32| {
            row(
                &["id", "name", "__join_user_id"],
                vec![Value::Int(id), name.into(), Value::Int(owner)],
            )
        };
        conn.push_rows(vec![
            lang(7, "rust", 1),
            lang(8, "go", 1),
            lang(7, "rust", 2),
            lang(7, "rust", 1),
        ]);
        let engine = engine_with(conn.clone());

        let users: Vec<User> = engine.find(Search::new().preload("Languages")).unwrap();

        let names = |u: &User| u.languages.iter().map(|l| l.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&users[0]), vec!["rust", "go"]);
        assert_eq!(names(&users[1]), vec!["rust"]);
        assert_eq!(users[1].languages[0], Language { id: 7, name: "rust".to_string() });
        assert_eq!(
            conn.sql()[1],
            "SELECT \"languages\".*, \"user_languages\".\"user_id\" AS \"__join_user_id\" \
             FROM \"languages\" INNER JOIN \"user_languages\" ON \"user_languages\".\"language_id\" = \"languages\".\"id\" \
             WHERE (\"user_languages\".\"user_id\" IN (?1,?2))"
        );
    }

    #[test]
    fn many_to_many_records_run_after_find() {
        let conn = MockConnection::new();
        conn.push_rows(user_rows(&[1]));
        conn.push_rows(vec![
            row(
                &["id", "name", "__join_user_id"],
                vec![Value::Int(7), "rust".into(), Value::Int(1)],
            ),
            row(
                &["id", "name", "__join_user_id"],
                vec![Value::Int(7), "rust".into(), Value::Int(1)],
            ),
        ]);
        let found = Arc::new(Mutex::new(Vec::new()));
        let mut book = Book::default();
        let seen = Arc::clone(&found);
        book.register(Group::Query, Step::HookAfterFind, move |_, ctx| {
            let mut seen = seen.lock().unwrap();
            for record in ctx.target.records_mut() {
                seen.push(record.record_type().name());
            }
            Ok(())
        });
        let engine = engine_with(conn).with_book(book);

        let users: Vec<User> = engine.find(Search::new().preload("Languages")).unwrap();

        assert_eq!(users[0].languages.len(), 1);
        assert_eq!(users[0].trail, vec!["after_find"]);
        assert_eq!(*found.lock().unwrap(), vec!["Language", "User"]);
    }

    #[test]
    fn unknown_segment_is_a_usage_error() {
        let conn = MockConnection::new();
        conn.push_rows(user_rows(&[1]));
        let engine = engine_with(conn);
        let err = engine
            .find::<User>(Search::new().preload("Name"))
            .unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::UnresolvedPreload));
        assert!(err.to_string().contains("can't preload field Name for User"));
    }

    #[test]
    fn single_record_owner() {
        let conn = MockConnection::new();
        conn.push_rows(vec![row(&["id", "user_id", "title"], vec![Value::Int(3), Value::Int(1), "t".into()])]);
        conn.push_rows(vec![row(
            &["id", "post_id", "body"],
            vec![Value::Int(9), Value::Int(3), "c".into()],
        )]);
        let engine = engine_with(conn);
        let post: Post = engine
            .find_one(Search::new().preload("Comments"))
            .unwrap();
        assert_eq!(post.comments.len(), 1);
        assert_eq!(post.comments[0].body, "c");
    }
}
