//! Record metadata: fields, relationships and the per-type cache.
//!
//! Metadata is built once per record type from [`Record::describe`] and
//! shared behind an `Arc`. It is read-only afterwards, so every pipeline
//! step can consult it without locking.
//!
//! [`Record::describe`]: crate::Record::describe

use crate::error::{Error, Result, UsageErrorKind};
use crate::record::{Record, RecordType};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Convert an in-memory field name to its conventional column name.
///
/// `UserID` becomes `user_id`, `HTTPServer` becomes `http_server`, and
/// names that are already snake case pass through.
pub fn to_db_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                if prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next_is_lower)
                {
                    out.push('_');
                }
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Metadata for one field of a record.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// In-memory field name, as accepted by `Record::field`.
    pub name: String,
    /// Path to the field through embedded structs, ending with `name`.
    pub names: Vec<String>,
    /// Column name.
    pub db_name: String,
    pub is_primary_key: bool,
    /// Plain column (not a relationship, not ignored).
    pub is_normal: bool,
    pub is_ignored: bool,
    /// The column has a database default; a blank value is left out of INSERT.
    pub has_default: bool,
    pub relationship: Option<Relationship>,
}

impl FieldDescriptor {
    /// A plain column whose column name follows [`to_db_name`].
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            names: vec![name.to_string()],
            db_name: to_db_name(name),
            is_primary_key: false,
            is_normal: true,
            is_ignored: false,
            has_default: false,
            relationship: None,
        }
    }

    /// A relationship field. Relationship fields are never columns.
    pub fn relation(name: &str, relationship: Relationship) -> Self {
        Self {
            is_normal: false,
            relationship: Some(relationship),
            ..Self::new(name)
        }
    }

    /// Override the column name.
    pub fn column(mut self, db_name: &str) -> Self {
        self.db_name = db_name.to_string();
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn default_value(mut self) -> Self {
        self.has_default = true;
        self
    }

    /// Exclude the field from every statement.
    pub fn ignored(mut self) -> Self {
        self.is_ignored = true;
        self.is_normal = false;
        self
    }

    /// Record that the field is reached through embedded structs.
    pub fn embedded_in(mut self, path: &[&str]) -> Self {
        self.names = path
            .iter()
            .map(|s| (*s).to_string())
            .chain(std::iter::once(self.name.clone()))
            .collect();
        self
    }
}

/// The kind of relationship between two record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// The owner holds the foreign key.
    BelongsTo,
    /// The related record holds the foreign key; at most one.
    HasOne,
    /// The related records hold the foreign key.
    HasMany,
    /// Linked through a join table.
    ManyToMany,
}

impl RelationshipKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            RelationshipKind::BelongsTo => "belongs_to",
            RelationshipKind::HasOne => "has_one",
            RelationshipKind::HasMany => "has_many",
            RelationshipKind::ManyToMany => "many_to_many",
        }
    }

    /// Whether the owner's field is a sequence.
    pub const fn is_many(self) -> bool {
        matches!(
            self,
            RelationshipKind::HasMany | RelationshipKind::ManyToMany
        )
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "belongs_to" => Ok(RelationshipKind::BelongsTo),
            "has_one" => Ok(RelationshipKind::HasOne),
            "has_many" => Ok(RelationshipKind::HasMany),
            "many_to_many" => Ok(RelationshipKind::ManyToMany),
            other => Err(Error::usage(
                UsageErrorKind::UnknownRelationship,
                format!("unsupported relation {other}"),
            )),
        }
    }
}

/// Polymorphic discriminator for has_one / has_many.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polymorphic {
    /// Field on the related record holding the owner's type.
    pub type_field: String,
    pub type_db_name: String,
    /// Value written to and matched against `type_db_name`.
    pub value: String,
}

/// One key pair of a join table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinKey {
    /// Column in the join table.
    pub db_name: String,
    /// Column it references on the owner (source) or related (destination) table.
    pub association_db_name: String,
}

/// Projection used when reading join-table rows alongside related records.
///
/// Built once when the join table is described.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinProjection {
    /// `(join column, result alias)` for every source key.
    pub aliases: Vec<(String, String)>,
}

impl JoinProjection {
    fn for_keys(keys: &[JoinKey]) -> Self {
        Self {
            aliases: keys
                .iter()
                .map(|k| (k.db_name.clone(), format!("__join_{}", k.db_name)))
                .collect(),
        }
    }
}

/// Join table of a many_to_many relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub table: String,
    /// Keys pointing at the owner.
    pub source_keys: Vec<JoinKey>,
    /// Keys pointing at the related record.
    pub destination_keys: Vec<JoinKey>,
    pub projection: JoinProjection,
}

impl JoinTable {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            source_keys: Vec::new(),
            destination_keys: Vec::new(),
            projection: JoinProjection::default(),
        }
    }

    /// Add a join column referencing `owner_column` on the owner's table.
    pub fn source(mut self, join_column: &str, owner_column: &str) -> Self {
        self.source_keys.push(JoinKey {
            db_name: join_column.to_string(),
            association_db_name: owner_column.to_string(),
        });
        self.projection = JoinProjection::for_keys(&self.source_keys);
        self
    }

    /// Add a join column referencing `related_column` on the related table.
    pub fn destination(mut self, join_column: &str, related_column: &str) -> Self {
        self.destination_keys.push(JoinKey {
            db_name: join_column.to_string(),
            association_db_name: related_column.to_string(),
        });
        self
    }
}

/// How a relationship field connects its owner to the related type.
///
/// For belongs_to, `foreign_*` name fields on the owner and
/// `association_foreign_*` name fields on the related type. For has_one and
/// has_many it is the other way round. For many_to_many, `foreign_*` name
/// the owner columns referenced by the join table's source keys and
/// `association_foreign_*` the related columns referenced by its
/// destination keys.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub kind: RelationshipKind,
    pub related: RecordType,
    pub foreign_field_names: Vec<String>,
    pub foreign_db_names: Vec<String>,
    pub association_foreign_field_names: Vec<String>,
    pub association_foreign_db_names: Vec<String>,
    pub polymorphic: Option<Polymorphic>,
    pub join_table: Option<JoinTable>,
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

fn db_names(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| to_db_name(s)).collect()
}

impl Relationship {
    fn keyed(
        kind: RelationshipKind,
        related: RecordType,
        foreign: &[&str],
        association: &[&str],
    ) -> Self {
        Self {
            kind,
            related,
            foreign_field_names: owned(foreign),
            foreign_db_names: db_names(foreign),
            association_foreign_field_names: owned(association),
            association_foreign_db_names: db_names(association),
            polymorphic: None,
            join_table: None,
        }
    }

    /// The owner's `foreign` fields reference the related type's `association` fields.
    pub fn belongs_to<T: Record + Default>(foreign: &[&str], association: &[&str]) -> Self {
        Self::keyed(
            RelationshipKind::BelongsTo,
            RecordType::of::<T>(),
            foreign,
            association,
        )
    }

    /// The related type's `foreign` fields reference the owner's `association` fields.
    pub fn has_one<T: Record + Default>(foreign: &[&str], association: &[&str]) -> Self {
        Self::keyed(
            RelationshipKind::HasOne,
            RecordType::of::<T>(),
            foreign,
            association,
        )
    }

    pub fn has_many<T: Record + Default>(foreign: &[&str], association: &[&str]) -> Self {
        Self::keyed(
            RelationshipKind::HasMany,
            RecordType::of::<T>(),
            foreign,
            association,
        )
    }

    pub fn many_to_many<T: Record + Default>(join_table: JoinTable) -> Self {
        let foreign: Vec<String> = join_table
            .source_keys
            .iter()
            .map(|k| k.association_db_name.clone())
            .collect();
        let association: Vec<String> = join_table
            .destination_keys
            .iter()
            .map(|k| k.association_db_name.clone())
            .collect();
        Self {
            kind: RelationshipKind::ManyToMany,
            related: RecordType::of::<T>(),
            foreign_field_names: foreign.clone(),
            foreign_db_names: foreign,
            association_foreign_field_names: association.clone(),
            association_foreign_db_names: association,
            polymorphic: None,
            join_table: Some(join_table),
        }
    }

    /// Build a keyed relationship from a kind name such as `"has_many"`.
    pub fn parse(
        kind: &str,
        related: RecordType,
        foreign: &[&str],
        association: &[&str],
    ) -> Result<Self> {
        let kind: RelationshipKind = kind.parse()?;
        if kind == RelationshipKind::ManyToMany {
            return Err(Error::usage(
                UsageErrorKind::UnknownRelationship,
                "many_to_many needs a join table",
            ));
        }
        Ok(Self::keyed(kind, related, foreign, association))
    }

    /// Mark a has_one / has_many as polymorphic: the related record's
    /// `type_field` holds `value`.
    pub fn polymorphic(mut self, type_field: &str, value: &str) -> Self {
        self.polymorphic = Some(Polymorphic {
            type_field: type_field.to_string(),
            type_db_name: to_db_name(type_field),
            value: value.to_string(),
        });
        self
    }

    /// Override the column names for the foreign fields.
    pub fn foreign_columns(mut self, columns: &[&str]) -> Self {
        self.foreign_db_names = owned(columns);
        self
    }

    /// Override the column names for the association fields.
    pub fn association_columns(mut self, columns: &[&str]) -> Self {
        self.association_foreign_db_names = owned(columns);
        self
    }
}

/// Metadata for a record type.
#[derive(Debug, Clone)]
pub struct RecordMetadata {
    /// Unqualified Rust type name. Filled in by the cache.
    pub type_name: &'static str,
    pub table_name: String,
    pub fields: Vec<FieldDescriptor>,
    primary: Vec<usize>,
}

impl RecordMetadata {
    /// Build metadata for `table_name`.
    ///
    /// If no field is flagged as primary key, a normal field whose column
    /// is `id` becomes the primary key.
    pub fn new(table_name: &str, mut fields: Vec<FieldDescriptor>) -> Self {
        if !fields.iter().any(|f| f.is_primary_key) {
            if let Some(field) = fields
                .iter_mut()
                .find(|f| f.is_normal && f.db_name == "id")
            {
                field.is_primary_key = true;
            }
        }
        let primary = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_primary_key)
            .map(|(i, _)| i)
            .collect();
        Self {
            type_name: "",
            table_name: table_name.to_string(),
            fields,
            primary,
        }
    }

    /// Look a field up by in-memory name, column name, or the column name
    /// `name` converts to.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.field_by_db_name(name))
            .or_else(|| {
                let converted = to_db_name(name);
                self.fields.iter().find(|f| f.db_name == converted)
            })
    }

    pub fn field_by_db_name(&self, db_name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.db_name == db_name)
    }

    pub fn primary_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.primary.iter().map(|&i| &self.fields[i])
    }

    /// The first primary key field.
    pub fn primary_field(&self) -> Option<&FieldDescriptor> {
        self.primary.first().map(|&i| &self.fields[i])
    }

    pub fn has_composite_key(&self) -> bool {
        self.primary.len() > 1
    }

    /// Fields that map to columns.
    pub fn normal_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_normal && !f.is_ignored)
    }

    /// Fields that carry a relationship.
    pub fn relationships(&self) -> impl Iterator<Item = (&FieldDescriptor, &Relationship)> {
        self.fields
            .iter()
            .filter_map(|f| f.relationship.as_ref().map(|r| (f, r)))
    }

    /// The relationship declared on field `name`.
    pub fn relationship(&self, name: &str) -> Option<(&FieldDescriptor, &Relationship)> {
        let field = self.field(name)?;
        field.relationship.as_ref().map(|r| (field, r))
    }

    /// The `deleted_at` column, when the type is soft-deletable.
    pub fn soft_delete_field(&self) -> Option<&FieldDescriptor> {
        self.normal_fields().find(|f| f.db_name == "deleted_at")
    }
}

/// Process-wide cache of record metadata, keyed by type.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: RwLock<HashMap<TypeId, Arc<RecordMetadata>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for `record_type`, building and caching it on first use.
    ///
    /// Concurrent first requests may both build; the first insert wins and
    /// every caller gets that entry.
    pub fn get(&self, record_type: RecordType) -> Arc<RecordMetadata> {
        let id = record_type.id();
        let cached = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries.get(&id).cloned()
        };
        if let Some(meta) = cached {
            return meta;
        }

        let mut built = record_type.build_metadata();
        built.type_name = record_type.name();
        tracing::trace!(
            record = built.type_name,
            table = %built.table_name,
            "built record metadata"
        );

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(id).or_insert_with(|| Arc::new(built)))
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The shared metadata cache.
pub fn metadata_cache() -> &'static MetadataCache {
    static CACHE: OnceLock<MetadataCache> = OnceLock::new();
    CACHE.get_or_init(MetadataCache::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[derive(Debug, Clone, Default)]
    struct Company {
        id: i64,
    }

    impl Record for Company {
        fn describe() -> RecordMetadata {
            RecordMetadata::new("companies", vec![FieldDescriptor::new("ID")])
        }

        fn field(&self, name: &str) -> Option<Value> {
            (name == "ID").then(|| self.id.into())
        }

        fn set_field(&mut self, _name: &str, _value: Value) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Employee;

    impl Record for Employee {
        fn describe() -> RecordMetadata {
            RecordMetadata::new(
                "employees",
                vec![
                    FieldDescriptor::new("Code").primary_key(),
                    FieldDescriptor::new("Region").primary_key(),
                    FieldDescriptor::new("CompanyID"),
                    FieldDescriptor::new("Nickname").ignored(),
                    FieldDescriptor::new("DeletedAt"),
                    FieldDescriptor::relation(
                        "Company",
                        Relationship::belongs_to::<Company>(&["CompanyID"], &["ID"]),
                    ),
                ],
            )
        }

        fn field(&self, _name: &str) -> Option<Value> {
            None
        }

        fn set_field(&mut self, _name: &str, _value: Value) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn db_name_conversion() {
        assert_eq!(to_db_name("UserID"), "user_id");
        assert_eq!(to_db_name("ID"), "id");
        assert_eq!(to_db_name("CreatedAt"), "created_at");
        assert_eq!(to_db_name("HTTPServer"), "http_server");
        assert_eq!(to_db_name("Address2Line"), "address2_line");
        assert_eq!(to_db_name("already_snake"), "already_snake");
    }

    #[test]
    fn id_column_becomes_primary_key() {
        let meta = RecordType::of::<Company>().metadata();
        assert_eq!(meta.primary_field().map(|f| f.name.as_str()), Some("ID"));
        assert!(!meta.has_composite_key());
        assert_eq!(meta.type_name, "Company");
    }

    #[test]
    fn composite_keys_and_lookups() {
        let meta = RecordType::of::<Employee>().metadata();
        let pks: Vec<&str> = meta.primary_fields().map(|f| f.db_name.as_str()).collect();
        assert_eq!(pks, vec!["code", "region"]);
        assert!(meta.has_composite_key());

        assert_eq!(
            meta.field("company_id").map(|f| f.name.as_str()),
            Some("CompanyID")
        );
        assert_eq!(
            meta.field("CompanyID").map(|f| f.db_name.as_str()),
            Some("company_id")
        );
        assert!(meta.field("Nickname").is_some_and(|f| f.is_ignored));
        let normal: Vec<&str> = meta.normal_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(normal, vec!["Code", "Region", "CompanyID", "DeletedAt"]);
        assert!(meta.soft_delete_field().is_some());
    }

    #[test]
    fn relationship_lookup() {
        let meta = RecordType::of::<Employee>().metadata();
        let (field, rel) = meta.relationship("Company").unwrap();
        assert!(!field.is_normal);
        assert_eq!(rel.kind, RelationshipKind::BelongsTo);
        assert_eq!(rel.foreign_db_names, vec!["company_id"]);
        assert_eq!(rel.association_foreign_db_names, vec!["id"]);
        assert_eq!(rel.related, RecordType::of::<Company>());
        assert!(meta.relationship("CompanyID").is_none());
    }

    #[test]
    fn join_table_projection() {
        let jt = JoinTable::new("user_languages")
            .source("user_id", "id")
            .destination("language_id", "id");
        assert_eq!(
            jt.projection.aliases,
            vec![("user_id".to_string(), "__join_user_id".to_string())]
        );
        let rel = Relationship::many_to_many::<Company>(jt);
        assert_eq!(rel.foreign_db_names, vec!["id"]);
        assert!(rel.kind.is_many());
    }

    #[test]
    fn unknown_relationship_kind() {
        let err = "one_to_few".parse::<RelationshipKind>().unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::UnknownRelationship));
        assert!(err.to_string().contains("unsupported relation"));
        assert!(Relationship::parse("has_many", RecordType::of::<Company>(), &["A"], &["B"]).is_ok());
    }

    #[test]
    fn polymorphic_descriptor() {
        let rel = Relationship::has_many::<Company>(&["OwnerID"], &["ID"]).polymorphic("OwnerType", "users");
        let poly = rel.polymorphic.unwrap();
        assert_eq!(poly.type_db_name, "owner_type");
        assert_eq!(poly.value, "users");
    }

    #[test]
    fn cache_returns_shared_entry() {
        let cache = MetadataCache::new();
        let a = cache.get(RecordType::of::<Company>());
        let b = cache.get(RecordType::of::<Company>());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }
}
