//! Attribute parsing for `#[derive(Record)]`.
//!
//! Struct-level `#[record(...)]` keys: `table = "name"`, `hooks`.
//! Field-level keys: `primary_key`, `default`, `column = "name"`,
//! `name = "Name"`, `timestamp`, `ignore`, `skip` and
//! `relationship(...)`.

use syn::ext::IdentExt;
use syn::meta::ParseNestedMeta;
use syn::{
    Attribute, Data, DeriveInput, Error, Field, Fields, GenericArgument, Generics, Ident, LitStr,
    PathArguments, Result, Type,
};

/// A struct deriving `Record`.
#[derive(Debug)]
pub struct RecordDef {
    pub ident: Ident,
    pub generics: Generics,
    pub table: String,
    /// Forward lifecycle methods to `RecordHooks`.
    pub hooks: bool,
    pub fields: Vec<FieldDef>,
}

impl RecordDef {
    /// Fields that appear in the metadata.
    pub fn described(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.skip)
    }

    /// Fields readable and writable through `field` / `set_field`.
    pub fn scalars(&self) -> impl Iterator<Item = &FieldDef> {
        self.described().filter(|f| f.relationship.is_none())
    }

    pub fn relations(&self) -> impl Iterator<Item = (&FieldDef, &RelationDef)> {
        self.described()
            .filter_map(|f| f.relationship.as_ref().map(|r| (f, r)))
    }
}

#[derive(Debug)]
pub struct FieldDef {
    pub ident: Ident,
    pub ty: Type,
    /// In-memory name used by `Record::field`, e.g. `UserID` for `user_id`.
    pub name: String,
    pub column: Option<String>,
    pub primary_key: bool,
    pub default: bool,
    pub timestamp: bool,
    pub ignore: bool,
    pub skip: bool,
    pub relationship: Option<RelationDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    ManyToMany,
}

impl RelationKind {
    pub fn constructor(self) -> &'static str {
        match self {
            RelationKind::BelongsTo => "belongs_to",
            RelationKind::HasOne => "has_one",
            RelationKind::HasMany => "has_many",
            RelationKind::ManyToMany => "many_to_many",
        }
    }
}

#[derive(Debug)]
pub struct RelationDef {
    pub kind: RelationKind,
    /// Element type of the `Option<T>` / `Vec<T>` field.
    pub related: Type,
    pub foreign_key: Vec<String>,
    pub references: Vec<String>,
    /// `(type field, value)` for polymorphic has_one / has_many.
    pub polymorphic: Option<(String, String)>,
    pub join_table: Option<String>,
    pub join_foreign_key: Vec<String>,
    pub join_references: Vec<String>,
}

/// Parse the derive input.
pub fn parse_record(input: &DeriveInput) -> Result<RecordDef> {
    let named = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => named,
            _ => {
                return Err(Error::new_spanned(
                    input,
                    "Record requires a struct with named fields",
                ));
            }
        },
        _ => {
            return Err(Error::new_spanned(
                input,
                "Record can only be derived for structs",
            ));
        }
    };

    let mut table = None;
    let mut hooks = false;
    for attr in record_attrs(&input.attrs) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                table = Some(string_value(&meta)?);
            } else if meta.path.is_ident("hooks") {
                hooks = true;
            } else {
                return Err(meta.error("unknown record attribute (expected: table, hooks)"));
            }
            Ok(())
        })?;
    }

    let fields = named
        .named
        .iter()
        .map(parse_field)
        .collect::<Result<Vec<_>>>()?;

    Ok(RecordDef {
        ident: input.ident.clone(),
        generics: input.generics.clone(),
        table: table.unwrap_or_else(|| default_table(&input.ident.to_string())),
        hooks,
        fields,
    })
}

fn record_attrs(attrs: &[Attribute]) -> impl Iterator<Item = &Attribute> {
    attrs.iter().filter(|a| a.path().is_ident("record"))
}

fn string_value(meta: &ParseNestedMeta<'_>) -> Result<String> {
    let lit: LitStr = meta.value()?.parse()?;
    Ok(lit.value())
}

fn list_value(meta: &ParseNestedMeta<'_>) -> Result<Vec<String>> {
    Ok(string_value(meta)?
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

fn parse_field(field: &Field) -> Result<FieldDef> {
    let ident = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;
    let mut def = FieldDef {
        name: field_name(&ident.unraw().to_string()),
        ident,
        ty: field.ty.clone(),
        column: None,
        primary_key: false,
        default: false,
        timestamp: false,
        ignore: false,
        skip: false,
        relationship: None,
    };

    for attr in record_attrs(&field.attrs) {
        attr.parse_nested_meta(|meta| {
            let path = &meta.path;
            if path.is_ident("primary_key") {
                def.primary_key = true;
            } else if path.is_ident("default") {
                def.default = true;
            } else if path.is_ident("timestamp") {
                def.timestamp = true;
            } else if path.is_ident("ignore") {
                def.ignore = true;
            } else if path.is_ident("skip") {
                def.skip = true;
            } else if path.is_ident("column") {
                def.column = Some(string_value(&meta)?);
            } else if path.is_ident("name") {
                def.name = string_value(&meta)?;
            } else if path.is_ident("relationship") {
                def.relationship = Some(parse_relationship(&meta, &field.ty)?);
            } else {
                return Err(meta.error(
                    "unknown field attribute (expected: primary_key, default, column, name, \
                     timestamp, ignore, skip, relationship)",
                ));
            }
            Ok(())
        })?;
    }
    Ok(def)
}

fn parse_relationship(meta: &ParseNestedMeta<'_>, ty: &Type) -> Result<RelationDef> {
    let Some((wrapper, related)) = wrapped_type(ty) else {
        return Err(Error::new_spanned(
            ty,
            "relationship fields must be Option<T> or Vec<T>",
        ));
    };
    let mut kind = None;
    let mut foreign_key = Vec::new();
    let mut references = Vec::new();
    let mut polymorphic = None;
    let mut polymorphic_value = None;
    let mut join_table = None;
    let mut join_foreign_key = Vec::new();
    let mut join_references = Vec::new();

    meta.parse_nested_meta(|nested| {
        let path = &nested.path;
        let flag = [
            ("belongs_to", RelationKind::BelongsTo),
            ("has_one", RelationKind::HasOne),
            ("has_many", RelationKind::HasMany),
            ("many_to_many", RelationKind::ManyToMany),
        ]
        .into_iter()
        .find(|(name, _)| path.is_ident(name));
        if let Some((_, k)) = flag {
            if kind.replace(k).is_some() {
                return Err(nested.error("relationship kind given twice"));
            }
        } else if path.is_ident("foreign_key") {
            foreign_key = list_value(&nested)?;
        } else if path.is_ident("references") {
            references = list_value(&nested)?;
        } else if path.is_ident("polymorphic") {
            polymorphic = Some(string_value(&nested)?);
        } else if path.is_ident("polymorphic_value") {
            polymorphic_value = Some(string_value(&nested)?);
        } else if path.is_ident("join_table") {
            join_table = Some(string_value(&nested)?);
        } else if path.is_ident("join_foreign_key") {
            join_foreign_key = list_value(&nested)?;
        } else if path.is_ident("join_references") {
            join_references = list_value(&nested)?;
        } else {
            return Err(nested.error(
                "unknown relationship attribute (expected: belongs_to, has_one, has_many, \
                 many_to_many, foreign_key, references, polymorphic, polymorphic_value, \
                 join_table, join_foreign_key, join_references)",
            ));
        }
        Ok(())
    })?;

    let kind = kind.unwrap_or(if wrapper == "Vec" {
        RelationKind::HasMany
    } else {
        RelationKind::HasOne
    });
    let polymorphic = match (polymorphic, polymorphic_value) {
        (Some(field), Some(value)) => Some((field, value)),
        (None, None) => None,
        _ => {
            return Err(meta.error("polymorphic and polymorphic_value must be given together"));
        }
    };

    Ok(RelationDef {
        kind,
        related: related.clone(),
        foreign_key,
        references,
        polymorphic,
        join_table,
        join_foreign_key,
        join_references,
    })
}

/// `("Option" | "Vec", T)` for `Option<T>` / `Vec<T>`.
pub fn wrapped_type(ty: &Type) -> Option<(String, &Type)> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    let wrapper = segment.ident.to_string();
    if wrapper != "Option" && wrapper != "Vec" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(inner) if args.args.len() == 1 => Some((wrapper, inner)),
        _ => None,
    }
}

/// In-memory name for a Rust field: `user_id` becomes `UserID`,
/// `created_at` becomes `CreatedAt`.
pub fn field_name(ident: &str) -> String {
    ident
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            if part.eq_ignore_ascii_case("id") {
                return "ID".to_string();
            }
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect()
}

/// `TeamMember` becomes `team_members`.
fn default_table(struct_name: &str) -> String {
    let mut out = String::with_capacity(struct_name.len() + 2);
    for (i, c) in struct_name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out.push('s');
    out
}
