//! Checks on a parsed record that attribute parsing alone cannot make.
//!
//! Every problem is collected so the user sees them all in one build.

use crate::parse::{RecordDef, RelationKind};
use std::collections::HashSet;
use syn::Error;

pub fn validate_record(def: &RecordDef) -> Result<(), Error> {
    let mut errors = Vec::new();

    if def.scalars().next().is_none() {
        errors.push(Error::new(
            def.ident.span(),
            "Record struct needs at least one column field",
        ));
    }

    let mut seen = HashSet::new();
    for field in def.described() {
        if !seen.insert(field.name.as_str()) {
            errors.push(Error::new(
                field.ident.span(),
                format!("duplicate field name {}", field.name),
            ));
        }
    }

    for field in &def.fields {
        if field.skip && (field.primary_key || field.relationship.is_some()) {
            errors.push(Error::new(
                field.ident.span(),
                "skip cannot be combined with primary_key or relationship",
            ));
        }
        let Some(rel) = &field.relationship else {
            continue;
        };
        if field.primary_key || field.default || field.timestamp || field.column.is_some() {
            errors.push(Error::new(
                field.ident.span(),
                "relationship fields are not columns",
            ));
        }
        match rel.kind {
            RelationKind::ManyToMany => {
                if rel.join_table.is_none() {
                    errors.push(Error::new(
                        field.ident.span(),
                        "many_to_many needs join_table",
                    ));
                }
                if rel.join_foreign_key.is_empty() || rel.join_references.is_empty() {
                    errors.push(Error::new(
                        field.ident.span(),
                        "many_to_many needs join_foreign_key and join_references",
                    ));
                }
                for (joins, keys, what) in [
                    (&rel.join_foreign_key, &rel.foreign_key, "foreign_key"),
                    (&rel.join_references, &rel.references, "references"),
                ] {
                    if !keys.is_empty() && keys.len() != joins.len() {
                        errors.push(Error::new(
                            field.ident.span(),
                            format!("{what} must name one column per join column"),
                        ));
                    }
                }
            }
            kind => {
                if rel.foreign_key.is_empty() {
                    errors.push(Error::new(field.ident.span(), "relationship needs foreign_key"));
                }
                let references = if rel.references.is_empty() {
                    1
                } else {
                    rel.references.len()
                };
                if references != rel.foreign_key.len() && !rel.foreign_key.is_empty() {
                    errors.push(Error::new(
                        field.ident.span(),
                        "foreign_key and references must have the same length",
                    ));
                }
                if rel.polymorphic.is_some() && kind == RelationKind::BelongsTo {
                    errors.push(Error::new(
                        field.ident.span(),
                        "polymorphic applies to has_one and has_many only",
                    ));
                }
                if rel.join_table.is_some() {
                    errors.push(Error::new(
                        field.ident.span(),
                        "join_table applies to many_to_many only",
                    ));
                }
            }
        }
    }

    let mut errors = errors.into_iter();
    match errors.next() {
        None => Ok(()),
        Some(mut combined) => {
            for err in errors {
                combined.combine(err);
            }
            Err(combined)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_record;
    use syn::{DeriveInput, parse_quote};

    fn check(input: &DeriveInput) -> Result<(), Error> {
        validate_record(&parse_record(input).unwrap())
    }

    #[test]
    fn accepts_a_plain_record() {
        let input: DeriveInput = parse_quote! {
            struct Post {
                id: i64,
                #[record(relationship(belongs_to, foreign_key = "UserID", references = "ID"))]
                user: Option<User>,
            }
        };
        assert!(check(&input).is_ok());
    }

    #[test]
    fn needs_a_column() {
        let input: DeriveInput = parse_quote! {
            struct Empty {
                #[record(skip)]
                scratch: u8,
            }
        };
        let err = check(&input).unwrap_err();
        assert!(err.to_string().contains("at least one column"));
    }

    #[test]
    fn many_to_many_needs_join_columns() {
        let input: DeriveInput = parse_quote! {
            struct User {
                id: i64,
                #[record(relationship(many_to_many))]
                languages: Vec<Language>,
            }
        };
        let message = check(&input).unwrap_err().into_compile_error().to_string();
        assert!(message.contains("needs join_table"));
        assert!(message.contains("join_foreign_key and join_references"));
    }

    #[test]
    fn polymorphic_belongs_to_is_rejected() {
        let input: DeriveInput = parse_quote! {
            struct Toy {
                id: i64,
                #[record(relationship(
                    belongs_to,
                    foreign_key = "OwnerID",
                    polymorphic = "OwnerType",
                    polymorphic_value = "users"
                ))]
                owner: Option<User>,
            }
        };
        assert!(check(&input).is_err());
    }

    #[test]
    fn mismatched_key_lengths_are_rejected() {
        let input: DeriveInput = parse_quote! {
            struct Line {
                id: i64,
                #[record(relationship(belongs_to, foreign_key = "OrderID,Region", references = "ID"))]
                order: Option<Order>,
            }
        };
        assert!(check(&input).is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let input: DeriveInput = parse_quote! {
            struct Twice {
                id: i64,
                #[record(name = "ID")]
                other: i64,
            }
        };
        let err = check(&input).unwrap_err();
        assert!(err.to_string().contains("duplicate field name ID"));
    }
}
