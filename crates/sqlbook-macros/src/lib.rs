//! Derive macro for sqlbook records.
//!
//! `#[derive(Record)]` writes the `Record` impl a record type would
//! otherwise spell out by hand: the metadata table, `field` / `set_field`
//! by name, the association slots, and optionally the lifecycle hooks.
//! The generated code refers to `::sqlbook_core`, so the deriving crate
//! must depend on it.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;

mod parse;
mod validate;

use parse::{FieldDef, RecordDef, RelationDef, RelationKind, parse_record};

/// Derive `sqlbook_core::Record`.
///
/// # Attributes
///
/// On the struct:
/// - `#[record(table = "name")]`: table name (defaults to the plural
///   snake case of the struct name)
/// - `#[record(hooks)]`: forward the lifecycle methods to
///   `sqlbook_core::RecordHooks`, which the type then implements
///
/// On a field:
/// - `primary_key`: part of the primary key (otherwise the `id` column is)
/// - `default`: the column has a database default; left out of INSERT when blank
/// - `column = "name"`: column name (defaults to the snake case of the name)
/// - `name = "Name"`: in-memory name (defaults to `user_id` -> `UserID`)
/// - `timestamp`: an `i64` / `Option<i64>` read back as a timestamp value
/// - `ignore`: described but left out of every statement
/// - `skip`: not part of the record at all
/// - `relationship(...)`: an `Option<T>` / `Vec<T>` association; see below
///
/// `relationship` takes one of `belongs_to`, `has_one`, `has_many`,
/// `many_to_many` (default: `has_many` for `Vec`, `has_one` for
/// `Option`), plus:
/// - `foreign_key = "A,B"` and `references = "ID"` (field names)
/// - `polymorphic = "OwnerType", polymorphic_value = "users"`
/// - for many_to_many: `join_table`, `join_foreign_key`, `join_references`
///   (join table columns), with `foreign_key` / `references` naming the
///   owner and related columns they point at (default `id`)
///
/// ```ignore
/// #[derive(Debug, Clone, Default, Record)]
/// #[record(table = "users", hooks)]
/// pub struct User {
///     pub id: i64,
///     #[record(default)]
///     pub age: i64,
///     #[record(relationship(has_many, foreign_key = "UserID", references = "ID"))]
///     pub posts: Vec<Post>,
///     #[record(relationship(
///         many_to_many,
///         join_table = "user_languages",
///         join_foreign_key = "user_id",
///         join_references = "language_id"
///     ))]
///     pub languages: Vec<Language>,
/// }
/// ```
#[proc_macro_derive(Record, attributes(record))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let def = match parse_record(&input) {
        Ok(def) => def,
        Err(e) => return e.to_compile_error().into(),
    };
    if let Err(e) = validate::validate_record(&def) {
        return e.to_compile_error().into();
    }

    generate_record_impl(&def).into()
}

fn generate_record_impl(def: &RecordDef) -> TokenStream2 {
    let ident = &def.ident;
    let type_name = ident.to_string();
    let table = &def.table;
    let (impl_generics, ty_generics, where_clause) = def.generics.split_for_impl();

    let descriptors = def.described().map(descriptor);

    let getters = def.scalars().map(|f| {
        let name = &f.name;
        let member = &f.ident;
        let value = if f.timestamp {
            quote! { ::sqlbook_core::Value::timestamp(::core::clone::Clone::clone(&self.#member)) }
        } else {
            quote! { ::sqlbook_core::Value::from(::core::clone::Clone::clone(&self.#member)) }
        };
        quote! { #name => ::core::option::Option::Some(#value), }
    });

    let setters = def.scalars().map(|f| {
        let name = &f.name;
        let member = &f.ident;
        let ty = &f.ty;
        quote! {
            #name => {
                self.#member = <#ty as ::sqlbook_core::FromValue>::from_value(&value)?;
            }
        }
    });

    let associations = if def.relations().next().is_some() {
        association_slots(def)
    } else {
        quote! {}
    };

    let hooks = if def.hooks {
        lifecycle_forwarding()
    } else {
        quote! {}
    };

    quote! {
        impl #impl_generics ::sqlbook_core::Record for #ident #ty_generics #where_clause {
            fn describe() -> ::sqlbook_core::RecordMetadata {
                ::sqlbook_core::RecordMetadata::new(#table, ::std::vec![#(#descriptors),*])
            }

            fn field(&self, name: &str) -> ::core::option::Option<::sqlbook_core::Value> {
                match name {
                    #(#getters)*
                    _ => ::core::option::Option::None,
                }
            }

            fn set_field(
                &mut self,
                name: &str,
                value: ::sqlbook_core::Value,
            ) -> ::sqlbook_core::Result<()> {
                match name {
                    #(#setters)*
                    _ => return ::core::result::Result::Err(::sqlbook_core::unknown_field(#type_name, name)),
                }
                ::core::result::Result::Ok(())
            }

            #associations

            #hooks
        }
    }
}

fn association_slots(def: &RecordDef) -> TokenStream2 {
    let slots = def.relations().map(|(f, _)| {
        let name = &f.name;
        let member = &f.ident;
        quote! { #name => ::core::option::Option::Some(&self.#member as &dyn ::sqlbook_core::Association), }
    });
    let slots_mut = def.relations().map(|(f, _)| {
        let name = &f.name;
        let member = &f.ident;
        quote! { #name => ::core::option::Option::Some(&mut self.#member as &mut dyn ::sqlbook_core::Association), }
    });
    quote! {
        fn association(&self, name: &str) -> ::core::option::Option<&dyn ::sqlbook_core::Association> {
            match name {
                #(#slots)*
                _ => ::core::option::Option::None,
            }
        }

        fn association_mut(
            &mut self,
            name: &str,
        ) -> ::core::option::Option<&mut dyn ::sqlbook_core::Association> {
            match name {
                #(#slots_mut)*
                _ => ::core::option::Option::None,
            }
        }
    }
}

/// `FieldDescriptor` expression for one described field.
fn descriptor(field: &FieldDef) -> TokenStream2 {
    let name = &field.name;
    if let Some(rel) = &field.relationship {
        let relationship = relationship(rel);
        return quote! { ::sqlbook_core::FieldDescriptor::relation(#name, #relationship) };
    }

    let mut tokens = quote! { ::sqlbook_core::FieldDescriptor::new(#name) };
    if let Some(column) = &field.column {
        tokens = quote! { #tokens.column(#column) };
    }
    if field.primary_key {
        tokens = quote! { #tokens.primary_key() };
    }
    if field.default {
        tokens = quote! { #tokens.default_value() };
    }
    if field.ignore {
        tokens = quote! { #tokens.ignored() };
    }
    tokens
}

fn relationship(rel: &RelationDef) -> TokenStream2 {
    let related = &rel.related;
    if rel.kind == RelationKind::ManyToMany {
        let table = rel.join_table.as_deref().unwrap_or_default();
        let sources = join_pairs(&rel.join_foreign_key, &rel.foreign_key);
        let destinations = join_pairs(&rel.join_references, &rel.references);
        let sources = sources.iter().map(|(j, c)| quote! { .source(#j, #c) });
        let destinations = destinations.iter().map(|(j, c)| quote! { .destination(#j, #c) });
        return quote! {
            ::sqlbook_core::Relationship::many_to_many::<#related>(
                ::sqlbook_core::JoinTable::new(#table) #(#sources)* #(#destinations)*
            )
        };
    }

    let constructor = syn::Ident::new(rel.kind.constructor(), proc_macro2::Span::call_site());
    let foreign = &rel.foreign_key;
    let references: Vec<String> = if rel.references.is_empty() {
        vec!["ID".to_string(); foreign.len()]
    } else {
        rel.references.clone()
    };
    let mut tokens = quote! {
        ::sqlbook_core::Relationship::#constructor::<#related>(&[#(#foreign),*], &[#(#references),*])
    };
    if let Some((type_field, value)) = &rel.polymorphic {
        tokens = quote! { #tokens.polymorphic(#type_field, #value) };
    }
    tokens
}

/// Pair each join column with the column it references, `id` by default.
fn join_pairs(join_columns: &[String], columns: &[String]) -> Vec<(String, String)> {
    join_columns
        .iter()
        .enumerate()
        .map(|(i, join)| {
            let column = columns.get(i).map_or("id", String::as_str);
            (join.clone(), column.to_string())
        })
        .collect()
}

fn lifecycle_forwarding() -> TokenStream2 {
    let methods = [
        "before_save",
        "before_create",
        "after_create",
        "after_save",
        "before_update",
        "after_update",
        "before_delete",
        "after_delete",
        "after_find",
    ]
    .into_iter()
    .map(|m| {
        let method = syn::Ident::new(m, proc_macro2::Span::call_site());
        quote! {
            fn #method(&mut self) -> ::sqlbook_core::Result<()> {
                <Self as ::sqlbook_core::RecordHooks>::#method(self)
            }
        }
    });
    quote! { #(#methods)* }
}
