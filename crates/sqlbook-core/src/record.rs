//! Record access traits.
//!
//! The engine never inspects record types directly. Each record type
//! implements [`Record`], which exposes its fields by name as [`Value`]s
//! and its relationship fields as [`Association`] slots. Everything the
//! pipeline needs to know about the type's shape lives in the
//! [`RecordMetadata`] returned by [`Record::describe`] and cached per type.

use crate::error::{Error, Result, UsageErrorKind};
use crate::metadata::{RecordMetadata, metadata_cache};
use crate::row::Row;
use crate::value::Value;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// A persistable record type.
///
/// Implementors must also be `Clone + Default`; those bounds are picked up
/// through the blanket [`RecordExt`] impl so that `dyn Record` stays object
/// safe.
///
/// Most records derive it:
///
/// ```ignore
/// #[derive(Debug, Clone, Default, Record)]
/// #[record(table = "users")]
/// struct User {
///     id: i64,
///     name: String,
///     #[record(relationship(has_many, foreign_key = "UserID", references = "ID"))]
///     posts: Vec<Post>,
/// }
/// ```
///
/// A hand-written impl describes its fields with [`FieldDescriptor`] and
/// answers `field` / `set_field` / `association_mut` by name.
///
/// [`FieldDescriptor`]: crate::FieldDescriptor
pub trait Record: RecordExt + fmt::Debug + Send + Sync + 'static {
    /// Build this type's metadata. Called once per type; see [`RecordType::metadata`].
    fn describe() -> RecordMetadata
    where
        Self: Sized;

    /// Read a field by its in-memory name. `None` if the type has no such field.
    fn field(&self, name: &str) -> Option<Value>;

    /// Write a field by its in-memory name.
    fn set_field(&mut self, name: &str, value: Value) -> Result<()>;

    /// Borrow a relationship field.
    fn association(&self, _name: &str) -> Option<&dyn Association> {
        None
    }

    /// Mutably borrow a relationship field.
    fn association_mut(&mut self, _name: &str) -> Option<&mut dyn Association> {
        None
    }

    fn before_save(&mut self) -> Result<()> {
        Ok(())
    }

    fn before_create(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_create(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_save(&mut self) -> Result<()> {
        Ok(())
    }

    fn before_update(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_update(&mut self) -> Result<()> {
        Ok(())
    }

    fn before_delete(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_delete(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_find(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Lifecycle callbacks for records declared with `#[derive(Record)]`.
///
/// A derived record marked `#[record(hooks)]` forwards every lifecycle
/// method of [`Record`] here; override only the ones you need.
pub trait RecordHooks {
    fn before_save(&mut self) -> Result<()> {
        Ok(())
    }

    fn before_create(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_create(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_save(&mut self) -> Result<()> {
        Ok(())
    }

    fn before_update(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_update(&mut self) -> Result<()> {
        Ok(())
    }

    fn before_delete(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_delete(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_find(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Error for a field name the record does not have.
pub fn unknown_field(record: &str, name: &str) -> Error {
    Error::usage(
        UsageErrorKind::UnknownField,
        format!("{record} has no field {name}"),
    )
}

/// Type-erased helpers every [`Record`] gets for free.
pub trait RecordExt {
    /// Handle to this record's type.
    fn record_type(&self) -> RecordType;

    /// Clone into a new boxed record.
    fn clone_record(&self) -> Box<dyn Record>;

    /// Convert into `Any` for downcasting back to the concrete type.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T> RecordExt for T
where
    T: Record + Clone + Default,
{
    fn record_type(&self) -> RecordType {
        RecordType::of::<T>()
    }

    fn clone_record(&self) -> Box<dyn Record> {
        Box::new(self.clone())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Downcast a boxed record back to its concrete type.
pub fn downcast_record<T: Record>(record: Box<dyn Record>) -> Result<T> {
    let actual = record.record_type().name();
    record
        .into_any()
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| {
            Error::usage(
                UsageErrorKind::TypeMismatch,
                format!(
                    "association expects {}, got {}",
                    short_type_name(std::any::type_name::<T>()),
                    actual
                ),
            )
        })
}

/// Copyable handle to a record type: identity, name, metadata builder and
/// blank constructor.
#[derive(Clone, Copy)]
pub struct RecordType {
    type_id: fn() -> TypeId,
    type_name: fn() -> &'static str,
    describe: fn() -> RecordMetadata,
    blank: fn() -> Box<dyn Record>,
}

fn blank_of<T: Record + Default>() -> Box<dyn Record> {
    Box::new(T::default())
}

fn short_type_name(full: &'static str) -> &'static str {
    full.rsplit("::").next().unwrap_or(full)
}

impl RecordType {
    pub fn of<T: Record + Default>() -> Self {
        Self {
            type_id: TypeId::of::<T>,
            type_name: std::any::type_name::<T>,
            describe: T::describe,
            blank: blank_of::<T>,
        }
    }

    pub fn id(&self) -> TypeId {
        (self.type_id)()
    }

    /// Unqualified type name, for messages.
    pub fn name(&self) -> &'static str {
        short_type_name((self.type_name)())
    }

    /// A new record of this type holding default values.
    pub fn blank(&self) -> Box<dyn Record> {
        (self.blank)()
    }

    /// Cached metadata for this type, built on first request.
    pub fn metadata(&self) -> Arc<RecordMetadata> {
        metadata_cache().get(*self)
    }

    pub(crate) fn build_metadata(&self) -> RecordMetadata {
        (self.describe)()
    }
}

impl PartialEq for RecordType {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for RecordType {}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RecordType").field(&self.name()).finish()
    }
}

/// A relationship field on a record: `Option<T>` for to-one, `Vec<T>` for to-many.
pub trait Association: Send + Sync {
    /// Whether this slot holds a sequence.
    fn is_many(&self) -> bool;

    /// Records currently held.
    fn records(&self) -> Vec<&dyn Record>;

    /// Records currently held, mutably.
    fn records_mut(&mut self) -> Vec<&mut dyn Record>;

    /// Replace the slot's contents. To-one slots keep the first record, or
    /// become empty when given none.
    fn assign(&mut self, records: Vec<Box<dyn Record>>) -> Result<()>;
}

impl<T: Record> Association for Option<T> {
    fn is_many(&self) -> bool {
        false
    }

    fn records(&self) -> Vec<&dyn Record> {
        self.iter().map(|r| r as &dyn Record).collect()
    }

    fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        self.iter_mut().map(|r| r as &mut dyn Record).collect()
    }

    fn assign(&mut self, records: Vec<Box<dyn Record>>) -> Result<()> {
        *self = match records.into_iter().next() {
            Some(record) => Some(downcast_record::<T>(record)?),
            None => None,
        };
        Ok(())
    }
}

impl<T: Record> Association for Vec<T> {
    fn is_many(&self) -> bool {
        true
    }

    fn records(&self) -> Vec<&dyn Record> {
        self.iter().map(|r| r as &dyn Record).collect()
    }

    fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        self.iter_mut().map(|r| r as &mut dyn Record).collect()
    }

    fn assign(&mut self, records: Vec<Box<dyn Record>>) -> Result<()> {
        let mut typed = Vec::with_capacity(records.len());
        for record in records {
            typed.push(downcast_record::<T>(record)?);
        }
        *self = typed;
        Ok(())
    }
}

/// A growable sequence of records used as a query destination.
pub trait RecordSet: Send {
    /// Element type.
    fn record_type(&self) -> RecordType;

    /// Remove every element.
    fn reset(&mut self);

    /// Append a default-valued element and return it for scanning.
    fn push_blank(&mut self) -> &mut dyn Record;

    fn count(&self) -> usize;

    fn members(&self) -> Vec<&dyn Record>;

    fn members_mut(&mut self) -> Vec<&mut dyn Record>;
}

impl<T: Record + Default> RecordSet for Vec<T> {
    fn record_type(&self) -> RecordType {
        RecordType::of::<T>()
    }

    fn reset(&mut self) {
        self.clear();
    }

    fn push_blank(&mut self) -> &mut dyn Record {
        let idx = self.len();
        self.push(T::default());
        &mut self[idx]
    }

    fn count(&self) -> usize {
        self.len()
    }

    fn members(&self) -> Vec<&dyn Record> {
        self.iter().map(|r| r as &dyn Record).collect()
    }

    fn members_mut(&mut self) -> Vec<&mut dyn Record> {
        self.iter_mut().map(|r| r as &mut dyn Record).collect()
    }
}

/// A type-erased record sequence, used where the element type is only
/// known at runtime (preload results).
#[derive(Debug)]
pub struct DynRecords {
    record_type: RecordType,
    items: Vec<Box<dyn Record>>,
}

impl DynRecords {
    pub fn new(record_type: RecordType) -> Self {
        Self {
            record_type,
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, record: Box<dyn Record>) {
        self.items.push(record);
    }

    pub fn into_inner(self) -> Vec<Box<dyn Record>> {
        self.items
    }
}

impl RecordSet for DynRecords {
    fn record_type(&self) -> RecordType {
        self.record_type
    }

    fn reset(&mut self) {
        self.items.clear();
    }

    fn push_blank(&mut self) -> &mut dyn Record {
        let idx = self.items.len();
        self.items.push(self.record_type.blank());
        self.items[idx].as_mut()
    }

    fn count(&self) -> usize {
        self.items.len()
    }

    fn members(&self) -> Vec<&dyn Record> {
        self.items.iter().map(|r| r.as_ref()).collect()
    }

    fn members_mut(&mut self) -> Vec<&mut dyn Record> {
        self.items.iter_mut().map(|r| r.as_mut()).collect()
    }
}

/// Populate `record` from `row`.
///
/// Columns are matched to normal, non-ignored fields by column name;
/// columns with no matching field are skipped.
pub fn scan_row(record: &mut dyn Record, meta: &RecordMetadata, row: &Row) -> Result<()> {
    for (column, value) in row.iter() {
        let Some(field) = meta.field_by_db_name(column) else {
            continue;
        };
        if !field.is_normal || field.is_ignored {
            continue;
        }
        record
            .set_field(&field.name, value.clone())
            .map_err(|err| match err {
                Error::Type(mut te) => {
                    te.column = Some(column.to_string());
                    Error::Type(te)
                }
                other => other,
            })?;
    }
    Ok(())
}

/// Read the named fields from `record`, failing on a field the record
/// does not expose.
pub fn field_values(record: &dyn Record, names: &[String]) -> Result<Vec<Value>> {
    names
        .iter()
        .map(|name| {
            record.field(name).ok_or_else(|| {
                Error::usage(
                    UsageErrorKind::UnknownField,
                    format!("{} has no field {}", record.record_type().name(), name),
                )
            })
        })
        .collect()
}
