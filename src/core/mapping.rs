//! Table descriptors
//!
//! A [`TableMapping`] is the resolved shape of a record type: its columns,
//! primary key, and the SQL fragments that depend only on that shape. The
//! [`SchemaRegistry`] computes each mapping once per (type, flags) pair.

use crate::core::error::{OrmError, Result};
use crate::core::schema::{CreateFlags, FieldDecl, IndexSpec, Record, RecordDecl};
use crate::core::value::{ColumnType, FieldValue};
use parking_lot::Mutex;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Default declared length of text columns
pub const DEFAULT_MAX_STRING_LENGTH: usize = 140;

/// Field name that becomes the primary key under [`CreateFlags::IMPLICIT_PK`]
pub const IMPLICIT_PK_NAME: &str = "Id";

/// Field name suffix that gets an index under [`CreateFlags::IMPLICIT_INDEX`]
pub const IMPLICIT_INDEX_SUFFIX: &str = "Id";

/// A mapped column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    field_name: String,
    column_type: ColumnType,
    collation: Option<String>,
    primary_key: bool,
    auto_inc: bool,
    auto_guid: bool,
    nullable: bool,
    max_length: usize,
    default_value: Option<FieldValue>,
    indices: Vec<IndexSpec>,
}

impl Column {
    fn from_decl(decl: FieldDecl, flags: CreateFlags) -> Self {
        let name = decl
            .column_name
            .clone()
            .unwrap_or_else(|| decl.field_name.clone());

        let primary_key = decl.primary_key
            || (flags.contains(CreateFlags::IMPLICIT_PK)
                && decl.field_name.eq_ignore_ascii_case(IMPLICIT_PK_NAME));
        let is_auto =
            decl.auto_increment || (primary_key && flags.contains(CreateFlags::AUTO_INC_PK));
        let is_guid = decl.column_type == ColumnType::Guid;

        let mut indices = decl.indices;
        if indices.is_empty()
            && !primary_key
            && flags.contains(CreateFlags::IMPLICIT_INDEX)
            && ends_with_ignore_case(&name, IMPLICIT_INDEX_SUFFIX)
        {
            indices.push(IndexSpec {
                name: None,
                order: 0,
                unique: false,
            });
        }

        Self {
            name,
            field_name: decl.field_name,
            column_type: decl.column_type,
            collation: decl.collation,
            primary_key,
            auto_inc: is_auto && !is_guid,
            auto_guid: is_auto && is_guid,
            nullable: !primary_key && !decl.not_null,
            max_length: decl.max_length.unwrap_or(DEFAULT_MAX_STRING_LENGTH),
            default_value: decl.default_value,
            indices,
        }
    }

    /// Column name in the table
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record field backing this column
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn column_type(&self) -> &ColumnType {
        &self.column_type
    }

    pub fn collation(&self) -> Option<&str> {
        self.collation.as_deref()
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// Integer key assigned by the engine on insert
    pub fn is_auto_inc(&self) -> bool {
        self.auto_inc
    }

    /// GUID key generated client-side when left empty
    pub fn is_auto_guid(&self) -> bool {
        self.auto_guid
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn default_value(&self) -> Option<&FieldValue> {
        self.default_value.as_ref()
    }

    pub fn indices(&self) -> &[IndexSpec] {
        &self.indices
    }

    /// Read this column's value from a record
    pub fn value_of<T: Record>(&self, record: &T) -> Result<FieldValue> {
        record
            .field(&self.field_name)
            .ok_or_else(|| OrmError::column_not_found(&self.field_name))
    }

    /// Assign this column's value on a record
    pub fn set_value<T: Record>(&self, record: &mut T, value: FieldValue) -> Result<()> {
        record.set_field(&self.field_name, value)
    }
}

fn ends_with_ignore_case(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name
            .get(name.len() - suffix.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

/// Resolved table shape of a record type
#[derive(Debug, Clone)]
pub struct TableMapping {
    type_id: TypeId,
    type_name: &'static str,
    table_name: String,
    flags: CreateFlags,
    columns: Vec<Column>,
    pk: Option<usize>,
    get_by_primary_key_sql: String,
}

impl TableMapping {
    /// Build the mapping of a record type
    pub fn of<T: Record>(flags: CreateFlags) -> Result<Self> {
        Self::from_decl(TypeId::of::<T>(), type_name::<T>(), T::declaration(), flags)
    }

    /// Build a mapping from a declaration.
    ///
    /// Fails with a schema error when no field is mappable or when more than
    /// one column ends up marked as primary key.
    pub fn from_decl(
        type_id: TypeId,
        type_name: &'static str,
        decl: RecordDecl,
        flags: CreateFlags,
    ) -> Result<Self> {
        let columns: Vec<Column> = decl
            .fields
            .into_iter()
            .filter(|f| f.writable && !f.ignore)
            .map(|f| Column::from_decl(f, flags))
            .collect();

        if columns.is_empty() {
            return Err(OrmError::schema(format!(
                "{} has no mappable fields",
                decl.table_name
            )));
        }

        let pks: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        if pks.len() > 1 {
            return Err(OrmError::schema(format!(
                "{} declares {} primary keys; composite keys are not supported",
                decl.table_name,
                pks.len()
            )));
        }
        let pk = pks.first().copied();

        let get_by_primary_key_sql = match pk {
            Some(i) => format!(
                "SELECT * FROM \"{}\" WHERE \"{}\" = ?",
                decl.table_name, columns[i].name
            ),
            None => format!("SELECT * FROM \"{}\" LIMIT 1", decl.table_name),
        };

        Ok(Self {
            type_id,
            type_name,
            table_name: decl.table_name,
            flags,
            columns,
            pk,
            get_by_primary_key_sql,
        })
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Rust type name of the record
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Flags the mapping was built with
    pub fn flags(&self) -> CreateFlags {
        self.flags
    }

    /// Columns in declaration order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn pk(&self) -> Option<&Column> {
        self.pk.map(|i| &self.columns[i])
    }

    /// Whether the primary key is assigned by the engine
    pub fn has_auto_inc_pk(&self) -> bool {
        self.pk().is_some_and(Column::is_auto_inc)
    }

    /// Single-row lookup by primary key; `LIMIT 1` when the table has none
    pub fn get_by_primary_key_sql(&self) -> &str {
        &self.get_by_primary_key_sql
    }

    /// Columns written by a plain insert (auto-increment columns excluded)
    pub fn insert_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.auto_inc)
    }

    /// Columns written by an insert-or-replace
    pub fn insert_or_replace_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    /// Resolve a result-set column name; exact match first, then
    /// case-insensitive
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.column_position(name).map(|i| &self.columns[i])
    }

    /// Index into [`TableMapping::columns`] of a result-set column name
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
            })
    }

    /// Resolve a record field name
    pub fn find_column_with_field_name(&self, field: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.field_name == field)
    }

    /// Write an engine-assigned row id into the auto-increment key
    pub fn set_auto_inc_pk<T: Record>(&self, record: &mut T, row_id: i64) -> Result<()> {
        let Some(pk) = self.pk().filter(|c| c.auto_inc) else {
            return Ok(());
        };
        let value = FieldValue::I64(row_id).convert_to(pk.column_type())?;
        pk.set_value(record, value)
    }
}

/// Cache of table mappings keyed by record type and creation flags
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    mappings: Mutex<HashMap<(TypeId, CreateFlags), Arc<TableMapping>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapping of `T` under `flags`, computed on first use
    pub fn describe<T: Record>(&self, flags: CreateFlags) -> Result<Arc<TableMapping>> {
        let key = (TypeId::of::<T>(), flags);
        if let Some(found) = self.mappings.lock().get(&key) {
            return Ok(Arc::clone(found));
        }

        // Built outside the lock; a racing builder produces an equal mapping.
        let mapping = Arc::new(TableMapping::of::<T>(flags)?);
        let mut mappings = self.mappings.lock();
        let entry = mappings.entry(key).or_insert(mapping);
        Ok(Arc::clone(entry))
    }

    /// Number of cached mappings
    pub fn len(&self) -> usize {
        self.mappings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[derive(Debug, Default, Clone)]
    struct Order {
        id: i64,
        customer_id: i32,
        total: f64,
        cached_label: String,
    }

    crate::impl_record!(Order, "Order", {
        id: i64 => "Id",
        customer_id: i32 => "CustomerId",
        total: f64 => "Total" [column("Amount")],
        cached_label: String => "CachedLabel" [ignore],
    });

    #[derive(Debug, Default, Clone)]
    struct Token {
        id: Uuid,
        label: String,
    }

    crate::impl_record!(Token, "Token", {
        id: Uuid => "Id" [primary_key, auto_increment],
        label: String => "Label" [not_null],
    });

    #[derive(Debug, Default, Clone)]
    struct TwoKeys {
        a: i32,
        b: i32,
    }

    crate::impl_record!(TwoKeys, "TwoKeys", {
        a: i32 => "A" [primary_key],
        b: i32 => "B" [primary_key],
    });

    #[derive(Debug, Default, Clone)]
    struct Empty {
        note: String,
    }

    crate::impl_record!(Empty, "Empty", {
        note: String => "Note" [ignore],
    });

    #[test]
    fn test_explicit_only_mapping() {
        let map = TableMapping::of::<Order>(CreateFlags::NONE).unwrap();
        assert_eq!(map.table_name(), "Order");
        assert_eq!(map.columns().len(), 3);
        assert!(map.pk().is_none());
        assert_eq!(map.get_by_primary_key_sql(), "SELECT * FROM \"Order\" LIMIT 1");
        assert_eq!(map.columns()[2].name(), "Amount");
        assert_eq!(map.columns()[2].field_name(), "Total");
        assert!(map.columns().iter().all(Column::is_nullable));
    }

    #[test]
    fn test_implicit_conventions() {
        let map = TableMapping::of::<Order>(CreateFlags::ALL_IMPLICIT | CreateFlags::AUTO_INC_PK)
            .unwrap();
        let pk = map.pk().unwrap();
        assert_eq!(pk.name(), "Id");
        assert!(pk.is_auto_inc());
        assert!(!pk.is_nullable());
        assert!(map.has_auto_inc_pk());
        assert_eq!(
            map.get_by_primary_key_sql(),
            "SELECT * FROM \"Order\" WHERE \"Id\" = ?"
        );

        let customer = map.find_column("CustomerId").unwrap();
        assert_eq!(customer.indices().len(), 1);
        assert!(!customer.indices()[0].unique);

        let inserted: Vec<&str> = map.insert_columns().map(Column::name).collect();
        assert_eq!(inserted, vec!["CustomerId", "Amount"]);
        assert_eq!(map.insert_or_replace_columns().count(), 3);
    }

    #[test]
    fn test_guid_key_is_auto_guid() {
        let map = TableMapping::of::<Token>(CreateFlags::NONE).unwrap();
        let pk = map.pk().unwrap();
        assert!(pk.is_auto_guid());
        assert!(!pk.is_auto_inc());
        assert!(!map.has_auto_inc_pk());
        assert_eq!(map.insert_columns().count(), 2);
        assert!(!map.find_column("Label").unwrap().is_nullable());
    }

    #[test]
    fn test_schema_errors() {
        let err = TableMapping::of::<TwoKeys>(CreateFlags::NONE).unwrap_err();
        assert!(matches!(err, OrmError::Schema(_)));

        let err = TableMapping::of::<Empty>(CreateFlags::NONE).unwrap_err();
        assert!(matches!(err, OrmError::Schema(_)));
    }

    #[test]
    fn test_find_column_case_insensitive() {
        let map = TableMapping::of::<Order>(CreateFlags::NONE).unwrap();
        assert_eq!(map.find_column("amount").unwrap().name(), "Amount");
        assert!(map.find_column("CachedLabel").is_none());
        assert_eq!(
            map.find_column_with_field_name("Total").unwrap().name(),
            "Amount"
        );
    }

    #[test]
    fn test_set_auto_inc_pk_converts() {
        let map = TableMapping::of::<Order>(CreateFlags::IMPLICIT_PK | CreateFlags::AUTO_INC_PK)
            .unwrap();
        let mut order = Order::default();
        map.set_auto_inc_pk(&mut order, 41).unwrap();
        assert_eq!(order.id, 41);
    }

    #[test]
    fn test_registry_caches_per_flags() {
        let registry = SchemaRegistry::new();
        let a = registry.describe::<Order>(CreateFlags::NONE).unwrap();
        let b = registry.describe::<Order>(CreateFlags::NONE).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.describe::<Order>(CreateFlags::IMPLICIT_PK).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
    }
}
