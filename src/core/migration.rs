//! Schema DDL and additive migration
//!
//! Turns a [`TableMapping`] into `CREATE TABLE`, `ALTER TABLE ADD COLUMN` and
//! `CREATE INDEX` statements. Migration is additive only: columns missing
//! from the live table are added, existing columns are never altered or
//! dropped.
//!
//! # Example
//!
//! ```rust
//! use rust_sqlite_orm::core::migration::create_table_sql;
//! use rust_sqlite_orm::core::{CreateFlags, StoragePolicy, TableMapping};
//! use rust_sqlite_orm::impl_record;
//!
//! #[derive(Debug, Default, Clone)]
//! struct Note {
//!     id: i64,
//!     body: String,
//! }
//!
//! impl_record!(Note, "Note", {
//!     id: i64 => "Id" [primary_key, auto_increment],
//!     body: String => "Body",
//! });
//!
//! let mapping = TableMapping::of::<Note>(CreateFlags::NONE).unwrap();
//! let sql = create_table_sql(&mapping, StoragePolicy::default(), None).unwrap();
//! assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"Note\""));
//! ```

use super::error::{OrmError, Result};
use super::mapping::{Column, TableMapping};
use super::serializer::BlobSerializer;
use super::value::{ColumnType, FieldValue, StoragePolicy};
use crate::backends::binder::ValueBinder;
use rusqlite::types::Value;

/// Outcome of creating a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateTableResult {
    /// The table did not exist and was created
    Created,
    /// The table existed; missing columns were added
    Migrated { added_columns: usize },
}

/// One row of `PRAGMA table_info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    /// Position in the primary key, 0 when not part of it
    pub primary_key: i64,
}

/// SQL type of a column under the connection's storage policy.
///
/// An auto-increment primary key is always `integer` so that it aliases the
/// row id.
pub fn sql_type(
    column: &Column,
    policy: StoragePolicy,
    serializer: Option<&dyn BlobSerializer>,
) -> Result<String> {
    if column.is_auto_inc() && column.is_primary_key() {
        return Ok("integer".to_string());
    }
    sql_type_of(column.column_type(), column.max_length(), policy, serializer)
}

fn sql_type_of(
    column_type: &ColumnType,
    max_length: usize,
    policy: StoragePolicy,
    serializer: Option<&dyn BlobSerializer>,
) -> Result<String> {
    let sql = match column_type {
        ColumnType::Bool
        | ColumnType::I8
        | ColumnType::I16
        | ColumnType::I32
        | ColumnType::U8
        | ColumnType::U16
        | ColumnType::Enum(_) => "integer".to_string(),
        ColumnType::I64 | ColumnType::U32 | ColumnType::Duration => "bigint".to_string(),
        ColumnType::F32 | ColumnType::F64 | ColumnType::Decimal => "float".to_string(),
        ColumnType::Text => format!("varchar({max_length})"),
        ColumnType::Bytes => "blob".to_string(),
        ColumnType::DateTime if policy.store_date_time_as_ticks => "bigint".to_string(),
        ColumnType::DateTime => "datetime".to_string(),
        ColumnType::Guid if policy.store_guid_as_blob => "blob".to_string(),
        ColumnType::Guid => "varchar(36)".to_string(),
        ColumnType::Serialized {
            type_name,
            primitive,
        } => match primitive.as_ref() {
            ColumnType::Serialized { .. } | ColumnType::Custom(_) => {
                return Err(OrmError::schema(format!(
                    "{type_name} must serialize to a primitive type"
                )))
            }
            inner => sql_type_of(inner, max_length, policy, serializer)?,
        },
        ColumnType::Custom(type_name) => match serializer {
            Some(s) if s.can_deserialize(type_name) => "blob".to_string(),
            _ => {
                return Err(OrmError::schema(format!(
                    "Don't know about {type_name}: no SQL type and no blob serializer accepts it"
                )))
            }
        },
    };
    Ok(sql)
}

/// Column declaration: name, type, then primary key, auto-increment,
/// not-null and collation clauses in that order
pub fn sql_decl(
    column: &Column,
    policy: StoragePolicy,
    serializer: Option<&dyn BlobSerializer>,
) -> Result<String> {
    let mut decl = format!(
        "\"{}\" {}",
        column.name(),
        sql_type(column, policy, serializer)?
    );
    if column.is_primary_key() {
        decl.push_str(" PRIMARY KEY");
        if column.is_auto_inc() {
            decl.push_str(" AUTOINCREMENT");
        }
    }
    if !column.is_nullable() {
        decl.push_str(" NOT NULL");
    }
    if let Some(value) = column.default_value() {
        decl.push_str(" DEFAULT (");
        decl.push_str(&default_literal(column, value, policy)?);
        decl.push(')');
    }
    if let Some(collation) = column.collation() {
        decl.push_str(" COLLATE ");
        decl.push_str(collation);
    }
    Ok(decl)
}

/// Render a default value as an SQL literal, stored the same way a bound
/// parameter would be
fn default_literal(column: &Column, value: &FieldValue, policy: StoragePolicy) -> Result<String> {
    let stored = ValueBinder::new(policy, None).to_sql_value(value)?;
    Ok(match stored {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) if f.is_finite() => format!("{f:?}"),
        Value::Real(f) => {
            return Err(OrmError::schema(format!(
                "Default for column {} is not a finite number: {f}",
                column.name()
            )))
        }
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Blob(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
            format!("X'{hex}'")
        }
    })
}

/// `CREATE TABLE IF NOT EXISTS` for a mapping
pub fn create_table_sql(
    mapping: &TableMapping,
    policy: StoragePolicy,
    serializer: Option<&dyn BlobSerializer>,
) -> Result<String> {
    let decls = mapping
        .columns()
        .iter()
        .map(|c| sql_decl(c, policy, serializer))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS \"{}\"(\n{}\n)",
        mapping.table_name(),
        decls.join(",\n")
    ))
}

/// `ALTER TABLE ... ADD COLUMN` for one column
pub fn add_column_sql(
    table_name: &str,
    column: &Column,
    policy: StoragePolicy,
    serializer: Option<&dyn BlobSerializer>,
) -> Result<String> {
    Ok(format!(
        "ALTER TABLE \"{}\" ADD COLUMN {}",
        table_name,
        sql_decl(column, policy, serializer)?
    ))
}

/// `DROP TABLE IF EXISTS`
pub fn drop_table_sql(table_name: &str) -> String {
    format!("DROP TABLE IF EXISTS \"{table_name}\"")
}

/// Mapped columns absent from the live table (case-insensitive match)
pub fn missing_columns<'m>(mapping: &'m TableMapping, existing: &[ColumnInfo]) -> Vec<&'m Column> {
    mapping
        .columns()
        .iter()
        .filter(|c| {
            !existing
                .iter()
                .any(|info| info.name.eq_ignore_ascii_case(c.name()))
        })
        .collect()
}

/// A column inside an index group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedColumn {
    pub column_name: String,
    pub order: i32,
}

/// All columns sharing one index name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexGroup {
    pub index_name: String,
    pub table_name: String,
    pub unique: bool,
    pub columns: Vec<IndexedColumn>,
}

impl IndexGroup {
    /// `CREATE [UNIQUE] INDEX IF NOT EXISTS` with columns in declared order
    pub fn create_sql(&self) -> String {
        let mut columns = self.columns.clone();
        columns.sort_by_key(|c| c.order);
        let names: Vec<&str> = columns.iter().map(|c| c.column_name.as_str()).collect();
        create_index_sql(&self.index_name, &self.table_name, &names, self.unique)
    }
}

/// Build the index groups of a mapping.
///
/// Unnamed indices are named `<table>_<column>`. Fails with a schema error
/// when two members of one group disagree on uniqueness; nothing has been
/// executed at that point.
pub fn index_groups(mapping: &TableMapping) -> Result<Vec<IndexGroup>> {
    let mut groups: Vec<IndexGroup> = Vec::new();

    for column in mapping.columns() {
        for index in column.indices() {
            let index_name = index
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_{}", mapping.table_name(), column.name()));

            let position = groups.iter().position(|g| g.index_name == index_name);
            let group = match position {
                Some(i) => &mut groups[i],
                None => {
                    groups.push(IndexGroup {
                        index_name: index_name.clone(),
                        table_name: mapping.table_name().to_string(),
                        unique: index.unique,
                        columns: Vec::new(),
                    });
                    let last = groups.len() - 1;
                    &mut groups[last]
                }
            };

            if group.unique != index.unique {
                return Err(OrmError::schema(format!(
                    "All the columns in index {index_name} must have the same value for their unique property"
                )));
            }
            group.columns.push(IndexedColumn {
                column_name: column.name().to_string(),
                order: index.order,
            });
        }
    }

    Ok(groups)
}

/// `CREATE [UNIQUE] INDEX IF NOT EXISTS "name" ON "table"("a", "b")`
pub fn create_index_sql(index_name: &str, table_name: &str, columns: &[&str], unique: bool) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
    format!(
        "CREATE {}INDEX IF NOT EXISTS \"{}\" ON \"{}\"({})",
        if unique { "UNIQUE " } else { "" },
        index_name,
        table_name,
        quoted.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::CreateFlags;
    use crate::core::serializer::JsonBlobSerializer;
    use chrono::NaiveDateTime;
    use uuid::Uuid;

    #[derive(Debug, Default, Clone)]
    struct Account {
        id: i64,
        email: String,
        region: String,
        created: NaiveDateTime,
        token: Uuid,
        active: bool,
    }

    crate::impl_record!(Account, "Account", {
        id: i64 => "Id" [primary_key, auto_increment],
        email: String => "Email" [max_length(200), collation("NOCASE"), unique_named("UX_Login", 2)],
        region: String => "Region" [not_null, unique_named("UX_Login", 1)],
        created: NaiveDateTime => "Created" [indexed],
        token: Uuid => "Token",
        active: bool => "Active",
    });

    #[derive(Debug, Default, Clone)]
    struct Clash {
        a: i32,
        b: i32,
    }

    crate::impl_record!(Clash, "Clash", {
        a: i32 => "A" [unique_named("IX_AB", 0)],
        b: i32 => "B" [indexed_named("IX_AB", 1)],
    });

    #[derive(Debug, Default, Clone)]
    struct Shape {
        outline: String,
    }

    impl crate::core::Record for Shape {
        fn declaration() -> crate::core::RecordDecl {
            crate::core::RecordDecl::new("Shape").field(crate::core::FieldDecl::new(
                "Outline",
                ColumnType::Custom("Polygon".into()),
            ))
        }

        fn field(&self, _name: &str) -> Option<crate::core::FieldValue> {
            Some(crate::core::FieldValue::Text(self.outline.clone()))
        }

        fn set_field(&mut self, _name: &str, _value: crate::core::FieldValue) -> Result<()> {
            Ok(())
        }
    }

    fn account_mapping() -> TableMapping {
        TableMapping::of::<Account>(CreateFlags::NONE).unwrap()
    }

    #[test]
    fn test_create_table_sql() {
        let sql = create_table_sql(&account_mapping(), StoragePolicy::default(), None).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"Account\"(\n\
             \"Id\" integer PRIMARY KEY AUTOINCREMENT NOT NULL,\n\
             \"Email\" varchar(200) COLLATE NOCASE,\n\
             \"Region\" varchar(140) NOT NULL,\n\
             \"Created\" bigint,\n\
             \"Token\" varchar(36),\n\
             \"Active\" integer\n)"
        );
    }

    #[test]
    fn test_policy_changes_types() {
        let map = account_mapping();
        let policy = StoragePolicy {
            store_date_time_as_ticks: false,
            store_guid_as_blob: true,
        };
        let created = map.find_column("Created").unwrap();
        let token = map.find_column("Token").unwrap();
        assert_eq!(sql_type(created, policy, None).unwrap(), "datetime");
        assert_eq!(sql_type(token, policy, None).unwrap(), "blob");
    }

    #[test]
    fn test_custom_type_needs_serializer() {
        let map = TableMapping::of::<Shape>(CreateFlags::NONE).unwrap();
        let err = create_table_sql(&map, StoragePolicy::default(), None).unwrap_err();
        assert!(matches!(err, OrmError::Schema(_)));

        let json = JsonBlobSerializer::new();
        let sql = create_table_sql(&map, StoragePolicy::default(), Some(&json)).unwrap();
        assert!(sql.contains("\"Outline\" blob"));
    }

    #[test]
    fn test_index_groups_ordered() {
        let groups = index_groups(&account_mapping()).unwrap();
        assert_eq!(groups.len(), 2);

        let login = &groups[0];
        assert_eq!(login.index_name, "UX_Login");
        assert!(login.unique);
        assert_eq!(
            login.create_sql(),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"UX_Login\" ON \"Account\"(\"Region\", \"Email\")"
        );

        assert_eq!(groups[1].index_name, "Account_Created");
        assert!(!groups[1].unique);
    }

    #[test]
    fn test_uniqueness_conflict() {
        let map = TableMapping::of::<Clash>(CreateFlags::NONE).unwrap();
        let err = index_groups(&map).unwrap_err();
        assert!(matches!(err, OrmError::Schema(_)));
    }

    #[test]
    fn test_missing_columns_case_insensitive() {
        let map = account_mapping();
        let existing: Vec<ColumnInfo> = ["id", "EMAIL", "Region"]
            .iter()
            .enumerate()
            .map(|(i, name)| ColumnInfo {
                cid: i as i64,
                name: name.to_string(),
                declared_type: String::new(),
                not_null: false,
                default_value: None,
                primary_key: 0,
            })
            .collect();

        let missing: Vec<&str> = missing_columns(&map, &existing)
            .into_iter()
            .map(Column::name)
            .collect();
        assert_eq!(missing, vec!["Created", "Token", "Active"]);

        let sql = add_column_sql("Account", map.find_column("Active").unwrap(), StoragePolicy::default(), None)
            .unwrap();
        assert_eq!(sql, "ALTER TABLE \"Account\" ADD COLUMN \"Active\" integer");
    }

    #[derive(Debug, Default, Clone)]
    struct Setting {
        label: String,
        level: i32,
        ratio: f64,
        raw: Vec<u8>,
    }

    crate::impl_record!(Setting, "Setting", {
        label: String => "Label" [not_null, default_value("it's")],
        level: i32 => "Level" [not_null, default_value(3)],
        ratio: f64 => "Ratio" [default_value(0.5)],
        raw: Vec<u8> => "Raw" [default_value(vec![0x0Au8, 0xFF])],
    });

    #[test]
    fn test_default_values_rendered() {
        let map = TableMapping::of::<Setting>(CreateFlags::NONE).unwrap();
        let policy = StoragePolicy::default();
        let decl = |name: &str| sql_decl(map.find_column(name).unwrap(), policy, None).unwrap();

        assert_eq!(decl("Label"), "\"Label\" varchar(140) NOT NULL DEFAULT ('it''s')");
        assert_eq!(decl("Level"), "\"Level\" integer NOT NULL DEFAULT (3)");
        assert_eq!(decl("Ratio"), "\"Ratio\" float DEFAULT (0.5)");
        assert_eq!(decl("Raw"), "\"Raw\" blob DEFAULT (X'0AFF')");

        let sql = add_column_sql("Setting", map.find_column("Level").unwrap(), policy, None).unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE \"Setting\" ADD COLUMN \"Level\" integer NOT NULL DEFAULT (3)"
        );
    }

    #[test]
    fn test_non_finite_default_rejected() {
        let decl = crate::core::RecordDecl::new("Gauge").field(
            crate::core::FieldDecl::new("Reading", ColumnType::F64).default_value(f64::NAN),
        );
        let map = TableMapping::from_decl(
            std::any::TypeId::of::<Shape>(),
            "Gauge",
            decl,
            CreateFlags::NONE,
        )
        .unwrap();
        let err = create_table_sql(&map, StoragePolicy::default(), None).unwrap_err();
        assert!(matches!(err, OrmError::Schema(_)));
    }
}
