//! Record declarations
//!
//! Records describe themselves through [`Record::declaration`]: a table name
//! and one [`FieldDecl`] per field carrying the markers a schema needs
//! (primary key, auto-increment, indices, collation, length, nullability).
//! The [`impl_record!`](crate::impl_record) macro writes the accessor
//! boilerplate for plain structs.

use crate::core::error::Result;
use crate::core::value::{ColumnType, FieldValue, FromValue};

bitflags::bitflags! {
    /// Conventions applied when a declaration is turned into a table mapping
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CreateFlags: u32 {
        /// Only explicit markers count
        const NONE = 0;
        /// A field named `Id` (any case) becomes the primary key
        const IMPLICIT_PK = 1;
        /// Fields whose name ends in `Id` get a non-unique index
        const IMPLICIT_INDEX = 2;
        /// Both implicit conventions
        const ALL_IMPLICIT = Self::IMPLICIT_PK.bits() | Self::IMPLICIT_INDEX.bits();
        /// Primary keys become auto-increment (auto-GUID for GUID keys)
        const AUTO_INC_PK = 4;
    }
}

/// Membership of a field in a named index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name; `None` means `<table>_<column>`
    pub name: Option<String>,
    /// Position of the column inside a composite index
    pub order: i32,
    /// Whether the index enforces uniqueness
    pub unique: bool,
}

/// Declared facts about one record field
#[derive(Debug, Clone)]
pub struct FieldDecl {
    /// Name used by [`Record::field`] and [`Record::set_field`]
    pub field_name: String,
    /// Semantic type of the field
    pub column_type: ColumnType,
    /// Column name override
    pub column_name: Option<String>,
    /// Excluded from the mapping
    pub ignore: bool,
    /// Only writable fields are mapped
    pub writable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub collation: Option<String>,
    /// Declared text length; `None` uses the default
    pub max_length: Option<usize>,
    pub not_null: bool,
    /// Value the engine stores when an insert leaves the column out, and
    /// the fill value for rows that predate an added column
    pub default_value: Option<FieldValue>,
    pub indices: Vec<IndexSpec>,
}

impl FieldDecl {
    /// Declare a field with an explicit semantic type
    pub fn new(field_name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            field_name: field_name.into(),
            column_type,
            column_name: None,
            ignore: false,
            writable: true,
            primary_key: false,
            auto_increment: false,
            collation: None,
            max_length: None,
            not_null: false,
            default_value: None,
            indices: Vec::new(),
        }
    }

    /// Declare a field whose semantic type comes from its Rust type.
    /// `Option<T>` declares the type of `T`.
    pub fn of<T: FromValue>(field_name: impl Into<String>) -> Self {
        Self::new(field_name, T::column_type())
    }

    /// Store the field under a different column name
    #[must_use]
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column_name = Some(name.into());
        self
    }

    /// Leave the field out of the table
    #[must_use]
    pub fn ignore(mut self) -> Self {
        self.ignore = true;
        self
    }

    /// Mark the field as computed; read-only fields are not mapped
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    #[must_use]
    pub fn collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = Some(collation.into());
        self
    }

    #[must_use]
    pub fn max_length(mut self, length: usize) -> Self {
        self.max_length = Some(length);
        self
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Declare a `DEFAULT` for the column
    #[must_use]
    pub fn default_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Add a single-column, non-unique index
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indices.push(IndexSpec {
            name: None,
            order: 0,
            unique: false,
        });
        self
    }

    /// Join a named, non-unique index at the given position
    #[must_use]
    pub fn indexed_named(mut self, name: impl Into<String>, order: i32) -> Self {
        self.indices.push(IndexSpec {
            name: Some(name.into()),
            order,
            unique: false,
        });
        self
    }

    /// Add a single-column unique index
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.indices.push(IndexSpec {
            name: None,
            order: 0,
            unique: true,
        });
        self
    }

    /// Join a named unique index at the given position
    #[must_use]
    pub fn unique_named(mut self, name: impl Into<String>, order: i32) -> Self {
        self.indices.push(IndexSpec {
            name: Some(name.into()),
            order,
            unique: true,
        });
        self
    }
}

/// Table name plus field declarations of a record type
#[derive(Debug, Clone)]
pub struct RecordDecl {
    pub table_name: String,
    pub fields: Vec<FieldDecl>,
}

impl RecordDecl {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field declaration
    #[must_use]
    pub fn field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }
}

/// A type that can be stored as a table row.
///
/// Materialization starts from `Default::default()` and assigns every
/// column present in the result set through [`Record::set_field`].
pub trait Record: Default + 'static {
    /// Describe the table and its fields
    fn declaration() -> RecordDecl;

    /// Current value of a declared field, `None` for unknown names
    fn field(&self, name: &str) -> Option<FieldValue>;

    /// Assign a declared field
    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<()>;
}

/// Implement [`Record`] for a struct by listing its fields.
///
/// ```
/// use rust_sqlite_orm::impl_record;
///
/// #[derive(Debug, Default, Clone)]
/// struct Stock {
///     id: i64,
///     symbol: String,
///     note: Option<String>,
/// }
///
/// impl_record!(Stock, "Stock", {
///     id: i64 => "Id" [primary_key, auto_increment],
///     symbol: String => "Symbol" [max_length(8), unique],
///     note: Option<String> => "Note",
/// });
/// ```
#[macro_export]
macro_rules! impl_record {
    ($ty:ty, $table:expr, {
        $( $field:ident : $fty:ty => $name:literal $( [ $( $marker:ident $( ( $($arg:expr),* ) )? ),* $(,)? ] )? ),* $(,)?
    }) => {
        impl $crate::core::Record for $ty {
            fn declaration() -> $crate::core::RecordDecl {
                $crate::core::RecordDecl::new($table)
                    $(
                        .field(
                            $crate::core::FieldDecl::of::<$fty>($name)
                            $( $( .$marker( $( $($arg),* )? ) )* )?
                        )
                    )*
            }

            fn field(&self, name: &str) -> ::std::option::Option<$crate::core::FieldValue> {
                match name {
                    $( $name => ::std::option::Option::Some($crate::core::FieldValue::from(self.$field.clone())), )*
                    _ => ::std::option::Option::None,
                }
            }

            fn set_field(
                &mut self,
                name: &str,
                value: $crate::core::FieldValue,
            ) -> $crate::core::Result<()> {
                match name {
                    $( $name => { self.$field = value.decode::<$fty>()?; } )*
                    _ => return ::std::result::Result::Err($crate::core::OrmError::column_not_found(name)),
                }
                ::std::result::Result::Ok(())
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Person {
        id: i32,
        name: String,
        age: Option<i32>,
    }

    crate::impl_record!(Person, "Person", {
        id: i32 => "Id" [primary_key, auto_increment],
        name: String => "Name" [max_length(64), indexed_named("IX_Name", 1)],
        age: Option<i32> => "Age",
    });

    #[test]
    fn test_flags() {
        let flags = CreateFlags::IMPLICIT_PK | CreateFlags::AUTO_INC_PK;
        assert!(flags.contains(CreateFlags::IMPLICIT_PK));
        assert!(!flags.contains(CreateFlags::IMPLICIT_INDEX));
        assert!(CreateFlags::ALL_IMPLICIT.contains(CreateFlags::IMPLICIT_INDEX));
        assert!(flags.contains(CreateFlags::NONE));
        assert_eq!(CreateFlags::ALL_IMPLICIT.bits(), 3);
        assert_eq!(CreateFlags::from_bits(5), Some(flags));
        assert!(CreateFlags::from_bits(8).is_none());
        assert!(CreateFlags::empty().is_empty());
    }

    #[test]
    fn test_macro_declaration() {
        let decl = Person::declaration();
        assert_eq!(decl.table_name, "Person");
        assert_eq!(decl.fields.len(), 3);

        let id = &decl.fields[0];
        assert!(id.primary_key && id.auto_increment);
        assert_eq!(id.column_type, ColumnType::I32);

        let name = &decl.fields[1];
        assert_eq!(name.max_length, Some(64));
        assert_eq!(name.indices[0].name.as_deref(), Some("IX_Name"));
        assert_eq!(name.indices[0].order, 1);

        assert_eq!(decl.fields[2].column_type, ColumnType::I32);
    }

    #[test]
    fn test_macro_accessors() {
        let mut p = Person::default();
        p.set_field("Name", FieldValue::Text("Ada".into())).unwrap();
        p.set_field("Age", FieldValue::Null).unwrap();
        p.set_field("Id", FieldValue::I64(3)).unwrap();

        assert_eq!(p.name, "Ada");
        assert_eq!(p.age, None);
        assert_eq!(p.field("Id"), Some(FieldValue::I32(3)));
        assert_eq!(p.field("Age"), Some(FieldValue::Null));
        assert!(p.field("Missing").is_none());
        assert!(p.set_field("Missing", FieldValue::Null).is_err());
    }

    #[test]
    fn test_builder_markers() {
        let f = FieldDecl::new("Code", ColumnType::Text)
            .column("code_col")
            .collation("NOCASE")
            .not_null()
            .unique();
        assert_eq!(f.column_name.as_deref(), Some("code_col"));
        assert_eq!(f.collation.as_deref(), Some("NOCASE"));
        assert!(f.not_null);
        assert!(f.indices[0].unique);
        assert!(f.writable && !f.ignore);
    }
}
