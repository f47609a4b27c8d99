//! Extension points for types the binder does not know natively
//!
//! [`SqlSerializable`] lets a value type stand in for one of the primitive
//! column types. [`BlobSerializer`] is consulted last, for
//! [`FieldValue::Custom`] values, and stores them as blobs.

use crate::core::error::{OrmError, Result};
use crate::core::value::{ColumnType, FieldValue};
use std::collections::HashSet;
use std::fmt;

/// A value type that converts itself to and from a primitive field value
pub trait SqlSerializable: Sized {
    /// Name used in error messages
    fn type_name() -> &'static str;

    /// Primitive type stored in the column
    fn primitive_type() -> ColumnType;

    /// Primitive representation of `self`
    fn serialize(&self) -> FieldValue;

    /// Rebuild from the primitive representation
    fn deserialize(value: FieldValue) -> Result<Self>;

    /// Semantic column type for fields of this type
    fn column_type() -> ColumnType {
        ColumnType::Serialized {
            type_name: Self::type_name().to_string(),
            primitive: Box::new(Self::primitive_type()),
        }
    }

    /// Wrap `self` for binding
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Serialized {
            type_name: Self::type_name().to_string(),
            value: Box::new(self.serialize()),
        }
    }

    /// Unwrap a field value read from a column
    fn from_field_value(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Serialized { value, .. } => Self::deserialize(*value),
            other => Self::deserialize(other),
        }
    }
}

/// Converts custom values to and from blobs.
///
/// Values arrive as `serde_json::Value`, which is how
/// [`FieldValue::Custom`] carries them.
pub trait BlobSerializer: Send + Sync {
    /// Encode a value of the named type
    fn serialize(&self, type_name: &str, value: &serde_json::Value) -> Result<Vec<u8>>;

    /// Decode a blob into a value of the named type
    fn deserialize(&self, type_name: &str, data: &[u8]) -> Result<serde_json::Value>;

    /// Whether blobs of the named type can be decoded
    fn can_deserialize(&self, type_name: &str) -> bool;

    /// Whether values of the named type can be encoded
    fn can_serialize(&self, type_name: &str) -> bool {
        self.can_deserialize(type_name)
    }
}

/// Stores custom values as JSON text in a blob
#[derive(Debug, Clone, Default)]
pub struct JsonBlobSerializer {
    types: Option<HashSet<String>>,
}

impl JsonBlobSerializer {
    /// Accept every custom type
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept only the named types
    pub fn for_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: Some(types.into_iter().map(Into::into).collect()),
        }
    }
}

impl BlobSerializer for JsonBlobSerializer {
    fn serialize(&self, _type_name: &str, value: &serde_json::Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, _type_name: &str, data: &[u8]) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(data)?)
    }

    fn can_deserialize(&self, type_name: &str) -> bool {
        self.types
            .as_ref()
            .map_or(true, |types| types.contains(type_name))
    }
}

type SerializeFn = Box<dyn Fn(&str, &serde_json::Value) -> Result<Vec<u8>> + Send + Sync>;
type DeserializeFn = Box<dyn Fn(&str, &[u8]) -> Result<serde_json::Value> + Send + Sync>;
type CanDeserializeFn = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Blob serializer assembled from closures
pub struct BlobSerializerDelegate {
    serialize: SerializeFn,
    deserialize: DeserializeFn,
    can_deserialize: CanDeserializeFn,
}

impl BlobSerializerDelegate {
    pub fn new<S, D, C>(serialize: S, deserialize: D, can_deserialize: C) -> Self
    where
        S: Fn(&str, &serde_json::Value) -> Result<Vec<u8>> + Send + Sync + 'static,
        D: Fn(&str, &[u8]) -> Result<serde_json::Value> + Send + Sync + 'static,
        C: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            serialize: Box::new(serialize),
            deserialize: Box::new(deserialize),
            can_deserialize: Box::new(can_deserialize),
        }
    }
}

impl fmt::Debug for BlobSerializerDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobSerializerDelegate").finish_non_exhaustive()
    }
}

impl BlobSerializer for BlobSerializerDelegate {
    fn serialize(&self, type_name: &str, value: &serde_json::Value) -> Result<Vec<u8>> {
        (self.serialize)(type_name, value)
    }

    fn deserialize(&self, type_name: &str, data: &[u8]) -> Result<serde_json::Value> {
        (self.deserialize)(type_name, data)
    }

    fn can_deserialize(&self, type_name: &str) -> bool {
        (self.can_deserialize)(type_name)
    }
}

/// Encode a custom field value, failing when no serializer accepts it
pub(crate) fn serialize_custom(
    serializer: Option<&dyn BlobSerializer>,
    type_name: &str,
    value: &serde_json::Value,
) -> Result<Vec<u8>> {
    match serializer {
        Some(s) if s.can_serialize(type_name) => s.serialize(type_name, value),
        _ => Err(OrmError::unsupported_type(type_name, "bind")),
    }
}
