//! Value binder and reader
//!
//! Moves [`FieldValue`]s across the engine boundary. Binding picks one native
//! SQLite primitive per value; reading decodes a column by its declared
//! [`ColumnType`], with a null storage class always reading as null.

use crate::core::error::{OrmError, Result};
use crate::core::serializer::{serialize_custom, BlobSerializer};
use crate::core::value::{
    date_time_from_ticks, date_time_to_ticks, decimal_from_f64, duration_from_ticks,
    duration_to_ticks, narrow, parse_date_time, ColumnType, FieldValue, StoragePolicy,
    DATE_TIME_FORMAT,
};
use rusqlite::types::{Value, ValueRef};
use rusqlite::Statement;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Binds and reads values under one connection's storage policy
#[derive(Clone, Default)]
pub struct ValueBinder {
    policy: StoragePolicy,
    serializer: Option<Arc<dyn BlobSerializer>>,
}

impl std::fmt::Debug for ValueBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueBinder")
            .field("policy", &self.policy)
            .field("serializer", &self.serializer.is_some())
            .finish()
    }
}

impl ValueBinder {
    pub fn new(policy: StoragePolicy, serializer: Option<Arc<dyn BlobSerializer>>) -> Self {
        Self { policy, serializer }
    }

    pub fn policy(&self) -> StoragePolicy {
        self.policy
    }

    fn serializer(&self) -> Option<&dyn BlobSerializer> {
        self.serializer.as_deref()
    }

    /// Native primitive for a value
    pub fn to_sql_value(&self, value: &FieldValue) -> Result<Value> {
        let native = match value {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(v) => Value::Integer(i64::from(*v)),
            FieldValue::I8(v) => Value::Integer(i64::from(*v)),
            FieldValue::I16(v) => Value::Integer(i64::from(*v)),
            FieldValue::I32(v) => Value::Integer(i64::from(*v)),
            FieldValue::I64(v) | FieldValue::Enum(v) => Value::Integer(*v),
            FieldValue::U8(v) => Value::Integer(i64::from(*v)),
            FieldValue::U16(v) => Value::Integer(i64::from(*v)),
            FieldValue::U32(v) => Value::Integer(i64::from(*v)),
            FieldValue::F32(v) => Value::Real(f64::from(*v)),
            FieldValue::F64(v) => Value::Real(*v),
            FieldValue::Decimal(d) => Value::Real(
                d.to_f64()
                    .ok_or_else(|| OrmError::unsupported_type("decimal", "bind"))?,
            ),
            FieldValue::Text(v) => Value::Text(v.clone()),
            FieldValue::Bytes(v) => Value::Blob(v.clone()),
            FieldValue::DateTime(v) if self.policy.store_date_time_as_ticks => {
                Value::Integer(date_time_to_ticks(v)?)
            }
            FieldValue::DateTime(v) => Value::Text(v.format(DATE_TIME_FORMAT).to_string()),
            FieldValue::Duration(v) => Value::Integer(duration_to_ticks(v)?),
            FieldValue::Guid(v) if self.policy.store_guid_as_blob => {
                Value::Blob(v.as_bytes().to_vec())
            }
            FieldValue::Guid(v) => Value::Text(v.hyphenated().to_string()),
            FieldValue::Serialized { type_name, value } => match value.as_ref() {
                FieldValue::Serialized { .. } | FieldValue::Custom { .. } => {
                    return Err(OrmError::unsupported_type(type_name.clone(), "bind"))
                }
                primitive => self.to_sql_value(primitive)?,
            },
            FieldValue::Custom { type_name, value } => {
                Value::Blob(serialize_custom(self.serializer(), type_name, value)?)
            }
        };
        Ok(native)
    }

    /// Bind a value at a 1-based parameter index
    pub fn bind(&self, stmt: &mut Statement<'_>, index: usize, value: &FieldValue) -> Result<()> {
        let native = self.to_sql_value(value)?;
        stmt.raw_bind_parameter(index, native)?;
        Ok(())
    }

    /// Bind every value in order, starting at index 1
    pub fn bind_all(&self, stmt: &mut Statement<'_>, values: &[FieldValue]) -> Result<()> {
        let expected = stmt.parameter_count();
        if expected != values.len() {
            return Err(OrmError::Sqlite(rusqlite::Error::InvalidParameterCount(
                values.len(),
                expected,
            )));
        }
        for (i, value) in values.iter().enumerate() {
            self.bind(stmt, i + 1, value)?;
        }
        Ok(())
    }

    /// Decode a column by its declared type
    pub fn read(&self, raw: ValueRef<'_>, declared: &ColumnType) -> Result<FieldValue> {
        if let ValueRef::Null = raw {
            return Ok(FieldValue::Null);
        }

        let value = match declared {
            ColumnType::Bool => FieldValue::Bool(read_integer(raw, declared)? != 0),
            ColumnType::I8 => FieldValue::I8(narrow(read_integer(raw, declared)?, declared)?),
            ColumnType::I16 => FieldValue::I16(narrow(read_integer(raw, declared)?, declared)?),
            ColumnType::I32 => FieldValue::I32(narrow(read_integer(raw, declared)?, declared)?),
            ColumnType::I64 => FieldValue::I64(read_integer(raw, declared)?),
            ColumnType::U8 => FieldValue::U8(narrow(read_integer(raw, declared)?, declared)?),
            ColumnType::U16 => FieldValue::U16(narrow(read_integer(raw, declared)?, declared)?),
            ColumnType::U32 => FieldValue::U32(narrow(read_integer(raw, declared)?, declared)?),
            ColumnType::F32 => FieldValue::F32(read_real(raw, declared)? as f32),
            ColumnType::F64 => FieldValue::F64(read_real(raw, declared)?),
            ColumnType::Decimal => FieldValue::Decimal(match raw {
                ValueRef::Integer(v) => Decimal::from(v),
                ValueRef::Text(_) => {
                    let text = read_text(raw);
                    text.trim()
                        .parse::<Decimal>()
                        .map_err(|_| OrmError::type_mismatch("decimal", &text))?
                }
                _ => decimal_from_f64(read_real(raw, declared)?)?,
            }),
            ColumnType::Text => FieldValue::Text(read_text(raw)),
            ColumnType::Bytes => FieldValue::Bytes(read_blob(raw, declared)?),
            ColumnType::Enum(_) => FieldValue::Enum(read_integer(raw, declared)?),
            ColumnType::DateTime => match raw {
                ValueRef::Integer(ticks) => FieldValue::DateTime(date_time_from_ticks(ticks)?),
                _ => FieldValue::DateTime(parse_date_time(&read_text(raw))?),
            },
            ColumnType::Duration => {
                FieldValue::Duration(duration_from_ticks(read_integer(raw, declared)?))
            }
            ColumnType::Guid => match raw {
                ValueRef::Blob(bytes) => FieldValue::Guid(
                    Uuid::from_slice(bytes)
                        .map_err(|_| OrmError::type_mismatch("guid", "blob"))?,
                ),
                _ => {
                    let text = read_text(raw);
                    FieldValue::Guid(
                        Uuid::parse_str(&text).map_err(|_| OrmError::type_mismatch("guid", &text))?,
                    )
                }
            },
            ColumnType::Serialized {
                type_name,
                primitive,
            } => match primitive.as_ref() {
                ColumnType::Serialized { .. } | ColumnType::Custom(_) => {
                    return Err(OrmError::unsupported_type(type_name.clone(), "read"))
                }
                inner => FieldValue::Serialized {
                    type_name: type_name.clone(),
                    value: Box::new(self.read(raw, inner)?),
                },
            },
            ColumnType::Custom(type_name) => match self.serializer() {
                Some(s) if s.can_deserialize(type_name) => FieldValue::Custom {
                    type_name: type_name.clone(),
                    value: s.deserialize(type_name, &read_blob(raw, declared)?)?,
                },
                _ => return Err(OrmError::unsupported_type(type_name.clone(), "read")),
            },
        };
        Ok(value)
    }
}

fn storage_class(raw: ValueRef<'_>) -> &'static str {
    match raw {
        ValueRef::Null => "null",
        ValueRef::Integer(_) => "integer",
        ValueRef::Real(_) => "real",
        ValueRef::Text(_) => "text",
        ValueRef::Blob(_) => "blob",
    }
}

fn read_integer(raw: ValueRef<'_>, declared: &ColumnType) -> Result<i64> {
    match raw {
        ValueRef::Integer(v) => Ok(v),
        ValueRef::Real(v) => Ok(v as i64),
        ValueRef::Text(t) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| OrmError::type_mismatch(declared.name(), "text")),
        other => Err(OrmError::type_mismatch(declared.name(), storage_class(other))),
    }
}

fn read_real(raw: ValueRef<'_>, declared: &ColumnType) -> Result<f64> {
    match raw {
        ValueRef::Real(v) => Ok(v),
        ValueRef::Integer(v) => Ok(v as f64),
        ValueRef::Text(t) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| OrmError::type_mismatch(declared.name(), "text")),
        other => Err(OrmError::type_mismatch(declared.name(), storage_class(other))),
    }
}

fn read_text(raw: ValueRef<'_>) -> String {
    match raw {
        ValueRef::Null => String::new(),
        ValueRef::Integer(v) => v.to_string(),
        ValueRef::Real(v) => v.to_string(),
        ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
    }
}

fn read_blob(raw: ValueRef<'_>, declared: &ColumnType) -> Result<Vec<u8>> {
    match raw {
        ValueRef::Blob(b) | ValueRef::Text(b) => Ok(b.to_vec()),
        other => Err(OrmError::type_mismatch(declared.name(), storage_class(other))),
    }
}
