//! Field value types
//!
//! [`ColumnType`] is the semantic type a record field declares. [`FieldValue`]
//! is the closed set of values a field can hold while it travels between a
//! record and the engine. [`FromValue`] extracts native Rust values back out.

use crate::core::error::{OrmError, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of 100ns ticks in one second
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks between 0001-01-01T00:00:00 and the Unix epoch
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Text layout used for date-times when ticks storage is disabled
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Semantic type of a mapped field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    F32,
    F64,
    /// Fixed-point number, stored as a float
    Decimal,
    Text,
    Bytes,
    /// Stored as ticks or text depending on the connection policy
    DateTime,
    /// Stored as ticks
    Duration,
    /// Stored as hyphenated text or 16 raw bytes
    Guid,
    /// Enumeration stored as its integer discriminant
    Enum(String),
    /// Value type that converts itself to and from a primitive
    Serialized {
        type_name: String,
        primitive: Box<ColumnType>,
    },
    /// Arbitrary type stored as a blob through the connection's blob serializer
    Custom(String),
}

impl ColumnType {
    /// Name used in error messages
    pub fn name(&self) -> &str {
        match self {
            ColumnType::Bool => "bool",
            ColumnType::I8 => "i8",
            ColumnType::I16 => "i16",
            ColumnType::I32 => "i32",
            ColumnType::I64 => "i64",
            ColumnType::U8 => "u8",
            ColumnType::U16 => "u16",
            ColumnType::U32 => "u32",
            ColumnType::F32 => "f32",
            ColumnType::F64 => "f64",
            ColumnType::Decimal => "decimal",
            ColumnType::Text => "text",
            ColumnType::Bytes => "bytes",
            ColumnType::DateTime => "datetime",
            ColumnType::Duration => "duration",
            ColumnType::Guid => "guid",
            ColumnType::Enum(name) => name,
            ColumnType::Serialized { type_name, .. } => type_name,
            ColumnType::Custom(name) => name,
        }
    }

    /// Whether values of this type behave as text in predicates
    pub fn is_text(&self) -> bool {
        match self {
            ColumnType::Text => true,
            ColumnType::Serialized { primitive, .. } => primitive.is_text(),
            _ => false,
        }
    }
}

/// Storage choices that vary per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePolicy {
    /// Store date-times as 64-bit ticks instead of text
    pub store_date_time_as_ticks: bool,
    /// Store GUIDs as 16-byte blobs instead of 36-character text
    pub store_guid_as_blob: bool,
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self {
            store_date_time_as_ticks: true,
            store_guid_as_blob: false,
        }
    }
}

/// A value held by a record field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
    Duration(Duration),
    Guid(Uuid),
    /// Enumeration discriminant
    Enum(i64),
    /// Self-serializing value type, carried as its primitive form
    Serialized {
        type_name: String,
        value: Box<FieldValue>,
    },
    /// Arbitrary value handed to the blob serializer
    Custom {
        type_name: String,
        value: serde_json::Value,
    },
}

impl FieldValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::I8(_) => "i8",
            FieldValue::I16(_) => "i16",
            FieldValue::I32(_) => "i32",
            FieldValue::I64(_) => "i64",
            FieldValue::U8(_) => "u8",
            FieldValue::U16(_) => "u16",
            FieldValue::U32(_) => "u32",
            FieldValue::F32(_) => "f32",
            FieldValue::F64(_) => "f64",
            FieldValue::Decimal(_) => "decimal",
            FieldValue::Text(_) => "text",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::DateTime(_) => "datetime",
            FieldValue::Duration(_) => "duration",
            FieldValue::Guid(_) => "guid",
            FieldValue::Enum(_) => "enum",
            FieldValue::Serialized { type_name, .. } => type_name,
            FieldValue::Custom { type_name, .. } => type_name,
        }
    }

    /// Semantic type of this value, `None` for null
    pub fn column_type(&self) -> Option<ColumnType> {
        let ty = match self {
            FieldValue::Null => return None,
            FieldValue::Bool(_) => ColumnType::Bool,
            FieldValue::I8(_) => ColumnType::I8,
            FieldValue::I16(_) => ColumnType::I16,
            FieldValue::I32(_) => ColumnType::I32,
            FieldValue::I64(_) => ColumnType::I64,
            FieldValue::U8(_) => ColumnType::U8,
            FieldValue::U16(_) => ColumnType::U16,
            FieldValue::U32(_) => ColumnType::U32,
            FieldValue::F32(_) => ColumnType::F32,
            FieldValue::F64(_) => ColumnType::F64,
            FieldValue::Decimal(_) => ColumnType::Decimal,
            FieldValue::Text(_) => ColumnType::Text,
            FieldValue::Bytes(_) => ColumnType::Bytes,
            FieldValue::DateTime(_) => ColumnType::DateTime,
            FieldValue::Duration(_) => ColumnType::Duration,
            FieldValue::Guid(_) => ColumnType::Guid,
            FieldValue::Enum(_) => ColumnType::Enum("enum".to_string()),
            FieldValue::Serialized { type_name, value } => ColumnType::Serialized {
                type_name: type_name.clone(),
                primitive: Box::new(value.column_type()?),
            },
            FieldValue::Custom { type_name, .. } => ColumnType::Custom(type_name.clone()),
        };
        Some(ty)
    }

    /// Integer view of numeric values
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Bool(v) => Some(i64::from(*v)),
            FieldValue::I8(v) => Some(i64::from(*v)),
            FieldValue::I16(v) => Some(i64::from(*v)),
            FieldValue::I32(v) => Some(i64::from(*v)),
            FieldValue::I64(v) | FieldValue::Enum(v) => Some(*v),
            FieldValue::U8(v) => Some(i64::from(*v)),
            FieldValue::U16(v) => Some(i64::from(*v)),
            FieldValue::U32(v) => Some(i64::from(*v)),
            FieldValue::F32(v) => Some(*v as i64),
            FieldValue::F64(v) => Some(*v as i64),
            FieldValue::Decimal(d) => d.to_i64(),
            FieldValue::Text(s) => s.trim().parse().ok(),
            FieldValue::Serialized { value, .. } => value.as_i64(),
            _ => None,
        }
    }

    /// Floating point view of numeric values
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::F32(v) => Some(f64::from(*v)),
            FieldValue::F64(v) => Some(*v),
            FieldValue::Decimal(d) => d.to_f64(),
            FieldValue::Text(s) => s.trim().parse().ok(),
            FieldValue::Serialized { value, .. } => value.as_f64(),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Get the value as a string slice (zero-copy for text values)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            FieldValue::Serialized { value, .. } => value.as_str(),
            _ => None,
        }
    }

    /// Convert this value to the requested semantic type, the way a cast
    /// inside a predicate would.
    pub fn convert_to(&self, target: &ColumnType) -> Result<FieldValue> {
        if self.is_null() {
            return Ok(FieldValue::Null);
        }
        let mismatch = || OrmError::type_mismatch(target.name(), self.type_name());
        let int = || self.as_i64().ok_or_else(mismatch);

        let converted = match target {
            ColumnType::Bool => match self {
                FieldValue::Bool(b) => FieldValue::Bool(*b),
                _ => FieldValue::Bool(int()? != 0),
            },
            ColumnType::I8 => FieldValue::I8(narrow(int()?, target)?),
            ColumnType::I16 => FieldValue::I16(narrow(int()?, target)?),
            ColumnType::I32 => FieldValue::I32(narrow(int()?, target)?),
            ColumnType::I64 => FieldValue::I64(int()?),
            ColumnType::U8 => FieldValue::U8(narrow(int()?, target)?),
            ColumnType::U16 => FieldValue::U16(narrow(int()?, target)?),
            ColumnType::U32 => FieldValue::U32(narrow(int()?, target)?),
            ColumnType::F32 => FieldValue::F32(self.as_f64().ok_or_else(mismatch)? as f32),
            ColumnType::F64 => FieldValue::F64(self.as_f64().ok_or_else(mismatch)?),
            ColumnType::Decimal => FieldValue::Decimal(match self {
                FieldValue::Decimal(d) => *d,
                FieldValue::Text(s) => s
                    .trim()
                    .parse::<Decimal>()
                    .map_err(|_| OrmError::type_mismatch("decimal", s))?,
                FieldValue::F32(_) | FieldValue::F64(_) => {
                    decimal_from_f64(self.as_f64().ok_or_else(mismatch)?)?
                }
                _ => Decimal::from(int()?),
            }),
            ColumnType::Text => FieldValue::Text(self.to_text()),
            ColumnType::Bytes => match self {
                FieldValue::Bytes(b) => FieldValue::Bytes(b.clone()),
                FieldValue::Text(s) => FieldValue::Bytes(s.clone().into_bytes()),
                _ => return Err(mismatch()),
            },
            ColumnType::DateTime => match self {
                FieldValue::DateTime(dt) => FieldValue::DateTime(*dt),
                FieldValue::Text(s) => FieldValue::DateTime(parse_date_time(s)?),
                FieldValue::I64(ticks) => FieldValue::DateTime(date_time_from_ticks(*ticks)?),
                _ => return Err(mismatch()),
            },
            ColumnType::Duration => match self {
                FieldValue::Duration(d) => FieldValue::Duration(*d),
                _ => FieldValue::Duration(duration_from_ticks(int()?)),
            },
            ColumnType::Guid => match self {
                FieldValue::Guid(g) => FieldValue::Guid(*g),
                FieldValue::Text(s) => FieldValue::Guid(
                    Uuid::parse_str(s).map_err(|_| OrmError::type_mismatch("guid", s))?,
                ),
                _ => return Err(mismatch()),
            },
            ColumnType::Enum(_) => FieldValue::Enum(int()?),
            ColumnType::Serialized {
                type_name,
                primitive,
            } => match self {
                FieldValue::Serialized { type_name: t, .. } if t == type_name => self.clone(),
                _ => FieldValue::Serialized {
                    type_name: type_name.clone(),
                    value: Box::new(self.convert_to(primitive)?),
                },
            },
            ColumnType::Custom(name) => match self {
                FieldValue::Custom { type_name, .. } if type_name == name => self.clone(),
                _ => return Err(mismatch()),
            },
        };
        Ok(converted)
    }

    /// Text rendering used by text conversions
    fn to_text(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(v) => v.to_string(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            FieldValue::DateTime(dt) => dt.format(DATE_TIME_FORMAT).to_string(),
            FieldValue::Duration(d) => d.to_string(),
            FieldValue::Guid(g) => g.hyphenated().to_string(),
            FieldValue::F32(v) => v.to_string(),
            FieldValue::F64(v) => v.to_string(),
            FieldValue::Decimal(d) => d.to_string(),
            FieldValue::Serialized { value, .. } => value.to_text(),
            FieldValue::Custom { value, .. } => value.to_string(),
            other => other.as_i64().map(|v| v.to_string()).unwrap_or_default(),
        }
    }

    /// Extract a native value from this field value
    pub fn decode<T: FromValue>(self) -> Result<T> {
        T::from_value(self)
    }

    /// Wrap an enumeration as its discriminant
    pub fn from_enum<E: SqlEnum>(value: &E) -> Self {
        FieldValue::Enum(value.discriminant())
    }

    /// Read an enumeration back from its discriminant
    pub fn into_enum<E: SqlEnum>(self) -> Result<E> {
        let raw = self
            .as_i64()
            .ok_or_else(|| OrmError::type_mismatch(E::type_name(), self.type_name()))?;
        E::from_discriminant(raw)
            .ok_or_else(|| OrmError::type_mismatch(E::type_name(), &raw.to_string()))
    }

    /// Wrap any serde-serializable value for storage through the blob serializer
    pub fn custom<T: Serialize>(type_name: impl Into<String>, value: &T) -> Result<Self> {
        Ok(FieldValue::Custom {
            type_name: type_name.into(),
            value: serde_json::to_value(value)?,
        })
    }

    /// Read a custom value back into its Rust type
    pub fn into_custom<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        match self {
            FieldValue::Custom { value, .. } => Ok(serde_json::from_value(value)?),
            other => Err(OrmError::type_mismatch("custom", other.type_name())),
        }
    }
}

/// Narrow an integer to the width of a declared type, failing when it does
/// not fit
pub fn narrow<T: TryFrom<i64>>(raw: i64, declared: &ColumnType) -> Result<T> {
    T::try_from(raw).map_err(|_| OrmError::type_mismatch(declared.name(), &raw.to_string()))
}

/// Fixed-point value closest to a stored float
pub fn decimal_from_f64(value: f64) -> Result<Decimal> {
    Decimal::try_from(value).map_err(|_| OrmError::type_mismatch("decimal", &value.to_string()))
}

/// Enumeration stored by integer discriminant
pub trait SqlEnum: Sized {
    /// Name used in error messages and in [`ColumnType::Enum`]
    fn type_name() -> &'static str;

    /// Integer stored for this variant
    fn discriminant(&self) -> i64;

    /// Variant for a stored integer
    fn from_discriminant(value: i64) -> Option<Self>;

    /// Semantic column type for fields of this enumeration
    fn column_type() -> ColumnType {
        ColumnType::Enum(Self::type_name().to_string())
    }
}

/// Native Rust types that can be read from a [`FieldValue`]
pub trait FromValue: Sized {
    /// Declared type used when reading a column into `Self`
    fn column_type() -> ColumnType;

    /// Extract `Self`, failing on null or an incompatible value
    fn from_value(value: FieldValue) -> Result<Self>;
}

macro_rules! integer_from_value {
    ($($ty:ty => $column:ident),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn column_type() -> ColumnType {
                    ColumnType::$column
                }

                fn from_value(value: FieldValue) -> Result<Self> {
                    let raw = value
                        .as_i64()
                        .ok_or_else(|| OrmError::type_mismatch(stringify!($ty), value.type_name()))?;
                    <$ty>::try_from(raw)
                        .map_err(|_| OrmError::type_mismatch(stringify!($ty), &raw.to_string()))
                }
            }

            impl From<$ty> for FieldValue {
                fn from(v: $ty) -> Self {
                    FieldValue::$column(v)
                }
            }
        )*
    };
}

integer_from_value! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
}

impl FromValue for bool {
    fn column_type() -> ColumnType {
        ColumnType::Bool
    }

    fn from_value(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Bool(b) => Ok(b),
            other => other
                .as_i64()
                .map(|v| v != 0)
                .ok_or_else(|| OrmError::type_mismatch("bool", other.type_name())),
        }
    }
}

impl FromValue for f32 {
    fn column_type() -> ColumnType {
        ColumnType::F32
    }

    fn from_value(value: FieldValue) -> Result<Self> {
        value
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| OrmError::type_mismatch("f32", value.type_name()))
    }
}

impl FromValue for f64 {
    fn column_type() -> ColumnType {
        ColumnType::F64
    }

    fn from_value(value: FieldValue) -> Result<Self> {
        value
            .as_f64()
            .ok_or_else(|| OrmError::type_mismatch("f64", value.type_name()))
    }
}

impl FromValue for Decimal {
    fn column_type() -> ColumnType {
        ColumnType::Decimal
    }

    fn from_value(value: FieldValue) -> Result<Self> {
        match value.convert_to(&ColumnType::Decimal)? {
            FieldValue::Decimal(d) => Ok(d),
            other => Err(OrmError::type_mismatch("decimal", other.type_name())),
        }
    }
}

impl FromValue for String {
    fn column_type() -> ColumnType {
        ColumnType::Text
    }

    fn from_value(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Text(s) => Ok(s),
            FieldValue::Null => Err(OrmError::type_mismatch("text", "null")),
            other => Ok(other.to_text()),
        }
    }
}

impl FromValue for Vec<u8> {
    fn column_type() -> ColumnType {
        ColumnType::Bytes
    }

    fn from_value(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Bytes(b) => Ok(b),
            FieldValue::Text(s) => Ok(s.into_bytes()),
            other => Err(OrmError::type_mismatch("bytes", other.type_name())),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn column_type() -> ColumnType {
        ColumnType::DateTime
    }

    fn from_value(value: FieldValue) -> Result<Self> {
        match value.convert_to(&ColumnType::DateTime)? {
            FieldValue::DateTime(dt) => Ok(dt),
            other => Err(OrmError::type_mismatch("datetime", other.type_name())),
        }
    }
}

impl FromValue for Duration {
    fn column_type() -> ColumnType {
        ColumnType::Duration
    }

    fn from_value(value: FieldValue) -> Result<Self> {
        match value.convert_to(&ColumnType::Duration)? {
            FieldValue::Duration(d) => Ok(d),
            other => Err(OrmError::type_mismatch("duration", other.type_name())),
        }
    }
}

impl FromValue for Uuid {
    fn column_type() -> ColumnType {
        ColumnType::Guid
    }

    fn from_value(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Guid(g) => Ok(g),
            FieldValue::Bytes(b) => {
                Uuid::from_slice(&b).map_err(|_| OrmError::type_mismatch("guid", "bytes"))
            }
            other => match other.convert_to(&ColumnType::Guid)? {
                FieldValue::Guid(g) => Ok(g),
                _ => Err(OrmError::type_mismatch("guid", "null")),
            },
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn column_type() -> ColumnType {
        T::column_type()
    }

    fn from_value(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::F32(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::F64(v)
    }
}

impl From<Decimal> for FieldValue {
    fn from(v: Decimal) -> Self {
        FieldValue::Decimal(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(v: &[u8]) -> Self {
        FieldValue::Bytes(v.to_vec())
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(v: NaiveDateTime) -> Self {
        FieldValue::DateTime(v)
    }
}

impl From<Duration> for FieldValue {
    fn from(v: Duration) -> Self {
        FieldValue::Duration(v)
    }
}

impl From<Uuid> for FieldValue {
    fn from(v: Uuid) -> Self {
        FieldValue::Guid(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => FieldValue::Null,
        }
    }
}

/// Convert a date-time to 100ns ticks since 0001-01-01
pub fn date_time_to_ticks(value: &NaiveDateTime) -> Result<i64> {
    let utc = value.and_utc();
    utc.timestamp()
        .checked_mul(TICKS_PER_SECOND)
        .and_then(|t| t.checked_add(i64::from(utc.timestamp_subsec_nanos() / 100)))
        .and_then(|t| t.checked_add(UNIX_EPOCH_TICKS))
        .ok_or_else(|| OrmError::type_mismatch("datetime ticks", &value.to_string()))
}

/// Convert 100ns ticks since 0001-01-01 back to a date-time
pub fn date_time_from_ticks(ticks: i64) -> Result<NaiveDateTime> {
    let since_epoch = ticks
        .checked_sub(UNIX_EPOCH_TICKS)
        .ok_or_else(|| OrmError::type_mismatch("datetime", &ticks.to_string()))?;
    let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = (since_epoch.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| OrmError::type_mismatch("datetime", &ticks.to_string()))
}

/// Convert a duration to 100ns ticks
pub fn duration_to_ticks(value: &Duration) -> Result<i64> {
    value
        .num_seconds()
        .checked_mul(TICKS_PER_SECOND)
        .and_then(|t| t.checked_add(i64::from(value.subsec_nanos() / 100)))
        .ok_or_else(|| OrmError::type_mismatch("duration ticks", &value.to_string()))
}

/// Convert 100ns ticks to a duration
pub fn duration_from_ticks(ticks: i64) -> Duration {
    Duration::seconds(ticks / TICKS_PER_SECOND)
        + Duration::nanoseconds((ticks % TICKS_PER_SECOND) * 100)
}

/// Parse a stored date-time text, accepting the `T` separator and bare dates
pub fn parse_date_time(text: &str) -> Result<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, DATE_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map_err(|_| OrmError::type_mismatch("datetime", text))
}
