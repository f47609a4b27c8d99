//! Error types for the ORM layer
//!
//! Every fallible operation in the crate returns [`Result`]. Engine failures
//! are classified on the way in: constraint violations surface as
//! [`OrmError::ConstraintViolation`] carrying the table and column named by
//! the engine, everything else keeps the raw [`rusqlite::Error`].

use rusqlite::ErrorCode;
use std::fmt;

/// Result type alias for ORM operations
pub type Result<T> = std::result::Result<T, OrmError>;

/// Kind of integrity constraint reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// A NOT NULL column received a null
    NotNull,
    /// A UNIQUE index rejected a duplicate
    Unique,
    /// A PRIMARY KEY rejected a duplicate
    PrimaryKey,
    /// Foreign key, check constraint, or anything else
    Other,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstraintKind::NotNull => "NOT NULL",
            ConstraintKind::Unique => "UNIQUE",
            ConstraintKind::PrimaryKey => "PRIMARY KEY",
            ConstraintKind::Other => "constraint",
        };
        f.write_str(name)
    }
}

/// Error types for ORM operations
#[derive(Debug, thiserror::Error)]
pub enum OrmError {
    /// Invalid record declaration or DDL conflict
    #[error("Schema error: {0}")]
    Schema(String),

    /// The engine rejected a write because of an integrity constraint
    #[error("{kind} constraint violated: {message}")]
    ConstraintViolation {
        kind: ConstraintKind,
        table: Option<String>,
        column: Option<String>,
        message: String,
    },

    /// A value or declared type with no storage mapping
    #[error("Unsupported type for {operation}: {type_name}")]
    UnsupportedType {
        type_name: String,
        operation: &'static str,
    },

    /// Stored value could not be read as the declared type
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Transaction control used out of order or with a stale savepoint
    #[error("Transaction error: {0}")]
    TransactionState(String),

    /// Predicate could not be translated to SQL
    #[error("Translation error: {0}")]
    Translation(String),

    /// A lookup that must produce a row produced none
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record has no field with that name
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Operation is not possible for this table shape
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Connection closed or could not be opened
    #[error("Connection error: {0}")]
    Connection(String),

    /// Blob serializer failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON encoding failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[source] rusqlite::Error),
}

impl From<rusqlite::Error> for OrmError {
    fn from(err: rusqlite::Error) -> Self {
        OrmError::from_engine(err)
    }
}

impl OrmError {
    /// Create a new schema error
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        OrmError::Schema(msg.into())
    }

    /// Create a new unsupported type error
    pub fn unsupported_type(type_name: impl Into<String>, operation: &'static str) -> Self {
        OrmError::UnsupportedType {
            type_name: type_name.into(),
            operation,
        }
    }

    /// Create a new type mismatch error
    pub fn type_mismatch(expected: &str, actual: &str) -> Self {
        OrmError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a new transaction state error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        OrmError::TransactionState(msg.into())
    }

    /// Create a new translation error
    pub fn translation<S: Into<String>>(msg: S) -> Self {
        OrmError::Translation(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        OrmError::NotFound(msg.into())
    }

    /// Create a new column not found error
    pub fn column_not_found<S: Into<String>>(name: S) -> Self {
        OrmError::ColumnNotFound(name.into())
    }

    /// Create a new unsupported operation error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        OrmError::UnsupportedOperation(msg.into())
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        OrmError::Connection(msg.into())
    }

    /// Create a new serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        OrmError::Serialization(msg.into())
    }

    /// Classify an engine error.
    ///
    /// Constraint failures become [`OrmError::ConstraintViolation`]; the
    /// engine's message (`"NOT NULL constraint failed: Person.Name"`) is
    /// parsed for the offending table and column.
    pub fn from_engine(err: rusqlite::Error) -> Self {
        let rusqlite::Error::SqliteFailure(ffi_err, message) = &err else {
            return OrmError::Sqlite(err);
        };
        if ffi_err.code != ErrorCode::ConstraintViolation {
            return OrmError::Sqlite(err);
        }

        let kind = match ffi_err.extended_code {
            rusqlite::ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintKind::NotNull,
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => ConstraintKind::Unique,
            rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => ConstraintKind::PrimaryKey,
            _ => ConstraintKind::Other,
        };
        let message = message.clone().unwrap_or_else(|| err.to_string());
        let (table, column) = parse_constraint_target(&message);

        OrmError::ConstraintViolation {
            kind,
            table,
            column,
            message,
        }
    }

    /// Underlying engine error code, when the failure came from the engine
    pub fn engine_code(&self) -> Option<ErrorCode> {
        match self {
            OrmError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => Some(e.code),
            OrmError::ConstraintViolation { .. } => Some(ErrorCode::ConstraintViolation),
            _ => None,
        }
    }

    /// Whether the engine reported a condition that leaves an open
    /// transaction in an unknown state (I/O failure, full disk, busy,
    /// out of memory, interrupted).
    pub fn is_transient(&self) -> bool {
        matches!(
            self.engine_code(),
            Some(
                ErrorCode::SystemIoFailure
                    | ErrorCode::DiskFull
                    | ErrorCode::DatabaseBusy
                    | ErrorCode::OutOfMemory
                    | ErrorCode::OperationInterrupted
            )
        )
    }

    /// Whether this is a constraint violation of the given kind
    pub fn is_constraint(&self, expected: ConstraintKind) -> bool {
        matches!(self, OrmError::ConstraintViolation { kind, .. } if *kind == expected)
    }
}

/// Pulls `table.column` out of an engine constraint message. Composite
/// targets (`"T.a, T.b"`) report their first column.
fn parse_constraint_target(message: &str) -> (Option<String>, Option<String>) {
    let Some((_, target)) = message.rsplit_once(": ") else {
        return (None, None);
    };
    let first = target.split(',').next().unwrap_or_default().trim();
    match first.split_once('.') {
        Some((table, column)) if !table.is_empty() && !column.is_empty() => {
            (Some(table.to_string()), Some(column.to_string()))
        }
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_error(extended_code: i32, message: &str) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(extended_code),
            Some(message.to_string()),
        )
    }

    #[test]
    fn test_error_creation() {
        let err = OrmError::schema("two primary keys");
        assert!(matches!(err, OrmError::Schema(_)));

        let err = OrmError::translation("bad call");
        assert!(matches!(err, OrmError::Translation(_)));

        let err = OrmError::type_mismatch("i32", "text");
        assert!(matches!(err, OrmError::TypeMismatch { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = OrmError::transaction("no transaction is open");
        assert_eq!(err.to_string(), "Transaction error: no transaction is open");

        let err = OrmError::unsupported_type("Point", "bind");
        assert_eq!(err.to_string(), "Unsupported type for bind: Point");
    }

    #[test]
    fn test_not_null_violation_is_classified() {
        let err: OrmError = engine_error(
            rusqlite::ffi::SQLITE_CONSTRAINT_NOTNULL,
            "NOT NULL constraint failed: Person.Name",
        )
        .into();

        match err {
            OrmError::ConstraintViolation {
                kind,
                table,
                column,
                ..
            } => {
                assert_eq!(kind, ConstraintKind::NotNull);
                assert_eq!(table.as_deref(), Some("Person"));
                assert_eq!(column.as_deref(), Some("Name"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_composite_unique_reports_first_column() {
        let err = OrmError::from_engine(engine_error(
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
            "UNIQUE constraint failed: Account.Region, Account.Email",
        ));
        assert!(err.is_constraint(ConstraintKind::Unique));
        if let OrmError::ConstraintViolation { column, .. } = err {
            assert_eq!(column.as_deref(), Some("Region"));
        }
    }

    #[test]
    fn test_transient_classification() {
        let busy = OrmError::from_engine(engine_error(rusqlite::ffi::SQLITE_BUSY, "locked"));
        assert!(busy.is_transient());

        let syntax = OrmError::from_engine(engine_error(rusqlite::ffi::SQLITE_ERROR, "syntax"));
        assert!(!syntax.is_transient());
        assert!(!OrmError::schema("x").is_transient());
    }

    #[test]
    fn test_parse_constraint_target_without_column() {
        assert_eq!(parse_constraint_target("CHECK constraint failed: positive"), (None, None));
        assert_eq!(parse_constraint_target("no colon"), (None, None));
    }
}
