//! Engine-independent building blocks
//!
//! Error types, semantic values, record declarations and their table
//! mappings, DDL generation, the expression tree with its SQL compiler, the
//! query builder and transaction control.

pub mod compiler;
pub mod error;
pub mod expr;
pub mod mapping;
pub mod migration;
pub mod query;
pub mod schema;
pub mod serializer;
pub mod transaction;
pub mod value;

// Re-export commonly used types
pub use compiler::{compile_predicate, CompileResult, QueryCompiler};
pub use error::{ConstraintKind, OrmError, Result};
pub use expr::{call, captured, col, list, val, BinaryOp, Expr, Method};
pub use mapping::{Column, SchemaRegistry, TableMapping};
pub use migration::{ColumnInfo, CreateTableResult, IndexGroup};
pub use query::{OrderBy, OrderDirection, TableQuery};
pub use schema::{CreateFlags, FieldDecl, IndexSpec, Record, RecordDecl};
pub use serializer::{BlobSerializer, BlobSerializerDelegate, JsonBlobSerializer, SqlSerializable};
pub use transaction::{SavepointToken, TransactionGuard};
pub use value::{ColumnType, FieldValue, FromValue, SqlEnum, StoragePolicy};
