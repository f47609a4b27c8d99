//! # Rust SQLite ORM
//!
//! A small object-relational mapping layer over SQLite (through `rusqlite`).
//! Record types describe their table once; the crate derives the schema,
//! creates and additively migrates tables, binds and reads typed values,
//! compiles predicate expressions into parameterized SQL and manages nested
//! transactions through savepoints.
//!
//! ## Features
//!
//! - **Declarative mapping**: [`impl_record!`] or a hand-written [`Record`]
//!   impl; table mappings are cached per type
//! - **Additive migration**: `create_table` adds missing columns and never
//!   drops or alters existing ones
//! - **Typed values**: integers, floats, text, blobs, enums, date-times and
//!   durations as ticks, GUIDs as text or blob, plus custom types through
//!   [`SqlSerializable`] or a connection-level [`BlobSerializer`]
//! - **Expression queries**: `filter`/`order_by`/`take`/`skip` over an
//!   [`Expr`] tree, with null-aware `IS`/`IS NOT` comparisons
//! - **Nested transactions**: savepoints, `run_in_transaction` and an RAII
//!   [`TransactionGuard`]
//!
//! ## Quick Start
//!
//! ```rust
//! use rust_sqlite_orm::prelude::*;
//! use rust_sqlite_orm::impl_record;
//!
//! #[derive(Debug, Default, Clone)]
//! struct Stock {
//!     id: i64,
//!     symbol: String,
//! }
//!
//! impl_record!(Stock, "Stock", {
//!     id: i64 => "Id" [primary_key, auto_increment],
//!     symbol: String => "Symbol" [max_length(8)],
//! });
//!
//! fn main() -> Result<()> {
//!     let conn = Connection::open_in_memory()?;
//!     conn.create_table::<Stock>(CreateFlags::NONE)?;
//!
//!     for symbol in ["MSFT", "AAPL", "AMZN"] {
//!         let mut stock = Stock { symbol: symbol.into(), ..Default::default() };
//!         conn.insert(&mut stock)?;
//!     }
//!
//!     let a_stocks = conn
//!         .table::<Stock>()?
//!         .filter(col("Symbol").starts_with("A"))?
//!         .order_by("Symbol")
//!         .to_list()?;
//!     assert_eq!(a_stocks.len(), 2);
//!     assert_eq!(a_stocks[0].symbol, "AAPL");
//!     Ok(())
//! }
//! ```
//!
//! ### Working with Transactions
//!
//! ```rust
//! use rust_sqlite_orm::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let conn = Connection::open_in_memory()?;
//!     conn.execute("CREATE TABLE accounts (id integer PRIMARY KEY, balance float)", &[])?;
//!
//!     let outcome: Result<()> = conn.run_in_transaction(|c| {
//!         c.execute("INSERT INTO accounts (balance) VALUES (?)", &[100.0.into()])?;
//!         Err(OrmError::transaction("abort"))
//!     });
//!     assert!(outcome.is_err());
//!     assert_eq!(conn.execute_scalar::<i64>("SELECT count(*) FROM accounts", &[])?, 0);
//!     Ok(())
//! }
//! ```
//!
//! ## Project Structure
//!
//! ```text
//! src/
//! ├── core/                 # Engine-independent types
//! │   ├── error.rs          # OrmError
//! │   ├── value.rs          # FieldValue, ColumnType, tick encodings
//! │   ├── schema.rs         # Record, declarations, impl_record!
//! │   ├── mapping.rs        # TableMapping, SchemaRegistry
//! │   ├── migration.rs      # DDL and index groups
//! │   ├── serializer.rs     # Custom type extension points
//! │   ├── expr.rs           # Expression tree
//! │   ├── compiler.rs       # Expression to SQL
//! │   ├── query.rs          # TableQuery
//! │   └── transaction.rs    # Savepoints and TransactionGuard
//! ├── backends/             # rusqlite-facing code
//! │   ├── sqlite.rs         # Connection, options, builder
//! │   ├── command.rs        # Commands and lazy rows
//! │   ├── binder.rs         # ValueBinder
//! │   └── statement_cache.rs
//! └── lib.rs
//! ```

/// Engine-independent types
pub mod core;

/// rusqlite-facing implementation
pub mod backends;

/// Prelude for convenient imports
///
/// ```rust
/// use rust_sqlite_orm::prelude::*;
///
/// fn main() -> Result<()> {
///     let conn = Connection::open_in_memory()?;
///     assert!(!conn.is_in_transaction());
///     Ok(())
/// }
/// ```
pub mod prelude {
    pub use crate::backends::{Connection, ConnectionBuilder, ConnectionOptions, OpenMode};
    pub use crate::core::{
        call, col, captured, list, val, BlobSerializer, ColumnType, CreateFlags, CreateTableResult,
        Expr, FieldDecl, FieldValue, FromValue, JsonBlobSerializer, Method, OrmError, Record, RecordDecl,
        Result, SqlEnum, SqlSerializable, TableQuery, TransactionGuard,
    };
}

// Re-export at root level for convenience
pub use self::backends::{Connection, ConnectionBuilder, ConnectionOptions, OpenMode};
pub use self::core::{
    ColumnType, CreateFlags, Expr, FieldValue, OrmError, Record, RecordDecl, Result,
    TransactionGuard,
};
pub use self::core::serializer::{BlobSerializer, SqlSerializable};
