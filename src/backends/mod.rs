//! rusqlite-facing implementation
//!
//! The connection, command execution with lazy row materialization, value
//! binding and the insert statement cache.

pub mod binder;
pub mod command;
pub mod sqlite;
pub mod statement_cache;

pub use binder::ValueBinder;
pub use command::{Command, DeferredRows, PreparedCommand};
pub use sqlite::{Connection, ConnectionBuilder, ConnectionOptions, OpenMode};
pub use statement_cache::{InsertCommand, StatementCache, REPLACE_MODIFIER};
