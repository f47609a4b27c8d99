//! SQLite connection
//!
//! [`Connection`] owns one rusqlite handle together with the per-connection
//! state of the ORM: cached table mappings, the insert statement cache, the
//! storage policy, an optional blob serializer and the transaction depth.
//! Transaction control lives in [`crate::core::transaction`].

use crate::backends::binder::ValueBinder;
use crate::backends::command::Command;
use crate::backends::statement_cache::{StatementCache, REPLACE_MODIFIER};
use crate::core::error::{OrmError, Result};
use crate::core::expr::Expr;
use crate::core::mapping::{SchemaRegistry, TableMapping};
use crate::core::migration::{self, ColumnInfo, CreateTableResult};
use crate::core::query::TableQuery;
use crate::core::schema::{CreateFlags, Record};
use crate::core::serializer::BlobSerializer;
use crate::core::value::{FieldValue, FromValue, StoragePolicy};
use parking_lot::Mutex;
use rusqlite::OpenFlags;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How the database file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Read-write, creating the file if needed
    #[default]
    ReadWriteCreate,
    ReadWrite,
    ReadOnly,
}

impl OpenMode {
    fn flags(self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        match self {
            OpenMode::ReadWriteCreate => {
                base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
            OpenMode::ReadWrite => base | OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::ReadOnly => base | OpenFlags::SQLITE_OPEN_READ_ONLY,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    100
}

fn default_statement_cache_capacity() -> usize {
    16
}

/// Connection settings, loadable from JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// File path, `:memory:`, or a `file:` URI
    pub database_path: String,
    #[serde(default)]
    pub open_mode: OpenMode,
    /// Store date-times as ticks instead of text
    #[serde(default = "default_true")]
    pub store_date_time_as_ticks: bool,
    /// Store GUIDs as 16-byte blobs instead of text
    #[serde(default)]
    pub store_guid_as_blob: bool,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub foreign_keys: bool,
    /// Log every statement at trace level
    #[serde(default)]
    pub trace: bool,
    /// Log statement timings at debug level
    #[serde(default)]
    pub time_execution: bool,
    /// Capacity of rusqlite's prepared statement cache
    #[serde(default = "default_statement_cache_capacity")]
    pub statement_cache_capacity: usize,
}

impl ConnectionOptions {
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            open_mode: OpenMode::default(),
            store_date_time_as_ticks: true,
            store_guid_as_blob: false,
            busy_timeout_ms: default_busy_timeout_ms(),
            foreign_keys: true,
            trace: false,
            time_execution: false,
            statement_cache_capacity: default_statement_cache_capacity(),
        }
    }

    /// Parse options from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn storage_policy(&self) -> StoragePolicy {
        StoragePolicy {
            store_date_time_as_ticks: self.store_date_time_as_ticks,
            store_guid_as_blob: self.store_guid_as_blob,
        }
    }
}

/// Builder for connections
pub struct ConnectionBuilder {
    options: ConnectionOptions,
    serializer: Option<Arc<dyn BlobSerializer>>,
}

impl ConnectionBuilder {
    /// Create a new connection builder for the given database path
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            options: ConnectionOptions::new(database_path),
            serializer: None,
        }
    }

    /// Start from existing options
    pub fn from_options(options: ConnectionOptions) -> Self {
        Self {
            options,
            serializer: None,
        }
    }

    /// Set the open mode
    pub fn open_mode(mut self, mode: OpenMode) -> Self {
        self.options.open_mode = mode;
        self
    }

    /// Store date-times as ticks (default) or as text
    pub fn store_date_time_as_ticks(mut self, enabled: bool) -> Self {
        self.options.store_date_time_as_ticks = enabled;
        self
    }

    /// Store GUIDs as blobs instead of text
    pub fn store_guid_as_blob(mut self, enabled: bool) -> Self {
        self.options.store_guid_as_blob = enabled;
        self
    }

    /// Set how long the engine waits on a locked database
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.options.busy_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable or disable foreign key enforcement
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.options.foreign_keys = enabled;
        self
    }

    /// Log every statement
    pub fn trace(mut self, enabled: bool) -> Self {
        self.options.trace = enabled;
        self
    }

    /// Log statement timings
    pub fn time_execution(mut self, enabled: bool) -> Self {
        self.options.time_execution = enabled;
        self
    }

    /// Set the prepared statement cache capacity
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.options.statement_cache_capacity = capacity;
        self
    }

    /// Attach a blob serializer for custom field types
    pub fn blob_serializer(mut self, serializer: impl BlobSerializer + 'static) -> Self {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    /// Options collected so far
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Open the connection
    pub fn open(self) -> Result<Connection> {
        Connection::open_with(self.options, self.serializer)
    }
}

/// An open SQLite database with ORM state
pub struct Connection {
    handle: Option<rusqlite::Connection>,
    options: ConnectionOptions,
    serializer: Option<Arc<dyn BlobSerializer>>,
    registry: SchemaRegistry,
    tables: Mutex<HashMap<TypeId, Arc<TableMapping>>>,
    inserts: StatementCache,
    pub(crate) transaction_depth: AtomicUsize,
    elapsed_micros: AtomicU64,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("database_path", &self.options.database_path)
            .field("open", &self.handle.is_some())
            .field(
                "transaction_depth",
                &self.transaction_depth.load(Ordering::SeqCst),
            )
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Open a database with default options
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().into_owned();
        Self::open_with(ConnectionOptions::new(path), None)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Open a database with explicit options and an optional blob serializer
    pub fn open_with(
        options: ConnectionOptions,
        serializer: Option<Arc<dyn BlobSerializer>>,
    ) -> Result<Self> {
        let handle = rusqlite::Connection::open_with_flags(
            &options.database_path,
            options.open_mode.flags(),
        )
        .map_err(|e| {
            OrmError::connection(format!(
                "Could not open {}: {}",
                options.database_path, e
            ))
        })?;
        handle.busy_timeout(Duration::from_millis(options.busy_timeout_ms))?;
        handle.set_prepared_statement_cache_capacity(options.statement_cache_capacity);
        if options.foreign_keys {
            handle.execute_batch("PRAGMA foreign_keys = ON")?;
        }

        tracing::debug!(path = %options.database_path, mode = ?options.open_mode, "opened database");

        Ok(Self {
            handle: Some(handle),
            options,
            serializer,
            registry: SchemaRegistry::new(),
            tables: Mutex::new(HashMap::new()),
            inserts: StatementCache::new(),
            transaction_depth: AtomicUsize::new(0),
            elapsed_micros: AtomicU64::new(0),
        })
    }

    /// Native handle, failing once the connection is closed
    pub fn handle(&self) -> Result<&rusqlite::Connection> {
        self.handle
            .as_ref()
            .ok_or_else(|| OrmError::connection("Connection is closed"))
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn database_path(&self) -> &str {
        &self.options.database_path
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn storage_policy(&self) -> StoragePolicy {
        self.options.storage_policy()
    }

    /// Value binder configured with this connection's policy and serializer
    pub fn binder(&self) -> ValueBinder {
        ValueBinder::new(self.storage_policy(), self.serializer.clone())
    }

    fn serializer(&self) -> Option<&dyn BlobSerializer> {
        self.serializer.as_deref()
    }

    /// Total time spent executing statements while `time_execution` is on
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.elapsed_micros.load(Ordering::Relaxed))
    }

    /// Change the busy timeout of the open handle
    pub fn set_busy_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.handle()?.busy_timeout(timeout)?;
        self.options.busy_timeout_ms = timeout.as_millis() as u64;
        Ok(())
    }

    pub(crate) fn trace_statement(&self, sql: &str, argument_count: usize) {
        if self.options.trace {
            tracing::trace!(sql, argument_count, "executing");
        }
    }

    pub(crate) fn record_elapsed(&self, sql: &str, started: Instant) {
        if !self.options.time_execution {
            return;
        }
        let micros = started.elapsed().as_micros() as u64;
        let total = self.elapsed_micros.fetch_add(micros, Ordering::Relaxed) + micros;
        tracing::debug!(
            sql,
            elapsed_ms = micros as f64 / 1000.0,
            total_ms = total as f64 / 1000.0,
            "finished"
        );
    }

    // ------------------------------------------------------------------
    // Mappings
    // ------------------------------------------------------------------

    /// Mapping of `T`: the one its table was created with, or the
    /// explicit-markers-only mapping
    pub fn get_mapping<T: Record>(&self) -> Result<Arc<TableMapping>> {
        if let Some(found) = self.tables.lock().get(&TypeId::of::<T>()) {
            return Ok(Arc::clone(found));
        }
        self.registry.describe::<T>(CreateFlags::NONE)
    }

    /// Mapping of `T` under specific flags
    pub fn get_mapping_with<T: Record>(&self, flags: CreateFlags) -> Result<Arc<TableMapping>> {
        self.registry.describe::<T>(flags)
    }

    /// Mappings of every table created through this connection
    pub fn table_mappings(&self) -> Vec<Arc<TableMapping>> {
        self.tables.lock().values().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    /// Create the table of `T`, or add any columns it is missing, then
    /// create its indices.
    ///
    /// Declaration problems (no columns, conflicting index uniqueness,
    /// unmappable types) are reported before any DDL runs.
    pub fn create_table<T: Record>(&self, flags: CreateFlags) -> Result<CreateTableResult> {
        let mapping = self.registry.describe::<T>(flags)?;
        let policy = self.storage_policy();

        let groups = migration::index_groups(&mapping)?;
        let create_sql = migration::create_table_sql(&mapping, policy, self.serializer())?;
        let existing = self.get_table_info(mapping.table_name())?;

        let result = if existing.is_empty() {
            self.execute(&create_sql, &[])?;
            tracing::debug!(table = mapping.table_name(), "created table");
            CreateTableResult::Created
        } else {
            let additions = migration::missing_columns(&mapping, &existing)
                .into_iter()
                .map(|c| migration::add_column_sql(mapping.table_name(), c, policy, self.serializer()))
                .collect::<Result<Vec<_>>>()?;
            for sql in &additions {
                self.execute(sql, &[])?;
            }
            if !additions.is_empty() {
                tracing::debug!(
                    table = mapping.table_name(),
                    added = additions.len(),
                    "migrated table"
                );
            }
            CreateTableResult::Migrated {
                added_columns: additions.len(),
            }
        };

        for group in &groups {
            self.execute(&group.create_sql(), &[])?;
        }

        self.tables
            .lock()
            .insert(TypeId::of::<T>(), Arc::clone(&mapping));
        Ok(result)
    }

    /// Drop the table of `T` if it exists
    pub fn drop_table<T: Record>(&self) -> Result<usize> {
        let mapping = self.get_mapping::<T>()?;
        let changed = self.execute(&migration::drop_table_sql(mapping.table_name()), &[])?;
        self.tables.lock().remove(&TypeId::of::<T>());
        Ok(changed)
    }

    /// Create a single-column index named `<table>_<column>`
    pub fn create_index(&self, table_name: &str, column_name: &str, unique: bool) -> Result<usize> {
        let name = format!("{table_name}_{column_name}");
        self.create_index_named(&name, table_name, &[column_name], unique)
    }

    /// Create an index over several columns
    pub fn create_index_named(
        &self,
        index_name: &str,
        table_name: &str,
        columns: &[&str],
        unique: bool,
    ) -> Result<usize> {
        let sql = migration::create_index_sql(index_name, table_name, columns, unique);
        self.execute(&sql, &[])
    }

    /// Live columns of a table; empty when the table does not exist
    pub fn get_table_info(&self, table_name: &str) -> Result<Vec<ColumnInfo>> {
        let sql = format!("PRAGMA table_info(\"{table_name}\")");
        self.trace_statement(&sql, 0);
        let mut stmt = self.handle()?.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(ColumnInfo {
                cid: row.get("cid")?,
                name: row.get("name")?,
                declared_type: row.get("type")?,
                not_null: row.get::<_, i64>("notnull")? != 0,
                default_value: row.get("dflt_value")?,
                primary_key: row.get("pk")?,
            })
        })?;
        let columns = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Create a command bound to this connection
    pub fn create_command(&self, sql: &str, args: &[FieldValue]) -> Result<Command<'_>> {
        self.handle()?;
        Ok(Command::new(self, sql, args.to_vec()))
    }

    /// Execute a statement; returns the affected row count
    pub fn execute(&self, sql: &str, args: &[FieldValue]) -> Result<usize> {
        self.create_command(sql, args)?.execute_non_query()
    }

    /// First column of the first row
    pub fn execute_scalar<S: FromValue>(&self, sql: &str, args: &[FieldValue]) -> Result<S> {
        self.create_command(sql, args)?.execute_scalar()
    }

    /// Run a query and materialize the rows as `T`
    pub fn query<T: Record>(&self, sql: &str, args: &[FieldValue]) -> Result<Vec<T>> {
        self.create_command(sql, args)?.execute_query()
    }

    /// Stream query rows through `f`
    pub fn deferred_query<T, R, F>(&self, sql: &str, args: &[FieldValue], f: F) -> Result<R>
    where
        T: Record,
        F: FnOnce(crate::backends::command::DeferredRows<'_, T>) -> Result<R>,
    {
        self.create_command(sql, args)?.with_deferred(f)
    }

    /// Query builder over the table of `T`
    pub fn table<T: Record>(&self) -> Result<TableQuery<'_, T>> {
        Ok(TableQuery::new(self, self.get_mapping::<T>()?))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Row with the given primary key; `NotFound` when absent
    pub fn get<T: Record>(&self, key: impl Into<FieldValue>) -> Result<T> {
        let mapping = self.get_mapping::<T>()?;
        self.find_with_mapping(&mapping, key.into())?.ok_or_else(|| {
            OrmError::not_found(format!("No {} row with that primary key", mapping.table_name()))
        })
    }

    /// Row with the given primary key, if any
    pub fn find<T: Record>(&self, key: impl Into<FieldValue>) -> Result<Option<T>> {
        let mapping = self.get_mapping::<T>()?;
        self.find_with_mapping(&mapping, key.into())
    }

    fn find_with_mapping<T: Record>(&self, mapping: &Arc<TableMapping>, key: FieldValue) -> Result<Option<T>> {
        let args: Vec<FieldValue> = if mapping.pk().is_some() { vec![key] } else { Vec::new() };
        let command = self.create_command(mapping.get_by_primary_key_sql(), &args)?;
        let mut rows = command.execute_query_with::<T>(Arc::clone(mapping))?;
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }

    /// First row matching a predicate; `NotFound` when none does
    pub fn get_where<T: Record>(&self, predicate: Expr) -> Result<T> {
        self.table::<T>()?.filter(predicate)?.first()
    }

    /// First row matching a predicate, if any
    pub fn find_where<T: Record>(&self, predicate: Expr) -> Result<Option<T>> {
        self.table::<T>()?.filter(predicate)?.first_or_default()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert a record. An auto-increment key is filled in from the engine;
    /// a nil auto-GUID key is replaced by a fresh v4 GUID first.
    pub fn insert<T: Record>(&self, record: &mut T) -> Result<usize> {
        self.insert_with_extra(record, "")
    }

    /// Insert a record, replacing any row with the same key
    pub fn insert_or_replace<T: Record>(&self, record: &mut T) -> Result<usize> {
        self.insert_with_extra(record, REPLACE_MODIFIER)
    }

    /// Insert with a modifier such as `"OR IGNORE"`
    pub fn insert_with_extra<T: Record>(&self, record: &mut T, extra: &str) -> Result<usize> {
        let mapping = self.get_mapping::<T>()?;

        if let Some(pk) = mapping.pk().filter(|c| c.is_auto_guid()) {
            let current = pk.value_of(record)?;
            if matches!(current, FieldValue::Null) || current == FieldValue::Guid(Uuid::nil()) {
                pk.set_value(record, FieldValue::Guid(Uuid::new_v4()))?;
            }
        }

        let (command, rebuilt) = self.inserts.insert_command(&mapping, extra);
        let handle = self.handle()?;
        if rebuilt {
            handle.flush_prepared_statement_cache();
        }

        let values = command
            .fields
            .iter()
            .map(|field| {
                record
                    .field(field)
                    .ok_or_else(|| OrmError::column_not_found(field.as_str()))
            })
            .collect::<Result<Vec<_>>>()?;

        self.trace_statement(&command.sql, values.len());
        let started = Instant::now();
        let mut stmt = handle.prepare_cached(&command.sql)?;
        self.binder().bind_all(&mut stmt, &values)?;
        let count = stmt.raw_execute()?;
        drop(stmt);
        self.record_elapsed(&command.sql, started);

        if mapping.has_auto_inc_pk() {
            mapping.set_auto_inc_pk(record, handle.last_insert_rowid())?;
        }
        Ok(count)
    }

    /// Insert every record inside one transaction
    pub fn insert_all<'r, T, I>(&self, records: I) -> Result<usize>
    where
        T: Record,
        I: IntoIterator<Item = &'r mut T>,
    {
        self.insert_all_with_extra(records, "")
    }

    /// Insert every record with a modifier inside one transaction
    pub fn insert_all_with_extra<'r, T, I>(&self, records: I, extra: &str) -> Result<usize>
    where
        T: Record,
        I: IntoIterator<Item = &'r mut T>,
    {
        self.run_in_transaction(|conn| {
            let mut count = 0;
            for record in records {
                count += conn.insert_with_extra(record, extra)?;
            }
            Ok(count)
        })
    }

    /// Write every non-key column, matched by primary key
    pub fn update<T: Record>(&self, record: &T) -> Result<usize> {
        let mapping = self.get_mapping::<T>()?;
        let pk = mapping.pk().ok_or_else(|| {
            OrmError::unsupported(format!(
                "Cannot update {}: it has no primary key",
                mapping.table_name()
            ))
        })?;

        let columns: Vec<_> = mapping.columns().iter().filter(|c| !c.is_primary_key()).collect();
        if columns.is_empty() {
            return Ok(0);
        }

        let mut args = columns
            .iter()
            .map(|c| c.value_of(record))
            .collect::<Result<Vec<_>>>()?;
        args.push(pk.value_of(record)?);

        let assignments: Vec<String> = columns.iter().map(|c| format!("\"{}\" = ?", c.name())).collect();
        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE \"{}\" = ?",
            mapping.table_name(),
            assignments.join(", "),
            pk.name()
        );
        self.execute(&sql, &args)
    }

    /// Update every record inside one transaction
    pub fn update_all<'r, T, I>(&self, records: I) -> Result<usize>
    where
        T: Record,
        I: IntoIterator<Item = &'r T>,
    {
        self.run_in_transaction(|conn| {
            let mut count = 0;
            for record in records {
                count += conn.update(record)?;
            }
            Ok(count)
        })
    }

    /// Delete the row with the record's primary key
    pub fn delete<T: Record>(&self, record: &T) -> Result<usize> {
        let mapping = self.get_mapping::<T>()?;
        let pk = mapping.pk().ok_or_else(|| {
            OrmError::unsupported(format!(
                "Cannot delete {}: it has no primary key",
                mapping.table_name()
            ))
        })?;
        let key = pk.value_of(record)?;
        self.delete_by_key_with(&mapping, key)
    }

    /// Delete the row with the given primary key
    pub fn delete_by_key<T: Record>(&self, key: impl Into<FieldValue>) -> Result<usize> {
        let mapping = self.get_mapping::<T>()?;
        self.delete_by_key_with(&mapping, key.into())
    }

    fn delete_by_key_with(&self, mapping: &TableMapping, key: FieldValue) -> Result<usize> {
        let pk = mapping.pk().ok_or_else(|| {
            OrmError::unsupported(format!(
                "Cannot delete {}: it has no primary key",
                mapping.table_name()
            ))
        })?;
        let sql = format!(
            "DELETE FROM \"{}\" WHERE \"{}\" = ?",
            mapping.table_name(),
            pk.name()
        );
        self.execute(&sql, &[key])
    }

    /// Delete every row of the table of `T`
    pub fn delete_all<T: Record>(&self) -> Result<usize> {
        let mapping = self.get_mapping::<T>()?;
        self.execute(&format!("DELETE FROM \"{}\"", mapping.table_name()), &[])
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Roll back any open transaction, finalize cached statements and close
    /// the handle. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.transaction_depth.store(0, Ordering::SeqCst);
        if !handle.is_autocommit() {
            tracing::warn!(path = %self.options.database_path, "closing with an open transaction; rolling back");
            if let Err(e) = handle.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "rollback on close failed");
            }
        }
        self.inserts.clear();
        handle.flush_prepared_statement_cache();
        handle.close().map_err(|(handle, e)| {
            self.handle = Some(handle);
            OrmError::from(e)
        })?;
        tracing::debug!(path = %self.options.database_path, "closed database");
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "error while closing connection");
        }
    }
}
