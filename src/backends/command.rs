//! Commands and lazy row materialization
//!
//! A [`Command`] is SQL text plus positional arguments. Preparing it yields a
//! [`PreparedCommand`] that owns the native statement; queries over it are
//! streamed through [`DeferredRows`], which steps the statement one row at a
//! time. The statement is reset when the rows are dropped and finalized when
//! the prepared command is dropped, whichever way enumeration ends.

use crate::backends::binder::ValueBinder;
use crate::backends::sqlite::Connection;
use crate::core::error::Result;
use crate::core::mapping::TableMapping;
use crate::core::schema::Record;
use crate::core::value::{FieldValue, FromValue};
use rusqlite::{Row, Rows, Statement};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

/// SQL text with bound arguments, tied to a connection
#[derive(Debug, Clone)]
pub struct Command<'c> {
    conn: &'c Connection,
    text: String,
    bindings: Vec<FieldValue>,
}

impl<'c> Command<'c> {
    pub(crate) fn new(conn: &'c Connection, text: impl Into<String>, bindings: Vec<FieldValue>) -> Self {
        Self {
            conn,
            text: text.into(),
            bindings,
        }
    }

    /// SQL text of the command
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Arguments in placeholder order
    pub fn bindings(&self) -> &[FieldValue] {
        &self.bindings
    }

    /// Append a positional argument
    pub fn bind(&mut self, value: impl Into<FieldValue>) -> &mut Self {
        self.bindings.push(value.into());
        self
    }

    /// Prepare the statement and bind every argument
    pub fn prepare(&self) -> Result<PreparedCommand<'c>> {
        self.conn.trace_statement(&self.text, self.bindings.len());
        let mut stmt = self.conn.handle()?.prepare(&self.text)?;
        self.conn.binder().bind_all(&mut stmt, &self.bindings)?;
        Ok(PreparedCommand {
            conn: self.conn,
            stmt,
            started: Instant::now(),
        })
    }

    /// Run a statement that returns no rows; returns the affected row count
    pub fn execute_non_query(&self) -> Result<usize> {
        let mut prepared = self.prepare()?;
        let changed = prepared.execute()?;
        self.conn.record_elapsed(&self.text, prepared.started);
        Ok(changed)
    }

    /// Run a query and materialize every row as `T`
    pub fn execute_query<T: Record>(&self) -> Result<Vec<T>> {
        let mapping = self.conn.get_mapping::<T>()?;
        self.execute_query_with(mapping)
    }

    /// Run a query against an explicit mapping
    pub fn execute_query_with<T: Record>(&self, mapping: Arc<TableMapping>) -> Result<Vec<T>> {
        let mut prepared = self.prepare()?;
        let records = prepared.deferred_with::<T>(mapping)?.collect::<Result<Vec<T>>>()?;
        self.conn.record_elapsed(&self.text, prepared.started);
        Ok(records)
    }

    /// Stream the rows of a query through `f` without collecting them
    pub fn with_deferred<T, R, F>(&self, f: F) -> Result<R>
    where
        T: Record,
        F: FnOnce(DeferredRows<'_, T>) -> Result<R>,
    {
        let mapping = self.conn.get_mapping::<T>()?;
        let mut prepared = self.prepare()?;
        let result = f(prepared.deferred_with::<T>(mapping)?);
        self.conn.record_elapsed(&self.text, prepared.started);
        result
    }

    /// First column of the first row, read as `S`. No row reads as null.
    pub fn execute_scalar<S: FromValue>(&self) -> Result<S> {
        let mut prepared = self.prepare()?;
        let value = prepared.scalar::<S>()?;
        self.conn.record_elapsed(&self.text, prepared.started);
        Ok(value)
    }
}

/// A prepared native statement with its arguments bound
pub struct PreparedCommand<'c> {
    conn: &'c Connection,
    stmt: Statement<'c>,
    started: Instant,
}

impl<'c> PreparedCommand<'c> {
    /// Step the statement to completion and return the affected row count
    pub fn execute(&mut self) -> Result<usize> {
        if self.stmt.column_count() == 0 {
            return Ok(self.stmt.raw_execute()?);
        }
        let mut rows = self.stmt.raw_query();
        while rows.next()?.is_some() {}
        Ok(self.conn.handle()?.changes() as usize)
    }

    /// Lazily materialize rows as `T` using the connection's mapping of `T`
    pub fn deferred<T: Record>(&mut self) -> Result<DeferredRows<'_, T>> {
        let mapping = self.conn.get_mapping::<T>()?;
        self.deferred_with(mapping)
    }

    /// Lazily materialize rows as `T` using `mapping`.
    ///
    /// Result columns with no mapped counterpart are skipped.
    pub fn deferred_with<T: Record>(&mut self, mapping: Arc<TableMapping>) -> Result<DeferredRows<'_, T>> {
        let columns: Vec<Option<usize>> = self
            .stmt
            .column_names()
            .into_iter()
            .map(|name| mapping.column_position(name))
            .collect();
        let binder = self.conn.binder();

        Ok(DeferredRows {
            rows: self.stmt.raw_query(),
            mapping,
            columns,
            binder,
            finished: false,
            _marker: PhantomData,
        })
    }

    /// First column of the first row, read as `S`
    pub fn scalar<S: FromValue>(&mut self) -> Result<S> {
        let binder = self.conn.binder();
        let mut rows = self.stmt.raw_query();
        let value = match rows.next()? {
            Some(row) => binder.read(row.get_ref(0)?, &S::column_type())?,
            None => FieldValue::Null,
        };
        S::from_value(value)
    }
}

/// Forward-only, single-pass sequence of records backed by a live statement
pub struct DeferredRows<'s, T> {
    rows: Rows<'s>,
    mapping: Arc<TableMapping>,
    columns: Vec<Option<usize>>,
    binder: ValueBinder,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DeferredRows<'_, T> {
    /// Mapping the rows are materialized against
    pub fn mapping(&self) -> &TableMapping {
        &self.mapping
    }
}

impl<T: Record> Iterator for DeferredRows<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = match self.rows.next() {
            Ok(Some(row)) => materialize(row, &self.mapping, &self.columns, &self.binder),
            Ok(None) => {
                self.finished = true;
                return None;
            }
            Err(e) => Err(e.into()),
        };
        if item.is_err() {
            self.finished = true;
        }
        Some(item)
    }
}

fn materialize<T: Record>(
    row: &Row<'_>,
    mapping: &TableMapping,
    columns: &[Option<usize>],
    binder: &ValueBinder,
) -> Result<T> {
    let mut record = T::default();
    for (i, position) in columns.iter().enumerate() {
        let Some(position) = position else {
            continue;
        };
        let column = &mapping.columns()[*position];
        let value = binder.read(row.get_ref(i)?, column.column_type())?;
        column.set_value(&mut record, value)?;
    }
    Ok(record)
}
