//! Per-table insert statement cache
//!
//! Insert SQL depends on the table and on the insert modifier (`""`,
//! `"OR REPLACE"`, ...). The cache keeps one entry per record type; asking
//! for a different modifier rebuilds the entry. Prepared handles live in
//! rusqlite's statement cache keyed by the SQL text, and the connection
//! flushes that cache whenever an entry is rebuilt.

use crate::core::mapping::TableMapping;
use parking_lot::Mutex;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// Insert modifier that switches to the insert-or-replace column set
pub const REPLACE_MODIFIER: &str = "OR REPLACE";

/// SQL and column order of one table's insert statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertCommand {
    /// Modifier the statement was built for
    pub modifier: String,
    pub sql: String,
    /// Record fields bound, in placeholder order
    pub fields: Vec<String>,
}

impl InsertCommand {
    /// Build the insert statement for a table.
    ///
    /// A replacing insert supplies every column; a plain insert omits the
    /// auto-increment key. A table whose only column is auto-increment
    /// inserts `DEFAULT VALUES`.
    pub fn build(mapping: &TableMapping, modifier: &str) -> Self {
        let replacing = modifier.trim().eq_ignore_ascii_case(REPLACE_MODIFIER);
        let columns: Vec<_> = if replacing {
            mapping.insert_or_replace_columns().collect()
        } else {
            mapping.insert_columns().collect()
        };

        let verb = if modifier.trim().is_empty() {
            "INSERT".to_string()
        } else {
            format!("INSERT {}", modifier.trim())
        };

        let sql = if columns.is_empty() && mapping.columns().len() == 1 && mapping.has_auto_inc_pk()
        {
            format!("{} INTO \"{}\" DEFAULT VALUES", verb, mapping.table_name())
        } else {
            let names: Vec<String> = columns.iter().map(|c| format!("\"{}\"", c.name())).collect();
            let placeholders = vec!["?"; columns.len()].join(",");
            format!(
                "{} INTO \"{}\"({}) VALUES ({})",
                verb,
                mapping.table_name(),
                names.join(","),
                placeholders
            )
        };

        Self {
            modifier: modifier.to_string(),
            sql,
            fields: columns.iter().map(|c| c.field_name().to_string()).collect(),
        }
    }
}

/// Insert commands keyed by record type
#[derive(Debug, Default)]
pub struct StatementCache {
    inserts: Mutex<HashMap<TypeId, Arc<InsertCommand>>>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert command for a table and modifier.
    ///
    /// Returns the command and whether an existing entry was replaced
    /// because its modifier differed.
    pub fn insert_command(&self, mapping: &TableMapping, modifier: &str) -> (Arc<InsertCommand>, bool) {
        let mut inserts = self.inserts.lock();
        if let Some(existing) = inserts.get(&mapping.type_id()) {
            if existing.modifier == modifier {
                return (Arc::clone(existing), false);
            }
        }

        let command = Arc::new(InsertCommand::build(mapping, modifier));
        let replaced = inserts
            .insert(mapping.type_id(), Arc::clone(&command))
            .is_some();
        (command, replaced)
    }

    /// Forget every cached command
    pub fn clear(&self) {
        self.inserts.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inserts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.lock().is_empty()
    }
}
