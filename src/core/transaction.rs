//! Nested transactions over savepoints
//!
//! A connection tracks one transaction depth. `begin_transaction` moves it
//! from 0 to 1; every savepoint increments it and hands back a token that
//! records the depth it was taken at. Releasing or rolling back to a token
//! winds the depth back down to that recorded value. `commit` and `rollback`
//! always flatten the whole stack.
//!
//! The depth counter is bookkeeping; the engine's autocommit state decides
//! whether a `ROLLBACK` is still owed. A `RELEASE` that fails (a deferred
//! foreign key check on the outermost savepoint, say) leaves the engine
//! inside a transaction, and `rollback` still clears it.

use crate::backends::sqlite::Connection;
use crate::core::error::{OrmError, Result};
use rand::Rng;
use std::sync::atomic::Ordering;

/// A savepoint name: `S<salt>D<depth>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavepointToken {
    salt: u16,
    depth: usize,
}

impl SavepointToken {
    /// New token with a random salt for the given pre-increment depth
    pub fn generate(depth: usize) -> Self {
        Self {
            salt: rand::thread_rng().gen_range(0..i16::MAX as u16),
            depth,
        }
    }

    /// Depth recorded in a token string.
    ///
    /// Only the part after the last `D` matters; the salt is not checked.
    pub fn parse_depth(token: &str) -> Result<usize> {
        let invalid = || OrmError::transaction(format!("Invalid savepoint token: {token}"));
        let split = token.rfind('D').ok_or_else(invalid)?;
        if split < 2 || !token.starts_with('S') {
            return Err(invalid());
        }
        token[split + 1..].parse::<usize>().map_err(|_| invalid())
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl std::fmt::Display for SavepointToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S{}D{}", self.salt, self.depth)
    }
}

impl Connection {
    /// Whether a transaction or savepoint is open
    pub fn is_in_transaction(&self) -> bool {
        self.transaction_depth() > 0
    }

    /// Current nesting depth; 0 when idle
    pub fn transaction_depth(&self) -> usize {
        self.transaction_depth.load(Ordering::SeqCst)
    }

    /// Start a transaction.
    ///
    /// # Errors
    ///
    /// `TransactionState` when a transaction is already open; use
    /// [`Connection::save_transaction_point`] to nest.
    pub fn begin_transaction(&self) -> Result<()> {
        if self
            .transaction_depth
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OrmError::transaction(
                "Cannot begin a transaction while already in a transaction",
            ));
        }

        if let Err(e) = self.execute("BEGIN TRANSACTION", &[]) {
            self.recover_failed_control(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Open a savepoint, starting a transaction if none is open.
    ///
    /// Returns the token to pass to [`Connection::release`] or
    /// [`Connection::rollback_to`].
    pub fn save_transaction_point(&self) -> Result<String> {
        let depth = self.transaction_depth.fetch_add(1, Ordering::SeqCst);
        let token = SavepointToken::generate(depth).to_string();

        if let Err(e) = self.execute(&format!("SAVEPOINT {token}"), &[]) {
            self.recover_failed_control(&e);
            return Err(e);
        }
        Ok(token)
    }

    /// Release a savepoint, keeping its changes in the enclosing level
    pub fn release(&self, savepoint: &str) -> Result<()> {
        self.savepoint_command("RELEASE", savepoint)
    }

    /// Undo everything done since a savepoint.
    ///
    /// An empty token rolls back the whole transaction.
    pub fn rollback_to(&self, savepoint: &str) -> Result<()> {
        if savepoint.is_empty() {
            return self.rollback();
        }
        self.savepoint_command("ROLLBACK TO", savepoint)
    }

    /// Roll back the whole transaction, if the engine has one open
    pub fn rollback(&self) -> Result<()> {
        self.transaction_depth.store(0, Ordering::SeqCst);
        if self.handle()?.is_autocommit() {
            return Ok(());
        }
        self.execute("ROLLBACK", &[])?;
        Ok(())
    }

    /// Commit the whole transaction, if one is open.
    ///
    /// A failed commit rolls back before the error is returned.
    pub fn commit(&self) -> Result<()> {
        if self.transaction_depth.swap(0, Ordering::SeqCst) == 0 {
            return Ok(());
        }
        if let Err(e) = self.execute("COMMIT", &[]) {
            if !self.handle()?.is_autocommit() {
                if let Err(rollback) = self.execute("ROLLBACK", &[]) {
                    tracing::warn!(error = %rollback, "rollback after failed commit failed");
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Run `f` inside a savepoint.
    ///
    /// The savepoint is released when `f` succeeds. When `f` or the release
    /// fails the whole transaction is rolled back, including enclosing
    /// levels, and the error is returned.
    pub fn run_in_transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let guard = TransactionGuard::begin(self)?;
        match f(self) {
            Ok(value) => {
                guard.commit()?;
                Ok(value)
            }
            Err(e) => {
                guard.abandon(&e);
                Err(e)
            }
        }
    }

    fn savepoint_command(&self, verb: &str, savepoint: &str) -> Result<()> {
        let depth = SavepointToken::parse_depth(savepoint)?;
        let current = self.transaction_depth();
        if depth >= current {
            return Err(OrmError::transaction(format!(
                "Savepoint {savepoint} is not valid at transaction depth {current}"
            )));
        }
        self.transaction_depth.store(depth, Ordering::SeqCst);
        if let Err(e) = self.execute(&format!("{verb} {savepoint}"), &[]) {
            let restored = if self.handle()?.is_autocommit() { 0 } else { current };
            self.transaction_depth.store(restored, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    fn recover_failed_control(&self, error: &OrmError) {
        if error.is_transient() {
            tracing::warn!(error = %error, "transaction control failed; rolling back");
            if let Err(e) = self.rollback() {
                tracing::warn!(error = %e, "forced rollback failed");
            }
        } else {
            self.transaction_depth.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// RAII savepoint that rolls the whole transaction back unless committed
///
/// # Example
///
/// ```
/// use rust_sqlite_orm::prelude::*;
///
/// # fn main() -> rust_sqlite_orm::Result<()> {
/// let conn = Connection::open_in_memory()?;
/// conn.execute("CREATE TABLE t(x integer)", &[])?;
///
/// let tx = TransactionGuard::begin(&conn)?;
/// conn.execute("INSERT INTO t VALUES (1)", &[])?;
/// tx.commit()?;
///
/// let tx = TransactionGuard::begin(&conn)?;
/// conn.execute("INSERT INTO t VALUES (2)", &[])?;
/// drop(tx);
///
/// assert_eq!(conn.execute_scalar::<i64>("SELECT count(*) FROM t", &[])?, 1);
/// # Ok(())
/// # }
/// ```
pub struct TransactionGuard<'c> {
    conn: &'c Connection,
    savepoint: String,
    completed: bool,
}

impl<'c> TransactionGuard<'c> {
    /// Open a savepoint on `conn`
    pub fn begin(conn: &'c Connection) -> Result<Self> {
        let savepoint = conn.save_transaction_point()?;
        Ok(Self {
            conn,
            savepoint,
            completed: false,
        })
    }

    /// Token of the underlying savepoint
    pub fn savepoint(&self) -> &str {
        &self.savepoint
    }

    /// Release the savepoint; a failed release rolls the whole transaction back
    pub fn commit(mut self) -> Result<()> {
        self.completed = true;
        if let Err(e) = self.conn.release(&self.savepoint) {
            self.abandon(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Roll back the whole transaction
    pub fn rollback(mut self) -> Result<()> {
        self.completed = true;
        self.conn.rollback()
    }

    fn abandon(mut self, cause: &OrmError) {
        self.completed = true;
        tracing::debug!(savepoint = %self.savepoint, error = %cause, "rolling back transaction");
        if let Err(e) = self.conn.rollback() {
            tracing::error!(error = %e, "rollback failed");
        }
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        tracing::warn!(savepoint = %self.savepoint, "transaction guard dropped without commit; rolling back");
        if let Err(e) = self.conn.rollback() {
            tracing::error!(error = %e, "rollback on drop failed");
        }
    }
}
