//! Write-transaction context.
//!
//! A [`WriteTransaction`] only exists while the storage adapter holds the
//! writer's exclusive lock with an open SQLite transaction, which is what
//! makes the collector's thread contract type-enforced: `touch`,
//! `record_known`, and `record_delete` are unreachable without one.

use rusqlite::{Connection, Transaction};
use std::ops::Deref;
use vigil_core::{ChangeCollector, EntityKind, Result, VigilError};

pub struct WriteTransaction<'conn> {
    txn: Transaction<'conn>,
    collector: &'conn ChangeCollector,
    completions: Vec<Box<dyn FnOnce() + Send>>,
}

impl<'conn> WriteTransaction<'conn> {
    pub(crate) fn new(txn: Transaction<'conn>, collector: &'conn ChangeCollector) -> Self {
        Self {
            txn,
            collector,
            completions: Vec::new(),
        }
    }

    /// Execute a statement, mapping the backend error.
    pub fn execute<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.txn
            .execute(sql, params)
            .map_err(|e| VigilError::Storage(e.to_string()))
    }

    /// Query a single row, mapping the backend error.
    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<T>
    where
        P: rusqlite::Params,
        F: FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        self.txn
            .query_row(sql, params, f)
            .map_err(|e| VigilError::Storage(e.to_string()))
    }

    /// Rowid of the most recent insert on this connection.
    pub fn last_insert_rowid(&self) -> i64 {
        self.txn.last_insert_rowid()
    }

    /// Force observers to treat the entity as updated even though no column
    /// changed (metadata-only refresh).
    pub fn touch(&self, kind: EntityKind, identifier: impl Into<String>) {
        self.collector.record_touch(kind, identifier.into());
    }

    /// Capture a rowid → identifier mapping known from an in-memory model,
    /// letting resolution skip the query for this row.
    pub fn record_known(&self, kind: EntityKind, rowid: i64, identifier: impl Into<String>) {
        self.collector.record_known(kind, rowid, identifier.into());
    }

    /// Capture a delete whose stable identifier is known locally; deleted
    /// rows cannot be resolved after the fact.
    pub fn record_delete(&self, kind: EntityKind, identifier: impl Into<String>) {
        self.collector.record_delete(kind, identifier.into());
    }

    /// Run `f` on the consumer thread once this commit has been published.
    pub fn on_published(&mut self, f: impl FnOnce() + Send + 'static) {
        self.completions.push(Box::new(f));
    }

    pub(crate) fn into_parts(self) -> (Transaction<'conn>, Vec<Box<dyn FnOnce() + Send>>) {
        (self.txn, self.completions)
    }
}

/// Raw access for callers that need the full rusqlite surface; errors from
/// direct use convert via `VigilError::Other` or an explicit mapping.
impl Deref for WriteTransaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.txn
    }
}
