//! Change-set types flowing from the write path to subscribers.
//!
//! A [`PendingChangeSet`] aggregates raw mutations while a write transaction
//! is open; at commit time it is resolved into a [`ChangeSet`] of stable
//! identifiers, which may then be coalesced with sibling commits before a
//! single publish reaches subscribers.

use crate::error::VigilError;
use crate::registry::EntityKind;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A stable, durable logical key for an entity. Never a rowid.
pub type Identifier = String;

/// Kind of write observed by the mutation hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

/// One intercepted write: ephemeral, consumed immediately by the collector.
#[derive(Debug, Clone)]
pub struct MutationEvent<'a> {
    pub table: &'a str,
    pub rowid: i64,
    pub kind: MutationKind,
}

/// Callback run on the consumer thread once the owning commit has been
/// published (or folded into a published reset).
pub type CompletionCallback = Box<dyn FnOnce() + Send>;

/// Per-transaction aggregate of raw mutations. Exclusively owned by the
/// write path until commit; cleared on commit or rollback.
#[derive(Default)]
pub struct PendingChangeSet {
    /// Touched rowids per kind, straight from the mutation hook.
    pub rows: HashMap<EntityKind, HashSet<i64>>,
    /// Rowid → identifier captures made at append time from an in-memory
    /// model; these skip the resolution query.
    pub known: HashMap<EntityKind, HashMap<i64, Identifier>>,
    /// Identifiers explicitly touched with no backing column change.
    pub touched: HashMap<EntityKind, HashSet<Identifier>>,
    /// Identifiers deleted in this transaction, captured locally.
    pub deleted: HashMap<EntityKind, HashSet<Identifier>>,
    /// Rowids the hook saw deleted; resolvable only through a local capture.
    pub deleted_rows: HashMap<EntityKind, HashSet<i64>>,
    /// Coarse touched-table set (includes unmapped tables).
    pub tables: HashSet<String>,
}

impl PendingChangeSet {
    pub fn is_empty(&self) -> bool {
        self.rows.values().all(HashSet::is_empty)
            && self.touched.values().all(HashSet::is_empty)
            && self.deleted.values().all(HashSet::is_empty)
            && self.deleted_rows.values().all(HashSet::is_empty)
            && self.tables.is_empty()
    }

    /// Upper bound on distinct identifiers this commit will surface, used
    /// for the pre-resolution ceiling check. Rowids and identifiers cannot
    /// be cross-deduplicated before resolution, so this sums per-kind counts.
    pub fn pre_resolution_count(&self) -> usize {
        let rows: usize = self.rows.values().map(HashSet::len).sum();
        let touched: usize = self.touched.values().map(HashSet::len).sum();
        let deleted: usize = self.deleted.values().map(HashSet::len).sum();
        let deleted_rows: usize = self.deleted_rows.values().map(HashSet::len).sum();
        rows + touched + deleted + deleted_rows
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.known.clear();
        self.touched.clear();
        self.deleted.clear();
        self.deleted_rows.clear();
        self.tables.clear();
    }
}

/// Finalized per-commit result: resolved stable identifiers per entity kind,
/// deleted identifiers, parent-collection identifiers, touched tables,
/// completion callbacks, and an optional captured error.
///
/// Change sets merge by set union; an errored contributor poisons the merged
/// result, forcing a full reset downstream instead of an incremental update.
#[derive(Default)]
pub struct ChangeSet {
    updated: HashMap<EntityKind, HashSet<Identifier>>,
    deleted: HashMap<EntityKind, HashSet<Identifier>>,
    parents: HashMap<EntityKind, HashSet<Identifier>>,
    tables: HashSet<String>,
    completions: Vec<CompletionCallback>,
    last_error: Option<VigilError>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A change set carrying only a captured error (resolution failed or
    /// overflowed); publishes as a reset.
    pub fn errored(error: VigilError) -> Self {
        Self {
            last_error: Some(error),
            ..Self::default()
        }
    }

    pub fn insert_updated(&mut self, kind: EntityKind, id: Identifier) {
        self.updated.entry(kind).or_default().insert(id);
    }

    pub fn insert_deleted(&mut self, kind: EntityKind, id: Identifier) {
        self.deleted.entry(kind).or_default().insert(id);
    }

    pub fn insert_parent(&mut self, child: EntityKind, id: Identifier) {
        self.parents.entry(child).or_default().insert(id);
    }

    pub fn insert_table(&mut self, table: String) {
        self.tables.insert(table);
    }

    pub fn push_completion(&mut self, f: CompletionCallback) {
        self.completions.push(f);
    }

    pub fn set_error(&mut self, error: VigilError) {
        self.last_error = Some(error);
    }

    /// Updated (inserted/updated/touched) identifiers for a kind.
    pub fn identifiers(&self, kind: EntityKind) -> impl Iterator<Item = &str> {
        self.updated.get(&kind).into_iter().flatten().map(String::as_str)
    }

    /// Deleted identifiers for a kind.
    pub fn deleted(&self, kind: EntityKind) -> impl Iterator<Item = &str> {
        self.deleted.get(&kind).into_iter().flatten().map(String::as_str)
    }

    /// Parent-collection identifiers surfaced by changes to `child` rows
    /// (e.g. the threads whose interactions changed).
    pub fn parents(&self, child: EntityKind) -> impl Iterator<Item = &str> {
        self.parents.get(&child).into_iter().flatten().map(String::as_str)
    }

    pub fn contains(&self, kind: EntityKind, id: &str) -> bool {
        self.updated.get(&kind).is_some_and(|s| s.contains(id))
    }

    pub fn contains_deleted(&self, kind: EntityKind, id: &str) -> bool {
        self.deleted.get(&kind).is_some_and(|s| s.contains(id))
    }

    /// Coarse touched-table set.
    pub fn tables(&self) -> &HashSet<String> {
        &self.tables
    }

    pub fn did_update_table(&self, table: &str) -> bool {
        self.tables.contains(table)
    }

    /// Total distinct identifiers across all kinds (updated + deleted).
    pub fn identifier_count(&self) -> usize {
        let updated: usize = self.updated.values().map(HashSet::len).sum();
        let deleted: usize = self.deleted.values().map(HashSet::len).sum();
        updated + deleted
    }

    pub fn is_empty(&self) -> bool {
        self.updated.values().all(HashSet::is_empty)
            && self.deleted.values().all(HashSet::is_empty)
            && self.tables.is_empty()
            && self.completions.is_empty()
            && self.last_error.is_none()
    }

    pub fn last_error(&self) -> Option<&VigilError> {
        self.last_error.as_ref()
    }

    pub fn is_errored(&self) -> bool {
        self.last_error.is_some()
    }

    /// Merge a sibling commit's change set into this one (coalescing).
    /// Union semantics; error and completions are carried over.
    pub fn merge(&mut self, other: ChangeSet) {
        for (kind, ids) in other.updated {
            self.updated.entry(kind).or_default().extend(ids);
        }
        for (kind, ids) in other.deleted {
            self.deleted.entry(kind).or_default().extend(ids);
        }
        for (kind, ids) in other.parents {
            self.parents.entry(kind).or_default().extend(ids);
        }
        self.tables.extend(other.tables);
        self.completions.extend(other.completions);
        if other.last_error.is_some() {
            self.last_error = other.last_error;
        }
    }

    /// Drain the completion callbacks for invocation after publish.
    pub fn take_completions(&mut self) -> Vec<CompletionCallback> {
        std::mem::take(&mut self.completions)
    }
}

impl fmt::Debug for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSet")
            .field("updated", &self.updated)
            .field("deleted", &self.deleted)
            .field("parents", &self.parents)
            .field("tables", &self.tables)
            .field("completions", &self.completions.len())
            .field("last_error", &self.last_error)
            .finish()
    }
}
