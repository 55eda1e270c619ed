//! Per-transaction mutation accumulator.
//!
//! The collector sits behind the storage adapter's mutation hook and the
//! write-transaction touch API. Its contract: mutation methods are callable
//! only while the writer's exclusive lock is held, on whichever thread
//! performs the write. The write-transaction context enforces this at the
//! type level (it cannot exist without the lock); the `active` flag is a
//! debug-asserted backstop for the hook path.

use crate::change_set::{MutationEvent, MutationKind, PendingChangeSet};
use crate::registry::{EntityKind, TableClass, TableRegistry};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

pub struct ChangeCollector {
    registry: Arc<TableRegistry>,
    pending: Mutex<PendingChangeSet>,
    active: AtomicBool,
}

impl ChangeCollector {
    pub fn new(registry: Arc<TableRegistry>) -> Self {
        Self {
            registry,
            pending: Mutex::new(PendingChangeSet::default()),
            active: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    /// Transaction opened; start collecting.
    pub fn begin(&self) {
        let was_active = self.active.swap(true, Ordering::SeqCst);
        debug_assert!(
            !was_active,
            "collector begun while a write transaction is already open"
        );
        self.pending.lock().clear();
    }

    /// Transaction still open; hand the pending set to the resolver.
    pub fn take(&self) -> PendingChangeSet {
        self.assert_active();
        std::mem::take(&mut *self.pending.lock())
    }

    /// Commit completed.
    pub fn finish(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.pending.lock().clear();
    }

    /// Rollback: discard everything collected in this transaction.
    pub fn abort(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.pending.lock().clear();
    }

    /// Record one intercepted write from the mutation hook.
    pub fn record_mutation(&self, event: MutationEvent<'_>) {
        self.assert_active();
        let mut pending = self.pending.lock();
        match self.registry.classify(event.table) {
            TableClass::Excluded => {}
            TableClass::Unmapped => {
                warn!(table = event.table, "mutation on unmapped table");
                debug_assert!(false, "mutation on unmapped table {}", event.table);
                pending.tables.insert(event.table.to_string());
            }
            TableClass::Tracked(spec) => {
                pending.tables.insert(event.table.to_string());
                match event.kind {
                    MutationKind::Insert | MutationKind::Update => {
                        pending.rows.entry(spec.kind).or_default().insert(event.rowid);
                    }
                    MutationKind::Delete => {
                        // The row is gone; resolution can only come from a
                        // capture made before the delete.
                        pending.rows.entry(spec.kind).or_default().remove(&event.rowid);
                        pending
                            .deleted_rows
                            .entry(spec.kind)
                            .or_default()
                            .insert(event.rowid);
                    }
                }
            }
        }
    }

    /// Coarse table touch with no row information.
    pub fn record_table(&self, table: &str) {
        self.assert_active();
        self.pending.lock().tables.insert(table.to_string());
    }

    /// Capture a rowid → identifier mapping known from an in-memory model,
    /// so the resolver can skip the query for this row.
    pub fn record_known(&self, kind: EntityKind, rowid: i64, identifier: String) {
        self.assert_active();
        let mut pending = self.pending.lock();
        pending.rows.entry(kind).or_default().insert(rowid);
        pending.known.entry(kind).or_default().insert(rowid, identifier);
    }

    /// Explicit touch: force observers to treat the entity as updated even
    /// though no column changed.
    pub fn record_touch(&self, kind: EntityKind, identifier: String) {
        self.assert_active();
        let mut pending = self.pending.lock();
        if let Some(spec) = self.registry.spec_for_kind(kind) {
            pending.tables.insert(spec.table.to_string());
        }
        pending.touched.entry(kind).or_default().insert(identifier);
    }

    /// Capture a delete whose identifier is known locally.
    pub fn record_delete(&self, kind: EntityKind, identifier: String) {
        self.assert_active();
        let mut pending = self.pending.lock();
        if let Some(spec) = self.registry.spec_for_kind(kind) {
            pending.tables.insert(spec.table.to_string());
        }
        pending.deleted.entry(kind).or_default().insert(identifier);
    }

    fn assert_active(&self) {
        debug_assert!(
            self.active.load(Ordering::SeqCst),
            "collector touched outside an open write transaction"
        );
    }
}
