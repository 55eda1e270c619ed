//! Rowid → stable identifier resolution at commit time.
//!
//! Rowids are only meaningful while the commit transaction is still open, so
//! resolution must run between the caller's last write and the COMMIT. All
//! unresolved rowids for a table are batched into a single query; captures
//! made at append time from an in-memory model skip the query entirely.

use rusqlite::Connection;
use std::collections::HashSet;
use vigil_core::{ChangeSet, PendingChangeSet, TableRegistry, TableSpec, VigilError};

/// Resolve a pending change set against the still-open commit transaction.
///
/// Either fully succeeds or fails as a whole: the caller turns any error into
/// an errored change set (never a partially-resolved one). Two ceiling checks
/// bound the work, one before the query on raw counts and one after on the
/// resolved identifier total.
pub fn resolve(
    conn: &Connection,
    registry: &TableRegistry,
    pending: PendingChangeSet,
    ceiling: usize,
) -> Result<ChangeSet, VigilError> {
    let pre_count = pending.pre_resolution_count();
    if pre_count > ceiling {
        return Err(VigilError::ChangeSetTooLarge {
            count: pre_count,
            ceiling,
        });
    }

    let mut out = ChangeSet::new();
    for table in &pending.tables {
        out.insert_table(table.clone());
    }

    // Locally-captured deletes and explicit touches bypass the query.
    for (kind, ids) in &pending.deleted {
        for id in ids {
            out.insert_deleted(*kind, id.clone());
        }
    }
    for (kind, ids) in &pending.touched {
        for id in ids {
            out.insert_updated(*kind, id.clone());
        }
    }

    for (kind, rowids) in &pending.rows {
        let known = pending.known.get(kind);
        let mut unresolved: Vec<i64> = Vec::new();
        for rowid in rowids {
            match known.and_then(|m| m.get(rowid)) {
                Some(id) => out.insert_updated(*kind, id.clone()),
                None => unresolved.push(*rowid),
            }
        }
        if !unresolved.is_empty() {
            // A kind present in the pending set always has a registry spec;
            // the collector only admits rows through the registry.
            let spec = registry.spec_for_kind(*kind).ok_or_else(|| {
                VigilError::InvalidState(format!("no table spec for tracked kind {kind}"))
            })?;
            query_identifiers(conn, spec, &unresolved, &mut out)?;
        }
    }

    // Deleted rowids resolve only through local captures; anything else has
    // already degraded to the coarse table touch recorded above.
    for (kind, rowids) in &pending.deleted_rows {
        if let Some(known) = pending.known.get(kind) {
            for rowid in rowids {
                if let Some(id) = known.get(rowid) {
                    out.insert_deleted(*kind, id.clone());
                }
            }
        }
    }

    let count = out.identifier_count();
    if count > ceiling {
        return Err(VigilError::ChangeSetTooLarge { count, ceiling });
    }
    Ok(out)
}

/// One batched query per table: `SELECT rowid, id[, parent] WHERE rowid IN (...)`.
fn query_identifiers(
    conn: &Connection,
    spec: &TableSpec,
    rowids: &[i64],
    out: &mut ChangeSet,
) -> Result<(), VigilError> {
    let placeholders = vec!["?"; rowids.len()].join(", ");
    let sql = match &spec.parent {
        Some(parent) => format!(
            "SELECT rowid, {}, {} FROM {} WHERE rowid IN ({placeholders})",
            spec.id_column, parent.column, spec.table
        ),
        None => format!(
            "SELECT rowid, {} FROM {} WHERE rowid IN ({placeholders})",
            spec.id_column, spec.table
        ),
    };

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| VigilError::ResolutionQueryFailed(e.to_string()))?;
    let mut seen: HashSet<i64> = HashSet::with_capacity(rowids.len());
    let mut rows = stmt
        .query(rusqlite::params_from_iter(rowids.iter()))
        .map_err(|e| VigilError::ResolutionQueryFailed(e.to_string()))?;

    while let Some(row) = rows
        .next()
        .map_err(|e| VigilError::ResolutionQueryFailed(e.to_string()))?
    {
        let rowid: i64 = row
            .get(0)
            .map_err(|e| VigilError::ResolutionQueryFailed(e.to_string()))?;
        let id: String = row
            .get(1)
            .map_err(|e| VigilError::ResolutionQueryFailed(e.to_string()))?;
        seen.insert(rowid);
        out.insert_updated(spec.kind, id);
        if let Some(parent) = &spec.parent {
            let parent_id: Option<String> = row
                .get(2)
                .map_err(|e| VigilError::ResolutionQueryFailed(e.to_string()))?;
            if let Some(parent_id) = parent_id {
                out.insert_updated(parent.kind, parent_id.clone());
                out.insert_parent(spec.kind, parent_id);
            }
        }
    }

    // Rows touched then deleted inside the same transaction come back empty;
    // the coarse table touch already covers them.
    if seen.len() < rowids.len() {
        tracing::debug!(
            table = spec.table,
            missing = rowids.len() - seen.len(),
            "touched rows no longer present at resolution"
        );
    }
    Ok(())
}
