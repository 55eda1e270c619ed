//! Static mapping from physical table names to tracked entity kinds.
//!
//! The registry is the single source of truth for which tables feed the
//! change collector: tracked tables map to an [`EntityKind`], denied tables
//! and full-text-search shadow tables are dropped up front, and anything else
//! degrades to a coarse table-level touch.

use std::collections::{HashMap, HashSet};
use std::fmt;

/// A tracked logical entity class (e.g. `threads`, `interactions`).
///
/// Kinds are lightweight tags defined by the embedding application; equality
/// is by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKind(pub &'static str);

impl EntityKind {
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Links a child table's rows to a parent collection, so a change to a child
/// entity also surfaces the parent's stable identifier (e.g. an interaction
/// change surfaces its thread's identifier for list views).
#[derive(Debug, Clone, Copy)]
pub struct ParentLink {
    /// The parent entity kind the linked column resolves into.
    pub kind: EntityKind,
    /// Column on the child table holding the parent's stable identifier.
    pub column: &'static str,
}

/// One tracked table.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    /// Physical table name.
    pub table: &'static str,
    /// Entity kind its rows belong to.
    pub kind: EntityKind,
    /// Column holding the stable identifier (never the rowid).
    pub id_column: &'static str,
    /// Optional parent-collection link.
    pub parent: Option<ParentLink>,
}

impl TableSpec {
    pub fn new(table: &'static str, kind: EntityKind, id_column: &'static str) -> Self {
        Self {
            table,
            kind,
            id_column,
            parent: None,
        }
    }

    pub fn with_parent(mut self, kind: EntityKind, column: &'static str) -> Self {
        self.parent = Some(ParentLink { kind, column });
        self
    }
}

/// Classification of a table name observed on the write path.
#[derive(Debug, Clone, Copy)]
pub enum TableClass<'a> {
    /// Feeds the per-row collector.
    Tracked(&'a TableSpec),
    /// Explicitly denied or an FTS shadow table; dropped entirely.
    Excluded,
    /// Not a model table we know about; recorded as a coarse table touch.
    Unmapped,
}

/// Registry of tracked tables plus exclusion rules.
pub struct TableRegistry {
    specs: Vec<TableSpec>,
    by_table: HashMap<&'static str, usize>,
    by_kind: HashMap<EntityKind, usize>,
    denied: HashSet<&'static str>,
}

/// Tables SQLite maintains internally; never model data.
const DEFAULT_DENY: &[&str] = &["sqlite_sequence", "sqlite_stat1", "sqlite_stat4"];

impl TableRegistry {
    pub fn builder() -> TableRegistryBuilder {
        TableRegistryBuilder {
            specs: Vec::new(),
            denied: DEFAULT_DENY.iter().copied().collect(),
        }
    }

    /// Classify a table name observed by the mutation hook.
    pub fn classify(&self, table: &str) -> TableClass<'_> {
        if self.denied.contains(table) || is_fts_shadow(table) {
            return TableClass::Excluded;
        }
        match self.by_table.get(table) {
            Some(&idx) => TableClass::Tracked(&self.specs[idx]),
            None => TableClass::Unmapped,
        }
    }

    /// Look up the spec for an entity kind.
    pub fn spec_for_kind(&self, kind: EntityKind) -> Option<&TableSpec> {
        self.by_kind.get(&kind).map(|&idx| &self.specs[idx])
    }

    /// All tracked table specs.
    pub fn specs(&self) -> &[TableSpec] {
        &self.specs
    }
}

/// FTS5/FTS4 shadow tables carry the virtual table's name plus a reserved
/// suffix; their rowids are index internals, not model rows.
fn is_fts_shadow(table: &str) -> bool {
    const SUFFIXES: &[&str] = &[
        "_fts", "_fts_data", "_fts_idx", "_fts_docsize", "_fts_config", "_fts_content",
        "_fts_segments", "_fts_segdir",
    ];
    SUFFIXES.iter().any(|s| table.ends_with(s))
}

pub struct TableRegistryBuilder {
    specs: Vec<TableSpec>,
    denied: HashSet<&'static str>,
}

impl TableRegistryBuilder {
    /// Track a table.
    pub fn track(mut self, spec: TableSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Add a table to the deny list.
    pub fn deny(mut self, table: &'static str) -> Self {
        self.denied.insert(table);
        self
    }

    pub fn build(self) -> TableRegistry {
        let by_table = self
            .specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.table, i))
            .collect();
        let by_kind = self
            .specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.kind, i))
            .collect();
        TableRegistry {
            specs: self.specs,
            by_table,
            by_kind,
            denied: self.denied,
        }
    }
}
