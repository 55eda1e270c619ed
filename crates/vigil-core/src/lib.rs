//! Vigil core: types and policy for the change-notification engine
//!
//! This crate defines the in-memory half of Vigil:
//! - Change-set model: per-transaction accumulation → per-commit resolution
//!   → coalesced publish
//! - Table registry: physical table name → tracked entity kind, with
//!   exclusion rules for FTS shadow tables and denied tables
//! - Change collector: mutation accumulation under the writer's lock
//! - Cadence policy: the adaptive publish-interval interpolation
//! - The `CommitSink` seam crossed by the writer → consumer hand-off
//!
//! The SQLite adapter lives in `vigil-sqlite`; the engine (consumer thread,
//! scheduler, subscribers) lives in `vigil`.

pub mod cadence;
pub mod change_set;
pub mod collector;
pub mod config;
pub mod error;
pub mod registry;
pub mod sink;

pub use change_set::{
    ChangeSet, CompletionCallback, Identifier, MutationEvent, MutationKind, PendingChangeSet,
};
pub use collector::ChangeCollector;
pub use config::{CheckpointPolicy, EngineConfig, SchedulerConfig, StorageConfig};
pub use error::{Result, VigilError};
pub use registry::{EntityKind, ParentLink, TableClass, TableRegistry, TableSpec};
pub use sink::CommitSink;
