//! Vigil: commit-coupled change notification and snapshot publishing
//! over SQLite.
//!
//! Wire a [`Storage`](vigil_sqlite::Storage) to an [`Engine`] and every
//! committed write transaction turns into a coalesced [`ChangeSet`]
//! delivered to [`Subscriber`]s on one dedicated consumer thread,
//! together with a read snapshot that is fast-forwarded to cover exactly
//! what the change set describes.
//!
//! - [`Engine`] owns the consumer thread, the publish cadence, and the
//!   checkpoint coordinator.
//! - [`Subscriber`] receives [`SubscriberEvent`]s with the engine's
//!   [`SnapshotReader`](vigil_sqlite::SnapshotReader).
//! - Configuration comes from [`vigil_core::EngineConfig`].

pub mod engine;
mod scheduler;
pub mod subscriber;

pub use engine::Engine;
pub use subscriber::{Subscriber, SubscriberEvent};

pub use vigil_core::{
    ChangeSet, EngineConfig, EntityKind, Result, SchedulerConfig, StorageConfig, TableRegistry,
    TableSpec, VigilError,
};
pub use vigil_sqlite::{SnapshotReader, Storage};
