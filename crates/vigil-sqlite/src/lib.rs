//! SQLite storage adapter for the Vigil change-notification engine.
//!
//! Pieces living on this side of the seam:
//! - [`Storage`]: the single write connection behind the writer's exclusive
//!   lock, with the update hook feeding the change collector
//! - [`WriteTransaction`]: the transaction context carrying the touch and
//!   capture APIs
//! - [`resolver`]: batched rowid → stable-identifier resolution inside the
//!   still-open commit transaction
//! - [`SnapshotReader`]: the long-lived consistent read view, advanced only
//!   at publish time
//! - [`CheckpointCoordinator`]: opportunistic WAL checkpointing on a
//!   dedicated thread, off the write path

pub mod checkpoint;
pub mod resolver;
pub mod snapshot;
pub mod storage;
pub mod txn;

pub use checkpoint::{CheckpointCoordinator, CheckpointHandle};
pub use snapshot::SnapshotReader;
pub use storage::Storage;
pub use txn::WriteTransaction;
