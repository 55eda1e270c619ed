//! Seam between the write path and the consumer thread.

use crate::change_set::ChangeSet;

/// Receives a finalized change set from the writer's commit path.
///
/// `submit` is called with the writer's exclusive lock still held, possibly
/// on a background thread; implementations must hand off without blocking
/// (the engine backs this with an unbounded channel).
pub trait CommitSink: Send + Sync {
    fn submit(&self, changes: ChangeSet);
}
