//! The long-lived consistent read snapshot and its publish-time fast-forward.

use crate::checkpoint::CheckpointHandle;
use rusqlite::Connection;
use tracing::trace;
use vigil_core::{Result, VigilError};

/// One isolated point-in-time read view of the store.
///
/// Owns its own connection with a long-lived read transaction. The type is
/// `!Sync` and is constructed on the consumer thread, so the end-old/begin-new
/// sequence in [`fast_forward`](Self::fast_forward) cannot interleave with a
/// read: the snapshot advances only on the consumer thread, synchronously
/// with publish.
pub struct SnapshotReader {
    conn: Connection,
    in_txn: bool,
}

impl SnapshotReader {
    /// Take ownership of a read connection and open the initial read
    /// transaction.
    pub fn open(conn: Connection) -> Result<Self> {
        let mut reader = Self {
            conn,
            in_txn: false,
        };
        reader.begin()?;
        Ok(reader)
    }

    /// Run a read against the current snapshot.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        debug_assert!(self.in_txn, "snapshot read outside a read transaction");
        f(&self.conn).map_err(|e| VigilError::Storage(e.to_string()))
    }

    /// Advance to the latest committed state: end the current read
    /// transaction, nudge the checkpointer while no read lock is held, then
    /// open a fresh transaction and force acquisition of its consistent view.
    pub fn fast_forward(&mut self, checkpoint: Option<&CheckpointHandle>) -> Result<()> {
        self.end()?;
        if let Some(checkpoint) = checkpoint {
            checkpoint.nudge();
        }
        self.begin()?;
        trace!("snapshot fast-forwarded");
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| VigilError::Storage(e.to_string()))?;
        self.in_txn = true;
        // A deferred BEGIN takes no locks until the first read; this no-op
        // read pins the snapshot now, atomically with the publish.
        self.conn
            .query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(|e| VigilError::Storage(e.to_string()))?;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if self.in_txn {
            self.conn
                .execute_batch("COMMIT")
                .map_err(|e| VigilError::Storage(e.to_string()))?;
            self.in_txn = false;
        }
        Ok(())
    }
}

impl Drop for SnapshotReader {
    fn drop(&mut self) {
        let _ = self.end();
    }
}
