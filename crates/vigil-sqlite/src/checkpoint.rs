//! Opportunistic WAL checkpointing, off the write path.
//!
//! The coordinator runs on its own thread with its own connection so
//! checkpoint I/O never contends with ordinary reads or writes. Nudges are
//! non-blocking and coalesce; the thread rate-limits attempts, runs a cheap
//! passive checkpoint by default, and escalates deterministically every Nth
//! attempt to a blocking truncating checkpoint bounded by a short busy
//! timeout. A timed-out checkpoint gives up silently and retries on a later
//! nudge; it never errors to callers.

use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, trace};
use vigil_core::CheckpointPolicy;

enum Msg {
    Nudge,
    Shutdown,
}

/// Non-blocking handle for requesting a checkpoint attempt.
#[derive(Clone)]
pub struct CheckpointHandle {
    tx: Sender<Msg>,
}

impl CheckpointHandle {
    pub fn nudge(&self) {
        // Coordinator gone means shutdown; nothing to do.
        let _ = self.tx.send(Msg::Nudge);
    }
}

/// Owns the checkpoint thread; dropping it shuts the thread down.
pub struct CheckpointCoordinator {
    handle: CheckpointHandle,
    join: Option<JoinHandle<()>>,
}

impl CheckpointCoordinator {
    /// Spawn the coordinator over its own connection. `migrating` disables
    /// checkpointing entirely while set (store transfer in progress).
    pub fn spawn(
        conn: Connection,
        policy: CheckpointPolicy,
        migrating: Arc<AtomicBool>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let join = std::thread::Builder::new()
            .name("vigil-checkpoint".into())
            .spawn(move || run(conn, policy, migrating, rx))
            .expect("failed to spawn checkpoint thread");
        Self {
            handle: CheckpointHandle { tx },
            join: Some(join),
        }
    }

    pub fn handle(&self) -> CheckpointHandle {
        self.handle.clone()
    }
}

impl Drop for CheckpointCoordinator {
    fn drop(&mut self) {
        // Cloned handles may outlive us, so closing the channel is not
        // enough; an explicit shutdown message unblocks the thread.
        let _ = self.handle.tx.send(Msg::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run(conn: Connection, policy: CheckpointPolicy, migrating: Arc<AtomicBool>, rx: Receiver<Msg>) {
    let _ = conn.busy_timeout(policy.busy_timeout);
    let mut last_attempt: Option<Instant> = None;
    let mut attempts: u64 = 0;

    while let Ok(msg) = rx.recv() {
        if matches!(msg, Msg::Shutdown) {
            return;
        }
        // Coalesce the backlog; one attempt serves every queued nudge.
        loop {
            match rx.try_recv() {
                Ok(Msg::Nudge) => continue,
                Ok(Msg::Shutdown) => return,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        if migrating.load(Ordering::SeqCst) {
            trace!("checkpoint skipped: migration in progress");
            continue;
        }
        if let Some(last) = last_attempt {
            if last.elapsed() < policy.min_interval {
                continue;
            }
        }
        last_attempt = Some(Instant::now());
        attempts += 1;

        let blocking = policy.blocking_every > 0 && attempts % u64::from(policy.blocking_every) == 0;
        attempt(&conn, blocking);
    }
}

/// One checkpoint attempt. `PASSIVE` never takes locks a reader or writer
/// would wait on; `TRUNCATE` merges and resets the WAL but is bounded by the
/// connection's busy timeout, after which it gives up silently.
fn attempt(conn: &Connection, blocking: bool) {
    let mode = if blocking { "TRUNCATE" } else { "PASSIVE" };
    let result = conn.query_row(&format!("PRAGMA wal_checkpoint({mode})"), [], |row| {
        let busy: i64 = row.get(0)?;
        let wal_pages: i64 = row.get(1)?;
        let checkpointed: i64 = row.get(2)?;
        Ok((busy, wal_pages, checkpointed))
    });

    match result {
        Ok((busy, wal_pages, checkpointed)) => {
            if busy != 0 {
                trace!(mode, "checkpoint could not complete; will retry later");
            } else {
                debug!(mode, wal_pages, checkpointed, "wal checkpoint");
            }
        }
        Err(e) => {
            // SQLITE_BUSY on the blocking path lands here once the busy
            // timeout expires. Swallowed; a later nudge retries.
            trace!(mode, error = %e, "checkpoint attempt failed");
        }
    }
}
