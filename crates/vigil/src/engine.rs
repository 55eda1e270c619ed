//! The engine: a dedicated consumer thread that turns committed change
//! sets into snapshot publishes.
//!
//! One std thread drives a tokio current-thread runtime. Everything that
//! matters for ordering lives on that thread: the subscriber registry,
//! the publish scheduler, the coalescing buffer, and the long-lived
//! [`SnapshotReader`]. The only cross-thread boundary is an unbounded
//! mpsc channel of [`Control`] messages, so writers never block on the
//! consumer.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, error, warn};

use vigil_core::{ChangeSet, CommitSink, EngineConfig, Result, VigilError};
use vigil_sqlite::{CheckpointCoordinator, CheckpointHandle, SnapshotReader, Storage};

use crate::scheduler::PublishScheduler;
use crate::subscriber::{Subscriber, SubscriberEvent, SubscriberRegistry};

enum Control {
    Changes(ChangeSet),
    Register(Weak<dyn Subscriber>),
    Unregister(Weak<dyn Subscriber>),
    ExternalWrite,
    ForcePublish,
    Foreground(bool),
    Shutdown,
}

/// [`CommitSink`] handed to [`Storage`]; forwards committed change sets
/// onto the consumer thread.
struct EngineSink {
    tx: UnboundedSender<Control>,
}

impl CommitSink for EngineSink {
    fn submit(&self, changes: ChangeSet) {
        if self.tx.send(Control::Changes(changes)).is_err() {
            debug!("engine is not running; dropping change set");
        }
    }
}

/// Handle to a running consumer thread.
///
/// Cheap to clone the sender inside; the handle itself owns the thread
/// and joins it on [`shutdown`](Engine::shutdown) or drop.
pub struct Engine {
    tx: UnboundedSender<Control>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Spawns the consumer thread and wires `storage` to it.
    ///
    /// Opens two companion connections up front: one pinned by the
    /// snapshot reader, one owned by the checkpoint coordinator.
    pub fn start(storage: &Arc<Storage>, config: EngineConfig) -> Result<Engine> {
        let snapshot_conn = storage.open_companion_connection()?;
        let checkpoint_conn = storage.open_companion_connection()?;
        let migrating = storage.migration_flag();

        let (tx, rx) = mpsc::unbounded_channel();
        let join = std::thread::Builder::new()
            .name("vigil-consumer".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!(error = %e, "failed to build consumer runtime");
                        return;
                    }
                };
                runtime.block_on(consumer_loop(
                    rx,
                    snapshot_conn,
                    checkpoint_conn,
                    migrating,
                    config,
                ));
            })
            .map_err(|e| VigilError::InvalidState(format!("failed to spawn consumer: {e}")))?;

        storage.attach_sink(Arc::new(EngineSink { tx: tx.clone() }));
        Ok(Engine {
            tx,
            join: Mutex::new(Some(join)),
        })
    }

    /// Registers a subscriber. Held weakly; dropping the `Arc` is enough
    /// to stop notifications.
    pub fn register<S: Subscriber + 'static>(&self, subscriber: &Arc<S>) {
        let weak: Weak<S> = Arc::downgrade(subscriber);
        let weak: Weak<dyn Subscriber> = weak;
        let _ = self.tx.send(Control::Register(weak));
    }

    pub fn unregister<S: Subscriber + 'static>(&self, subscriber: &Arc<S>) {
        let weak: Weak<S> = Arc::downgrade(subscriber);
        let weak: Weak<dyn Subscriber> = weak;
        let _ = self.tx.send(Control::Unregister(weak));
    }

    /// Reports a write made by another process or connection. Signals
    /// within the debounce window collapse into one
    /// [`SubscriberEvent::DidUpdateExternally`].
    pub fn signal_external_write(&self) {
        let _ = self.tx.send(Control::ExternalWrite);
    }

    /// Publishes on the next loop turn regardless of cadence, even when
    /// the buffer is empty.
    pub fn force_publish(&self) {
        let _ = self.tx.send(Control::ForcePublish);
    }

    /// Foregrounded engines adapt their cadence to load; backgrounded
    /// engines stay at the slow interval.
    pub fn set_foregrounded(&self, foregrounded: bool) {
        let _ = self.tx.send(Control::Foreground(foregrounded));
    }

    /// Flushes any buffered changes with a final publish, then stops the
    /// consumer thread and joins it.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Control::Shutdown);
        if let Some(join) = self.join.lock().take() {
            if join.join().is_err() {
                error!("consumer thread panicked");
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Consumer-thread state, built once the runtime is up.
struct Consumer {
    registry: SubscriberRegistry,
    scheduler: PublishScheduler,
    snapshot: SnapshotReader,
    checkpoint: CheckpointHandle,
    buffer: Option<ChangeSet>,
    external_deadline: Option<Instant>,
    external_debounce: Duration,
}

async fn consumer_loop(
    mut rx: mpsc::UnboundedReceiver<Control>,
    snapshot_conn: rusqlite::Connection,
    checkpoint_conn: rusqlite::Connection,
    migrating: Arc<AtomicBool>,
    config: EngineConfig,
) {
    let coordinator = CheckpointCoordinator::spawn(checkpoint_conn, config.checkpoint, migrating);
    let snapshot = match SnapshotReader::open(snapshot_conn) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(error = %e, "failed to open snapshot reader; engine not running");
            return;
        }
    };
    let mut consumer = Consumer {
        registry: SubscriberRegistry::new(),
        scheduler: PublishScheduler::new(config.scheduler),
        snapshot,
        checkpoint: coordinator.handle(),
        buffer: None,
        external_deadline: None,
        external_debounce: config.external_debounce,
    };

    const IDLE: Duration = Duration::from_secs(3600);
    loop {
        let now = Instant::now();
        let tick_in = if consumer.buffer.is_some() {
            consumer.scheduler.until_next_tick(now)
        } else {
            IDLE
        };
        let external_in = consumer
            .external_deadline
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or(IDLE);

        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(Control::Changes(changes)) => consumer.on_changes(changes),
                    Some(Control::Register(weak)) => consumer.registry.register(weak),
                    Some(Control::Unregister(weak)) => consumer.registry.unregister(&weak),
                    Some(Control::ExternalWrite) => consumer.on_external_write(),
                    Some(Control::ForcePublish) => consumer.publish(),
                    Some(Control::Foreground(fg)) => consumer.scheduler.set_foregrounded(fg),
                    Some(Control::Shutdown) | None => break,
                }
            }
            _ = tokio::time::sleep(tick_in), if consumer.buffer.is_some() => {
                consumer.scheduler.on_tick(Instant::now());
                if consumer.scheduler.may_publish(Instant::now()) {
                    consumer.publish();
                }
            }
            _ = tokio::time::sleep(external_in), if consumer.external_deadline.is_some() => {
                consumer.external_deadline = None;
                consumer.fire_external();
            }
        }
    }

    // Final flush so buffered changes and completions are not lost. The
    // coordinator drops after the consumer and joins its thread.
    if consumer.buffer.is_some() {
        consumer.publish();
    }
}

impl Consumer {
    fn on_changes(&mut self, changes: ChangeSet) {
        // Checkpoint attempts ride alongside hand-off, not publish.
        self.checkpoint.nudge();
        let now = Instant::now();
        match &mut self.buffer {
            Some(buffered) => buffered.merge(changes),
            None => {
                self.scheduler.arm(now);
                self.buffer = Some(changes);
            }
        }
        if self.scheduler.may_publish(now) {
            self.publish();
        }
    }

    fn on_external_write(&mut self) {
        if self.external_deadline.is_none() {
            self.external_deadline = Some(Instant::now() + self.external_debounce);
        }
    }

    /// No fast-forward here: the external writer gives us no change set,
    /// so subscribers must treat everything as changed anyway. The
    /// snapshot advances with the next ordinary publish.
    fn fire_external(&mut self) {
        self.registry
            .dispatch(&self.snapshot, SubscriberEvent::DidUpdateExternally);
    }

    /// Advances the snapshot and notifies subscribers. Errored change
    /// sets and fast-forward failures both degrade to a reset.
    fn publish(&mut self) {
        let mut changes = self.buffer.take().unwrap_or_default();
        self.scheduler.disarm();

        self.registry
            .dispatch(&self.snapshot, SubscriberEvent::WillUpdate);
        let forwarded = self.snapshot.fast_forward(Some(&self.checkpoint));

        if changes.is_errored() || forwarded.is_err() {
            if let Err(e) = forwarded {
                error!(error = %e, "snapshot fast-forward failed");
            }
            if let Some(e) = changes.last_error() {
                warn!(error = %e, "publishing reset after tracking failure");
            }
            self.registry
                .dispatch(&self.snapshot, SubscriberEvent::DidReset);
        } else {
            self.registry
                .dispatch(&self.snapshot, SubscriberEvent::DidUpdate(&changes));
        }

        for completion in changes.take_completions() {
            completion();
        }
        self.scheduler.note_publish(Instant::now());
    }
}
