//! Subscriber trait and the weak-reference registry the consumer loop
//! dispatches through.
//!
//! Subscribers are held weakly so a dropped subscriber never has to be
//! unregistered explicitly; dead entries are pruned on the next dispatch.
//! All dispatch happens on the consumer thread, with the engine's
//! [`SnapshotReader`] passed in so callbacks read from the published
//! snapshot and nothing newer.

use std::sync::Weak;

use vigil_core::ChangeSet;
use vigil_sqlite::SnapshotReader;

/// Notification delivered to every registered [`Subscriber`].
#[derive(Clone, Copy)]
pub enum SubscriberEvent<'a> {
    /// The snapshot is about to advance. Still reads the previous snapshot.
    WillUpdate,
    /// The snapshot advanced; the change set covers everything since the
    /// last publish.
    DidUpdate(&'a ChangeSet),
    /// A write from outside this process was observed. No change set is
    /// available; reload whatever matters.
    DidUpdateExternally,
    /// Change tracking lost fidelity (overflow or a resolution failure).
    /// The snapshot advanced but the change set is unusable; reload.
    DidReset,
}

/// Receives publish notifications on the consumer thread.
///
/// `on_event` must not block for long; it runs on the single thread that
/// drives every subscriber and the publish cadence.
pub trait Subscriber: Send + Sync {
    fn on_event(&self, snapshot: &SnapshotReader, event: SubscriberEvent<'_>);
}

/// Consumer-thread-owned list of weak subscriber handles.
pub(crate) struct SubscriberRegistry {
    subscribers: Vec<Weak<dyn Subscriber>>,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub(crate) fn register(&mut self, subscriber: Weak<dyn Subscriber>) {
        self.subscribers.retain(|w| w.strong_count() > 0);
        if !self
            .subscribers
            .iter()
            .any(|w| same_target(w, &subscriber))
        {
            self.subscribers.push(subscriber);
        }
    }

    pub(crate) fn unregister(&mut self, subscriber: &Weak<dyn Subscriber>) {
        self.subscribers.retain(|w| !same_target(w, subscriber));
    }

    /// Delivers `event` to every live subscriber, dropping dead entries.
    pub(crate) fn dispatch(&mut self, snapshot: &SnapshotReader, event: SubscriberEvent<'_>) {
        self.subscribers.retain(|weak| match weak.upgrade() {
            Some(subscriber) => {
                subscriber.on_event(snapshot, event);
                true
            }
            None => false,
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }
}

fn same_target(a: &Weak<dyn Subscriber>, b: &Weak<dyn Subscriber>) -> bool {
    // Compare allocation addresses only; vtable pointers for the same
    // target can differ across codegen units.
    a.as_ptr() as *const () == b.as_ptr() as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use rusqlite::Connection;

    struct Counting {
        calls: AtomicUsize,
    }

    impl Subscriber for Counting {
        fn on_event(&self, _snapshot: &SnapshotReader, _event: SubscriberEvent<'_>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn snapshot() -> SnapshotReader {
        let conn = Connection::open_in_memory().unwrap();
        SnapshotReader::open(conn).unwrap()
    }

    #[test]
    fn register_is_idempotent_per_subscriber() {
        let sub: Arc<dyn Subscriber> = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let mut registry = SubscriberRegistry::new();
        registry.register(Arc::downgrade(&sub));
        registry.register(Arc::downgrade(&sub));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropped_subscribers_are_pruned_on_dispatch() {
        let keep: Arc<dyn Subscriber> = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let gone: Arc<dyn Subscriber> = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let mut registry = SubscriberRegistry::new();
        registry.register(Arc::downgrade(&keep));
        registry.register(Arc::downgrade(&gone));
        drop(gone);

        let snapshot = snapshot();
        registry.dispatch(&snapshot, SubscriberEvent::WillUpdate);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_removes_only_the_matching_subscriber() {
        let a = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let b = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let a_dyn: Arc<dyn Subscriber> = a.clone();
        let b_dyn: Arc<dyn Subscriber> = b.clone();
        let mut registry = SubscriberRegistry::new();
        registry.register(Arc::downgrade(&a_dyn));
        registry.register(Arc::downgrade(&b_dyn));
        registry.unregister(&Arc::downgrade(&a_dyn));
        assert_eq!(registry.len(), 1);

        let snapshot = snapshot();
        registry.dispatch(&snapshot, SubscriberEvent::DidUpdateExternally);
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }
}
