//! In-process publish/subscribe
//!
//! Used for three fan-outs: "data changed" notifications after a pull,
//! connectivity status changes, and structured sync failure events.
//! Subscribers run synchronously on the publishing task, in registration
//! order. A panicking subscriber is logged and skipped so the remaining
//! subscribers still run.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct BusInner<T> {
    next_id: u64,
    subscribers: Vec<(u64, Callback<T>)>,
}

/// Cloneable handle to a subscriber list
pub struct Bus<T> {
    inner: Arc<Mutex<BusInner<T>>>,
}

impl<T> Clone for Bus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Bus<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Register a callback. Keep the returned handle to unsubscribe later.
    pub fn subscribe<F>(&self, callback: F) -> Subscription<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id = inner.next_id.wrapping_add(1);
        inner.subscribers.push((id, Arc::new(callback)));

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `value` to every subscriber. Returns how many completed
    /// without panicking.
    pub fn publish(&self, value: &T) -> usize {
        // Snapshot so callbacks may subscribe/unsubscribe without deadlocking
        let subscribers: Vec<(u64, Callback<T>)> = self.inner.lock().subscribers.clone();

        let mut delivered = 0;
        for (id, callback) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::warn!(subscriber_id = id, "Subscriber panicked; continuing");
                }
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`Bus::subscribe`]
pub struct Subscription<T> {
    id: u64,
    bus: Weak<Mutex<BusInner<T>>>,
}

impl<T> Subscription<T> {
    /// Remove the callback. A no-op if the bus is already gone.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.lock().subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Observable outcome of background sync work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A reachability check against `base` failed
    ProbeFailed { base: String, error: String },
    /// A full snapshot fetch failed
    PullFailed { error: String },
    /// A full or batch push failed
    PushFailed { error: String },
    /// A single-entity propagation failed
    PropagationFailed {
        entity: &'static str,
        id: String,
        error: String,
    },
    /// Local state was replaced from the remote snapshot
    Reconciled { companies: usize, logs: usize },
    /// A cache key held unreadable JSON and was reset to empty
    CacheCorrupted { key: String },
    /// Writing the local cache failed
    PersistFailed { error: String },
}
