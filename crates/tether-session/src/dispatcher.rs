//! Fan-out of pushed events to registered listeners.
//!
//! Listeners are kept in registration order. Dispatch takes a snapshot of
//! the list before invoking anyone, so a listener may add or remove
//! listeners (itself included) without affecting the event in flight. A
//! panicking listener is logged and counted; later listeners still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::metrics::SESSION_LISTENER_PANICS_TOTAL;

/// A server-pushed event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PushEvent {
    /// Event name.
    pub topic: String,
    /// Event payload (`null` when the frame carried none).
    pub payload: Value,
}

/// Listener callback.
pub type Listener = Arc<dyn Fn(&PushEvent) + Send + Sync>;

/// Identity of a registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registry {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

/// Ordered listener set shared between the session handle and its driver.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a listener. It receives every event until its handle is
    /// used to remove it.
    pub fn add(&self, listener: impl Fn(&PushEvent) + Send + Sync + 'static) -> ListenerHandle {
        let id = ListenerId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        let listener: Listener = Arc::new(listener);
        self.registry.listeners.lock().push((id, listener));
        debug!(listener_id = id.0, "listener added");
        ListenerHandle {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` to every listener registered at the time of the call.
    /// Returns the number of listeners that completed without panicking.
    pub fn dispatch(&self, event: &PushEvent) -> usize {
        let snapshot: Vec<(ListenerId, Listener)> = self.registry.listeners.lock().clone();
        let mut delivered = 0;
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    counter!(SESSION_LISTENER_PANICS_TOTAL).increment(1);
                    error!(
                        listener_id = id.0,
                        topic = %event.topic,
                        panic = panic_message(panic.as_ref()),
                        "listener panicked"
                    );
                }
            }
        }
        delivered
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.registry.listeners.lock().len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Deregistration capability for one listener.
///
/// Dropping the handle leaves the listener registered.
#[derive(Debug)]
#[must_use = "the handle is the only way to remove the listener"]
pub struct ListenerHandle {
    id: ListenerId,
    registry: Weak<Registry>,
}

impl ListenerHandle {
    /// The listener's identity.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener. Returns `false` if it was already gone.
    pub fn remove(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut listeners = registry.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != self.id);
        let removed = listeners.len() != before;
        if removed {
            debug!(listener_id = self.id.0, "listener removed");
        }
        removed
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("listeners", &self.listeners.lock().len())
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event(topic: &str) -> PushEvent {
        PushEvent {
            topic: topic.into(),
            payload: Value::Null,
        }
    }

    #[test]
    fn delivers_in_registration_order() {
        let d = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for n in 0..3 {
            let seen = Arc::clone(&seen);
            handles.push(d.add(move |e| seen.lock().push((n, e.topic.clone()))));
        }
        assert_eq!(d.dispatch(&event("new_message")), 3);
        assert_eq!(
            *seen.lock(),
            vec![
                (0, "new_message".to_string()),
                (1, "new_message".to_string()),
                (2, "new_message".to_string())
            ]
        );
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let d = Dispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = d.add(move |_| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        });
        let _ = d.dispatch(&event("a"));
        assert!(handle.remove());
        let _ = d.dispatch(&event("b"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(d.is_empty());
    }

    #[test]
    fn panic_does_not_stop_later_listeners() {
        let d = Dispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _first = d.add(|_| panic!("listener bug"));
        let c = Arc::clone(&count);
        let _second = d.add(move |_| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(d.dispatch(&event("a")), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_added_during_dispatch_sees_next_event_only() {
        let d = Dispatcher::new();
        let late_count = Arc::new(AtomicUsize::new(0));
        let added = Arc::new(Mutex::new(Vec::new()));
        let inner = d.clone();
        let late = Arc::clone(&late_count);
        let added_in = Arc::clone(&added);
        let _adder = d.add(move |_| {
            if added_in.lock().is_empty() {
                let late = Arc::clone(&late);
                let handle = inner.add(move |_| {
                    let _ = late.fetch_add(1, Ordering::SeqCst);
                });
                added_in.lock().push(handle);
            }
        });
        assert_eq!(d.dispatch(&event("a")), 1);
        assert_eq!(late_count.load(Ordering::SeqCst), 0);
        assert_eq!(d.dispatch(&event("b")), 2);
        assert_eq!(late_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_can_remove_itself() {
        let d = Dispatcher::new();
        let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&slot);
        let c = Arc::clone(&count);
        let handle = d.add(move |_| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
            if let Some(h) = s.lock().take() {
                let _ = h.remove();
            }
        });
        *slot.lock() = Some(handle);
        let _ = d.dispatch(&event("a"));
        let _ = d.dispatch(&event("b"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_after_dispatcher_dropped() {
        let d = Dispatcher::new();
        let handle = d.add(|_| {});
        drop(d);
        assert!(!handle.remove());
    }
}
