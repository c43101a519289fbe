//! Synchronous change notification.
//!
//! Listeners run in the call stack of the mutation that produced the event,
//! in subscription order. Events are never merged, dropped or reordered.
//!
//! Each dispatch works on a copy of the listener list taken when it starts,
//! so listeners may subscribe, unsubscribe or query the dispatcher from a
//! callback. Such changes take effect from the next event: a listener
//! removed mid-dispatch still receives the current one if it comes later in
//! order. A listener must not dispatch into the dispatcher that is invoking
//! it.

use crate::{RecordKey, RecordValue};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A single logical change to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ChangeEvent {
    Added { key: RecordKey, value: RecordValue },
    Updated { key: RecordKey, value: RecordValue },
    Removed { key: RecordKey },
}

impl ChangeEvent {
    pub fn key(&self) -> &RecordKey {
        match self {
            ChangeEvent::Added { key, .. }
            | ChangeEvent::Updated { key, .. }
            | ChangeEvent::Removed { key } => key,
        }
    }
}

/// Callbacks for store changes. Every method defaults to a no-op.
pub trait ChangeListener: Send {
    fn on_key_added(&mut self, _key: &RecordKey, _value: &RecordValue) {}

    fn on_key_updated(&mut self, _key: &RecordKey, _value: &RecordValue) {}

    fn on_key_removed(&mut self, _key: &RecordKey) {}

    /// Route an event to the matching callback.
    fn on_event(&mut self, event: &ChangeEvent) {
        match event {
            ChangeEvent::Added { key, value } => self.on_key_added(key, value),
            ChangeEvent::Updated { key, value } => self.on_key_updated(key, value),
            ChangeEvent::Removed { key } => self.on_key_removed(key),
        }
    }
}

struct FnListener<F>(F);

impl<F> ChangeListener for FnListener<F>
where
    F: FnMut(&ChangeEvent) + Send,
{
    fn on_event(&mut self, event: &ChangeEvent) {
        (self.0)(event)
    }
}

/// Receiver of store notifications.
///
/// The store only holds a weak handle to its sink.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &ChangeEvent);
}

/// Handle returned by [`NotificationDispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

type SharedListener = Arc<Mutex<dyn ChangeListener>>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    listeners: Vec<(u64, SharedListener)>,
}

/// Ordered list of listeners.
#[derive(Default)]
pub struct NotificationDispatcher {
    subscribers: Mutex<Subscribers>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dispatcher wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        // A listener that panicked leaves the list itself intact.
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener. It runs after every listener registered before it.
    pub fn subscribe(&self, listener: impl ChangeListener + 'static) -> SubscriptionHandle {
        let mut subscribers = self.lock();
        subscribers.next_id += 1;
        let id = subscribers.next_id;
        let listener: SharedListener = Arc::new(Mutex::new(listener));
        subscribers.listeners.push((id, listener));
        SubscriptionHandle(id)
    }

    /// Register a closure receiving every event.
    pub fn subscribe_fn<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: FnMut(&ChangeEvent) + Send + 'static,
    {
        self.subscribe(FnListener(callback))
    }

    /// Remove a listener. Returns false if the handle was not registered.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.listeners.len();
        subscribers.listeners.retain(|(id, _)| *id != handle.0);
        subscribers.listeners.len() != before
    }

    /// Invoke every listener with `event`, in subscription order.
    ///
    /// The list lock is released before the first callback runs.
    pub fn dispatch(&self, event: &ChangeEvent) {
        let listeners: Vec<SharedListener> = self
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_event(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }
}

impl NotificationSink for NotificationDispatcher {
    fn notify(&self, event: &ChangeEvent) {
        self.dispatch(event);
    }
}

/// Listener that records every event it sees. Clones share the same log.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
}

#[cfg(test)]
impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events recorded so far.
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
impl ChangeListener for EventRecorder {
    fn on_event(&mut self, event: &ChangeEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn added(n: i64) -> ChangeEvent {
        ChangeEvent::Added {
            key: RecordKey::new(n),
            value: RecordValue::new(n * 10),
        }
    }

    #[test]
    fn listeners_run_in_subscription_order() {
        let dispatcher = NotificationDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            dispatcher.subscribe_fn(move |_| order.lock().unwrap().push(name));
        }

        dispatcher.dispatch(&added(1));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let dispatcher = NotificationDispatcher::new();
        let recorder = EventRecorder::new();
        let handle = dispatcher.subscribe(recorder.clone());

        dispatcher.dispatch(&added(1));
        assert!(dispatcher.unsubscribe(handle));
        assert!(!dispatcher.unsubscribe(handle));
        dispatcher.dispatch(&added(2));

        assert_eq!(recorder.events(), vec![added(1)]);
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[test]
    fn trait_callbacks_are_routed() {
        #[derive(Default)]
        struct Counts {
            added: usize,
            updated: usize,
            removed: usize,
        }

        #[derive(Clone, Default)]
        struct Counter(Arc<Mutex<Counts>>);

        impl ChangeListener for Counter {
            fn on_key_added(&mut self, _key: &RecordKey, _value: &RecordValue) {
                self.0.lock().unwrap().added += 1;
            }

            fn on_key_updated(&mut self, _key: &RecordKey, _value: &RecordValue) {
                self.0.lock().unwrap().updated += 1;
            }

            fn on_key_removed(&mut self, _key: &RecordKey) {
                self.0.lock().unwrap().removed += 1;
            }
        }

        let dispatcher = NotificationDispatcher::new();
        let counter = Counter::default();
        dispatcher.subscribe(counter.clone());

        dispatcher.dispatch(&added(1));
        dispatcher.dispatch(&ChangeEvent::Updated {
            key: RecordKey::new(1i64),
            value: RecordValue::new(2i64),
        });
        dispatcher.dispatch(&ChangeEvent::Removed {
            key: RecordKey::new(1i64),
        });

        let counts = counter.0.lock().unwrap();
        assert_eq!((counts.added, counts.updated, counts.removed), (1, 1, 1));
    }

    #[test]
    fn listener_can_use_dispatcher_during_dispatch() {
        let dispatcher = NotificationDispatcher::new_shared();
        let weak = Arc::downgrade(&dispatcher);
        let own_handle: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::default();
        let seen_counts = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let own_handle = Arc::clone(&own_handle);
            let seen_counts = Arc::clone(&seen_counts);
            dispatcher.subscribe_fn(move |_| {
                let Some(dispatcher) = weak.upgrade() else {
                    return;
                };
                seen_counts.lock().unwrap().push(dispatcher.listener_count());
                // Removes itself after the first event
                if let Some(handle) = own_handle.lock().unwrap().take() {
                    assert!(dispatcher.unsubscribe(handle));
                }
            })
        };
        *own_handle.lock().unwrap() = Some(handle);

        let later = EventRecorder::new();
        dispatcher.subscribe(later.clone());

        let (done_tx, done_rx) = mpsc::channel();
        let worker = Arc::clone(&dispatcher);
        std::thread::spawn(move || {
            worker.dispatch(&added(1));
            worker.dispatch(&added(2));
            let _ = done_tx.send(());
        });
        assert!(
            done_rx.recv_timeout(Duration::from_secs(5)).is_ok(),
            "dispatch did not return"
        );

        assert_eq!(*seen_counts.lock().unwrap(), vec![2]);
        assert_eq!(later.events(), vec![added(1), added(2)]);
        assert_eq!(dispatcher.listener_count(), 1);
    }

    #[test]
    fn listener_subscribed_mid_dispatch_starts_with_next_event() {
        let dispatcher = NotificationDispatcher::new_shared();
        let weak = Arc::downgrade(&dispatcher);
        let recorder = EventRecorder::new();
        let pending = Arc::new(Mutex::new(Some(recorder.clone())));

        dispatcher.subscribe_fn(move |_| {
            if let (Some(dispatcher), Some(recorder)) =
                (weak.upgrade(), pending.lock().unwrap().take())
            {
                dispatcher.subscribe(recorder);
            }
        });

        dispatcher.dispatch(&added(1));
        dispatcher.dispatch(&added(2));
        assert_eq!(recorder.events(), vec![added(2)]);
    }

    #[test]
    fn recorder_take_drains() {
        let dispatcher = NotificationDispatcher::new();
        let recorder = EventRecorder::new();
        dispatcher.subscribe(recorder.clone());

        dispatcher.dispatch(&added(1));
        assert_eq!(recorder.take().len(), 1);
        assert!(recorder.events().is_empty());
    }
}
