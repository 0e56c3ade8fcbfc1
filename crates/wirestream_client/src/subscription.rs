//! Subscription base: state container, listener registries, close lifecycle.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use wirestream_protocol::{CustomEvent, EventMessage, JoinMessage};

/// Handle identifying a registered listener, for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ChangeListener<S> = Arc<dyn Fn(&S) + Send + Sync>;
type EventListener = Arc<dyn Fn(&CustomEvent) + Send + Sync>;
type CloseHook = Box<dyn FnOnce() + Send>;

/// The piece of a subscription every reconciler shares: the current state,
/// the change-listener and custom-event registries, and the close lifecycle.
///
/// State reads clone out; callers never see interior references, so they
/// cannot mutate engine state in place.
pub struct SubscriptionCore<S> {
    state: RwLock<S>,
    change_listeners: RwLock<Vec<(ListenerId, ChangeListener<S>)>>,
    event_listeners: RwLock<HashMap<String, Vec<(ListenerId, EventListener)>>>,
    close_hooks: Mutex<Vec<CloseHook>>,
    closed: AtomicBool,
    next_listener_id: AtomicU64,
}

impl<S: Clone> SubscriptionCore<S> {
    /// Creates a core holding the given initial state.
    pub fn new(initial: S) -> Self {
        Self {
            state: RwLock::new(initial),
            change_listeners: RwLock::new(Vec::new()),
            event_listeners: RwLock::new(HashMap::new()),
            close_hooks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Returns a clone of the current state.
    pub fn get_state(&self) -> S {
        self.state.read().clone()
    }

    /// Stores `next` and synchronously notifies every change listener.
    ///
    /// Listeners fire on every call, including ones that store an unchanged
    /// value: no equality dedup happens here, staleness filtering upstream
    /// already prevents most redundant writes. Each listener runs outside
    /// the state lock and is isolated, so one panicking listener cannot
    /// starve the rest.
    pub fn set_state(&self, next: S) {
        *self.state.write() = next.clone();

        let listeners: Vec<ChangeListener<S>> = self
            .change_listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            isolate(|| listener(&next));
        }
    }

    /// Registers a change listener, invoked on every state write.
    pub fn add_change_listener(
        &self,
        listener: impl Fn(&S) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.next_id();
        self.change_listeners
            .write()
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes a previously registered change listener.
    pub fn remove_change_listener(&self, id: ListenerId) {
        self.change_listeners
            .write()
            .retain(|(listener_id, _)| *listener_id != id);
    }

    /// Registers a listener for custom events of the given type.
    pub fn on_event(
        &self,
        event_type: impl Into<String>,
        listener: impl Fn(&CustomEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.next_id();
        self.event_listeners
            .write()
            .entry(event_type.into())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes a custom-event listener.
    pub fn off_event(&self, event_type: &str, id: ListenerId) {
        let mut listeners = self.event_listeners.write();
        if let Some(entries) = listeners.get_mut(event_type) {
            entries.retain(|(listener_id, _)| *listener_id != id);
            if entries.is_empty() {
                listeners.remove(event_type);
            }
        }
    }

    /// Fans a custom event out to the listeners registered under its type.
    ///
    /// Independent of state changes: change listeners do not fire.
    pub fn dispatch_custom(&self, event: &CustomEvent) {
        let listeners: Vec<EventListener> = self
            .event_listeners
            .read()
            .get(&event.event_type)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        for listener in listeners {
            isolate(|| listener(event));
        }
    }

    /// Registers a teardown hook, run exactly once when the subscription
    /// closes. If the subscription is already closed the hook runs now.
    pub fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        if self.closed.load(Ordering::SeqCst) {
            hook();
            return;
        }
        self.close_hooks.lock().push(Box::new(hook));
    }

    /// Closes the subscription: runs every teardown hook once, then clears
    /// the hook set. Idempotent; a second call is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let hooks = std::mem::take(&mut *self.close_hooks.lock());
        for hook in hooks {
            hook();
        }
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Runs a listener callback, containing any panic it raises.
fn isolate(f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!("subscription listener panicked; continuing with remaining listeners");
    }
}

/// The type-erased face a subscription shows the connection manager.
///
/// Reconcilers implement `deliver` as their single entry point: one
/// envelope in, zero or one state writes out.
pub trait RoomSubscriber: Send + Sync {
    /// The client-generated id of this subscription.
    fn subscription_id(&self) -> &str;

    /// The join payload this subscription (re-)sends to the publisher.
    fn join_message(&self) -> &JoinMessage;

    /// Consumes one inbound envelope.
    fn deliver(&self, message: &EventMessage);

    /// Returns true once the subscription has been closed.
    fn is_closed(&self) -> bool;

    /// Registers a teardown hook (see [`SubscriptionCore::on_close`]).
    fn register_close_hook(&self, hook: Box<dyn FnOnce() + Send>);
}
