//! Item reconciler: a single optional entity under one staleness watermark.

use crate::config::{DropHook, DropReason};
use crate::subscription::{ListenerId, RoomSubscriber, SubscriptionCore};
use parking_lot::Mutex;
use std::sync::Arc;
use wirestream_protocol::{CustomEvent, Entity, EventMessage, JoinMessage, StreamEvent};

/// A subscription to one entity, addressed by id within a group.
///
/// One watermark covers every event type uniformly, and ties are dropped:
/// an event at exactly the last accepted timestamp is stale. This differs
/// from the group reconciler, whose `sync` gate accepts ties.
pub struct ItemSubscription<T: Entity> {
    inner: Arc<ItemReconciler<T>>,
}

impl<T: Entity> Clone for ItemSubscription<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ItemReconciler<T: Entity> {
    sub: JoinMessage,
    core: SubscriptionCore<Option<T>>,
    /// Highest accepted timestamp, across all event types.
    last_event: Mutex<Option<u64>>,
    on_drop: Option<DropHook>,
}

impl<T: Entity> ItemSubscription<T> {
    pub(crate) fn new(sub: JoinMessage, on_drop: Option<DropHook>) -> Self {
        Self {
            inner: Arc::new(ItemReconciler {
                sub,
                core: SubscriptionCore::new(None),
                last_event: Mutex::new(None),
                on_drop,
            }),
        }
    }

    pub(crate) fn subscriber(&self) -> Arc<dyn RoomSubscriber> {
        Arc::clone(&self.inner) as Arc<dyn RoomSubscriber>
    }

    /// Returns a clone of the current entity, if any.
    pub fn get_state(&self) -> Option<T> {
        self.inner.core.get_state()
    }

    /// Registers a listener invoked on every accepted state write.
    pub fn add_change_listener(
        &self,
        listener: impl Fn(&Option<T>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.core.add_change_listener(listener)
    }

    /// Removes a change listener.
    pub fn remove_change_listener(&self, id: ListenerId) {
        self.inner.core.remove_change_listener(id);
    }

    /// Registers a listener for opaque application events of `event_type`.
    pub fn on_event(
        &self,
        event_type: impl Into<String>,
        listener: impl Fn(&CustomEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.core.on_event(event_type, listener)
    }

    /// Removes a custom-event listener.
    pub fn off_event(&self, event_type: &str, id: ListenerId) {
        self.inner.core.off_event(event_type, id);
    }

    /// Registers a teardown hook.
    pub fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        self.inner.core.on_close(hook);
    }

    /// Closes the subscription. Idempotent.
    pub fn close(&self) {
        self.inner.core.close();
    }

    /// Returns true once the subscription is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.core.is_closed()
    }

    #[cfg(test)]
    fn deliver(&self, message: &EventMessage) {
        self.inner.deliver(message);
    }
}

impl<T: Entity> ItemReconciler<T> {
    fn apply(&self, message: &EventMessage) {
        {
            let last = self.last_event.lock();
            if last.is_some_and(|accepted| message.timestamp <= accepted) {
                drop(last);
                return self.report_stale(message);
            }
        }

        match &message.event {
            StreamEvent::Sync { data }
            | StreamEvent::Create { data }
            | StreamEvent::Update { data } => {
                let item: T = match serde_json::from_value(data.clone()) {
                    Ok(item) => item,
                    Err(err) => {
                        return self.report(DropReason::Decode {
                            detail: err.to_string(),
                        })
                    }
                };
                self.accept(message.timestamp);
                self.core.set_state(Some(item));
            }
            StreamEvent::Delete { .. } => {
                self.accept(message.timestamp);
                self.core.set_state(None);
            }
            StreamEvent::Event { event } => {
                // The watermark is uniform across types, so passthrough
                // events advance it even though state is untouched.
                self.accept(message.timestamp);
                self.core.dispatch_custom(event);
            }
        }
    }

    fn accept(&self, timestamp: u64) {
        *self.last_event.lock() = Some(timestamp);
    }

    fn report_stale(&self, message: &EventMessage) {
        self.report(DropReason::Stale {
            room: self.sub.room_key(),
            event: message.event.type_name(),
            timestamp: message.timestamp,
        });
    }

    fn report(&self, reason: DropReason) {
        match &reason {
            DropReason::Decode { detail } => {
                tracing::warn!(room = %self.sub.room_key(), %detail, "discarding undecodable event");
            }
            DropReason::Stale { event, timestamp, .. } => {
                tracing::trace!(room = %self.sub.room_key(), event, timestamp, "discarding stale event");
            }
        }
        if let Some(hook) = &self.on_drop {
            hook(&reason);
        }
    }
}

impl<T: Entity> RoomSubscriber for ItemReconciler<T> {
    fn subscription_id(&self) -> &str {
        &self.sub.subscription_id
    }

    fn join_message(&self) -> &JoinMessage {
        &self.sub
    }

    fn deliver(&self, message: &EventMessage) {
        if self.core.is_closed() {
            return;
        }
        self.apply(message);
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    fn register_close_hook(&self, hook: Box<dyn FnOnce() + Send>) {
        self.core.on_close(hook);
    }
}
