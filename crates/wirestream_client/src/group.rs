//! Group reconciler: a whole collection kept in sync under per-id staleness.

use crate::config::{DropHook, DropReason};
use crate::subscription::{ListenerId, RoomSubscriber, SubscriptionCore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use wirestream_protocol::{CustomEvent, Entity, EventMessage, JoinMessage, StreamEvent};

/// A subscription to a whole group: an ordered collection of entities.
///
/// Staleness is tracked at two scopes. A single group-wide watermark gates
/// whole-collection `sync` replacement; per-id watermarks gate `update`s,
/// so an out-of-order update to one entity can neither block nor be blocked
/// by updates to a different entity. `delete` is applied regardless of
/// timestamp: deletes always win.
pub struct GroupSubscription<T: Entity> {
    inner: Arc<GroupReconciler<T>>,
}

impl<T: Entity> Clone for GroupSubscription<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct GroupReconciler<T: Entity> {
    sub: JoinMessage,
    sort_key: Option<String>,
    core: SubscriptionCore<Vec<T>>,
    tracking: Mutex<Tracking>,
    on_drop: Option<DropHook>,
}

#[derive(Default)]
struct Tracking {
    /// Highest timestamp accepted at group scope. Monotonic.
    last_sync: u64,
    /// Last accepted mutation timestamp per entity id. Cleared by `sync`.
    per_id: HashMap<String, u64>,
}

impl<T: Entity> GroupSubscription<T> {
    pub(crate) fn new(
        sub: JoinMessage,
        sort_key: Option<String>,
        on_drop: Option<DropHook>,
    ) -> Self {
        Self {
            inner: Arc::new(GroupReconciler {
                sub,
                sort_key,
                core: SubscriptionCore::new(Vec::new()),
                tracking: Mutex::new(Tracking::default()),
                on_drop,
            }),
        }
    }

    pub(crate) fn subscriber(&self) -> Arc<dyn RoomSubscriber> {
        Arc::clone(&self.inner) as Arc<dyn RoomSubscriber>
    }

    /// Returns a clone of the current collection.
    pub fn get_state(&self) -> Vec<T> {
        self.inner.core.get_state()
    }

    /// Registers a listener invoked on every accepted state write.
    pub fn add_change_listener(
        &self,
        listener: impl Fn(&Vec<T>) + Send + Sync + 'static,
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

impl<T: Entity> GroupReconciler<T> {
    fn apply(&self, message: &EventMessage) {
        match &message.event {
            StreamEvent::Sync { data } => {
                let items: Vec<T> = match serde_json::from_value(data.clone()) {
                    Ok(items) => items,
                    // Item-addressed sync traffic fanned to the group room
                    // carries a single object and lands here.
                    Err(err) => return self.report_decode(err),
                };
                {
                    let mut tracking = self.tracking.lock();
                    if message.timestamp < tracking.last_sync {
                        drop(tracking);
                        return self.report_stale(message);
                    }
                    tracking.last_sync = message.timestamp;
                    tracking.per_id.clear();
                }
                let mut items = items;
                self.sort_items(&mut items);
                self.core.set_state(items);
            }
            StreamEvent::Create { data } => {
                let item: T = match serde_json::from_value(data.clone()) {
                    Ok(item) => item,
                    Err(err) => return self.report_decode(err),
                };
                let mut state = self.core.get_state();
                if state.iter().any(|existing| existing.id() == item.id()) {
                    // Redelivered create; no state or watermark change.
                    return;
                }
                state.push(item);
                self.sort_items(&mut state);
                self.core.set_state(state);
            }
            StreamEvent::Update { data } => {
                let item: T = match serde_json::from_value(data.clone()) {
                    Ok(item) => item,
                    Err(err) => return self.report_decode(err),
                };
                let id = item.id().to_string();
                {
                    let mut tracking = self.tracking.lock();
                    let stale = tracking
                        .per_id
                        .get(&id)
                        .is_some_and(|&accepted| accepted >= message.timestamp);
                    if stale {
                        drop(tracking);
                        return self.report_stale(message);
                    }
                    tracking.last_sync = tracking.last_sync.max(message.timestamp);
                    tracking.per_id.insert(id.clone(), message.timestamp);
                }
                let mut state = self.core.get_state();
                if let Some(slot) = state.iter_mut().find(|existing| existing.id() == id.as_str()) {
                    *slot = item;
                }
                self.sort_items(&mut state);
                self.core.set_state(state);
            }
            StreamEvent::Delete { data } => {
                let Some(id) = data.get("id").and_then(|v| v.as_str()) else {
                    return self.report_decode_msg("delete payload without id");
                };
                {
                    let mut tracking = self.tracking.lock();
                    tracking.last_sync = tracking.last_sync.max(message.timestamp);
                    tracking.per_id.insert(id.to_string(), message.timestamp);
                }
                let mut state = self.core.get_state();
                state.retain(|existing| existing.id() != id);
                self.core.set_state(state);
            }
            StreamEvent::Event { event } => self.core.dispatch_custom(event),
        }
    }

    fn sort_items(&self, items: &mut [T]) {
        let Some(key) = &self.sort_key else { return };
        items.sort_by(|a, b| match (field_string(a, key), field_string(b, key)) {
            (Some(left), Some(right)) => left.cmp(&right),
            _ => std::cmp::Ordering::Equal,
        });
    }

    fn report_decode(&self, err: serde_json::Error) {
        self.report(DropReason::Decode {
            detail: err.to_string(),
        });
    }

    fn report_decode_msg(&self, detail: &str) {
        self.report(DropReason::Decode {
            detail: detail.to_string(),
        });
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

impl<T: Entity> RoomSubscriber for GroupReconciler<T> {
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

/// String representation of a named field of the entity's JSON form.
fn field_string<T: Entity>(entity: &T, key: &str) -> Option<String> {
    let value = serde_json::to_value(entity).ok()?;
    match value.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
