//! Connection manager: owns the transport, routes messages to rooms,
//! reconnects and rejoins.

use crate::config::{DropReason, StreamConfig};
use crate::error::ClientResult;
use crate::group::GroupSubscription;
use crate::item::ItemSubscription;
use crate::reconnect::ReconnectTimer;
use crate::subscription::RoomSubscriber;
use crate::transport::{StreamTransport, TransportEvents, TransportFactory};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;
use wirestream_protocol::{ControlMessage, Entity, EventMessage, JoinMessage, RoomKey};

/// A multiplexed connection to the publisher.
///
/// One `Stream` owns one transport connection and fans inbound messages out
/// to every subscription registered under the message's room. Construct one
/// instance per logical connection; there is no shared global state.
///
/// Transport failures never reach subscribers: the manager reconnects after
/// a configurable delay and resends every registered subscription's `join`,
/// which is the sole resynchronization mechanism after an outage.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    config: StreamConfig,
    factory: Box<dyn TransportFactory>,
    transport: RwLock<Option<Arc<dyn StreamTransport>>>,
    rooms: RwLock<HashMap<RoomKey, Vec<Arc<dyn RoomSubscriber>>>>,
    reconnect: Mutex<Option<ReconnectTimer>>,
    attempts: AtomicU32,
    closed: AtomicBool,
}

/// Bridges transport callbacks to the manager without keeping it alive.
struct EventsHandle {
    inner: Weak<StreamInner>,
}

impl TransportEvents for EventsHandle {
    fn on_open(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_open();
        }
    }

    fn on_message(&self, frame: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_message(frame);
        }
    }

    fn on_close(&self) {
        if let Some(inner) = self.inner.upgrade() {
            StreamInner::handle_close(&inner);
        }
    }
}

impl Stream {
    /// Opens a stream to the configured address.
    ///
    /// An initial connect failure is not an error to the caller; it is
    /// treated like any other transport outage and handed to the reconnect
    /// path.
    pub fn connect(config: StreamConfig, factory: impl TransportFactory + 'static) -> Self {
        let inner = Arc::new(StreamInner {
            config,
            factory: Box::new(factory),
            transport: RwLock::new(None),
            rooms: RwLock::new(HashMap::new()),
            reconnect: Mutex::new(None),
            attempts: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        });
        StreamInner::open(&inner);
        Self { inner }
    }

    /// Subscribes to a whole group within a stream.
    pub fn subscribe_group<T: Entity>(
        &self,
        stream_name: &str,
        group_id: &str,
    ) -> GroupSubscription<T> {
        self.group_subscription(stream_name, group_id, None)
    }

    /// Subscribes to a whole group, kept sorted ascending by the string
    /// representation of the named field.
    pub fn subscribe_group_sorted<T: Entity>(
        &self,
        stream_name: &str,
        group_id: &str,
        sort_key: &str,
    ) -> GroupSubscription<T> {
        self.group_subscription(stream_name, group_id, Some(sort_key.to_string()))
    }

    /// Subscribes to a single item within a group.
    pub fn subscribe_item<T: Entity>(
        &self,
        stream_name: &str,
        group_id: &str,
        id: &str,
    ) -> ItemSubscription<T> {
        let sub = JoinMessage::item(stream_name, group_id, id, Uuid::new_v4().to_string());
        let subscription = ItemSubscription::new(sub, self.inner.config.on_drop.clone());
        self.register(subscription.subscriber());
        subscription
    }

    /// Closes the stream: cancels any pending reconnect, clears the whole
    /// room registry, and tears down the transport. Terminal and always
    /// successful; this is not a per-subscription operation.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(timer) = self.inner.reconnect.lock().take() {
            timer.cancel();
        }
        self.inner.rooms.write().clear();
        let transport = self.inner.transport.write().take();
        if let Some(transport) = transport {
            transport.close();
        }
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn group_subscription<T: Entity>(
        &self,
        stream_name: &str,
        group_id: &str,
        sort_key: Option<String>,
    ) -> GroupSubscription<T> {
        let sub = JoinMessage::group(stream_name, group_id, Uuid::new_v4().to_string());
        let subscription = GroupSubscription::new(sub, sort_key, self.inner.config.on_drop.clone());
        self.register(subscription.subscriber());
        subscription
    }

    fn register(&self, subscriber: Arc<dyn RoomSubscriber>) {
        let room = subscriber.join_message().room_key();
        let join = subscriber.join_message().clone();
        let subscription_id = subscriber.subscription_id().to_string();

        self.inner
            .rooms
            .write()
            .entry(room.clone())
            .or_default()
            .push(Arc::clone(&subscriber));
        tracing::debug!(room = %room, subscription = %subscription_id, "registered subscription");

        self.inner.send_control(ControlMessage::join(join.clone()));

        // The hook holds a Weak so a closed-but-retained subscription does
        // not keep the manager alive.
        let weak = Arc::downgrade(&self.inner);
        subscriber.register_close_hook(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.unregister(&room, &subscription_id);
                inner.send_control(ControlMessage::leave(join));
            }
        }));
    }
}

impl StreamInner {
    fn open(this: &Arc<Self>) {
        if this.closed.load(Ordering::SeqCst) {
            return;
        }
        let events: Arc<dyn TransportEvents> = Arc::new(EventsHandle {
            inner: Arc::downgrade(this),
        });
        match this.factory.connect(&this.config.address, events) {
            Ok(transport) => {
                *this.transport.write() = Some(transport);
            }
            Err(err) => {
                tracing::warn!(%err, address = %this.config.address, "connect failed");
                Self::schedule_reconnect(this);
            }
        }
    }

    /// Rejoin sweep: resend `join` for every registered subscription.
    /// Unconditional, so subscriptions created during an outage and ones
    /// that predate it are repaired the same way.
    fn handle_open(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        let subscribers: Vec<Arc<dyn RoomSubscriber>> = self
            .rooms
            .read()
            .values()
            .flat_map(|subs| subs.iter().cloned())
            .collect();
        tracing::info!(subscriptions = subscribers.len(), "transport open, rejoining");
        for subscriber in subscribers {
            self.send_control(ControlMessage::join(subscriber.join_message().clone()));
        }
    }

    fn handle_message(&self, frame: &str) {
        let message = match EventMessage::from_json(frame) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(%err, "discarding undecodable frame");
                if let Some(hook) = &self.config.on_drop {
                    hook(&DropReason::Decode {
                        detail: err.to_string(),
                    });
                }
                return;
            }
        };

        // Snapshot targets first; registry locks are never held across
        // reconciler delivery.
        let mut targets: Vec<Arc<dyn RoomSubscriber>> = Vec::new();
        {
            let rooms = self.rooms.read();
            if let Some(subs) = rooms.get(&message.group_room_key()) {
                targets.extend(subs.iter().cloned());
            }
            if message.id.is_some() {
                if let Some(subs) = rooms.get(&message.room_key()) {
                    targets.extend(subs.iter().cloned());
                }
            }
        }
        for subscriber in targets {
            if !subscriber.is_closed() {
                subscriber.deliver(&message);
            }
        }
    }

    fn handle_close(this: &Arc<Self>) {
        if this.closed.load(Ordering::SeqCst) {
            return;
        }
        tracing::info!("transport closed");
        Self::schedule_reconnect(this);
    }

    fn schedule_reconnect(this: &Arc<Self>) {
        let attempt = this.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(max) = this.config.reconnect.max_attempts {
            if attempt >= max {
                tracing::warn!(attempt, "reconnect attempts exhausted");
                return;
            }
        }
        let delay = this.config.reconnect.delay_for_attempt(attempt);
        tracing::info!(attempt, ?delay, "scheduling reconnect");

        let weak = Arc::downgrade(this);
        let timer = ReconnectTimer::schedule(delay, move || {
            if let Some(inner) = weak.upgrade() {
                StreamInner::open(&inner);
            }
        });
        // Replacing a pending timer cancels it; at most one reconnect is
        // ever in flight.
        *this.reconnect.lock() = Some(timer);
    }

    fn unregister(&self, room: &RoomKey, subscription_id: &str) {
        let mut rooms = self.rooms.write();
        if let Some(subs) = rooms.get_mut(room) {
            subs.retain(|s| s.subscription_id() != subscription_id);
            if subs.is_empty() {
                rooms.remove(room);
            }
        }
        tracing::debug!(room = %room, subscription = subscription_id, "unregistered subscription");
    }

    /// Sends a control frame if the transport is currently open. A no-op
    /// otherwise; the rejoin sweep repairs missed joins.
    fn send_control(&self, message: ControlMessage) {
        let transport = self.transport.read().clone();
        let Some(transport) = transport else {
            return;
        };
        if !transport.is_open() {
            tracing::debug!("transport not open, skipping control frame");
            return;
        }
        let result: ClientResult<()> = message
            .to_json()
            .map_err(Into::into)
            .and_then(|frame| transport.send(&frame));
        if let Err(err) = result {
            tracing::warn!(%err, "failed to send control frame");
        }
    }
}
