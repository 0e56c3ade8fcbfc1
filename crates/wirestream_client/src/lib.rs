//! # Wirestream Client
//!
//! Subscription and reconciliation engine for wirestream.
//!
//! This crate keeps local application state synchronized with a remote
//! publisher over one long-lived, message-oriented duplex connection. A
//! [`Stream`] multiplexes the connection across many independent
//! subscriptions, routing every inbound message to the rooms it addresses;
//! each subscription reconciles events into its own state under
//! timestamp-based staleness rules, so state never regresses even when the
//! transport reorders, drops, or replays delivery.
//!
//! This crate provides:
//! - [`Stream`]: connection lifecycle, room-based routing, reconnect-and-rejoin
//! - [`GroupSubscription`]: a whole collection with per-id staleness tracking
//! - [`ItemSubscription`]: a single optional entity with one watermark
//! - [`StreamTransport`]/[`TransportFactory`]: the adapter seam for concrete
//!   transports, plus an in-memory [`MockTransport`] for tests
//!
//! ## Key invariants
//!
//! - A subscription is registered under exactly one room; rooms hold many
//! - A group collection never holds two entities with the same id
//! - Accepted-timestamp watermarks are monotonically non-decreasing
//! - Reconnection replaces only the transport, never subscription state
//!
//! Nothing here throws outward: transport failures feed the reconnect path,
//! stale or malformed messages are silently discarded (observable through
//! the optional drop hook on [`StreamConfig`]), and a failing listener
//! callback cannot starve the others.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod group;
mod item;
mod reconnect;
mod stream;
mod subscription;
mod transport;

pub use config::{DropHook, DropReason, ReconnectConfig, StreamConfig};
pub use error::{ClientError, ClientResult};
pub use group::GroupSubscription;
pub use item::ItemSubscription;
pub use reconnect::ReconnectTimer;
pub use stream::Stream;
pub use subscription::{ListenerId, RoomSubscriber, SubscriptionCore};
pub use transport::{
    MockFactory, MockTransport, StreamTransport, TransportEvents, TransportFactory,
};

pub use wirestream_protocol::{
    ControlMessage, CustomEvent, Entity, EventMessage, JoinMessage, RoomKey, StreamEvent,
};
