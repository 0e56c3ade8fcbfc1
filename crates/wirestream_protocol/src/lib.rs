//! # Wirestream Protocol
//!
//! Wire protocol types and JSON codecs for wirestream.
//!
//! This crate provides:
//! - The inbound [`EventMessage`] envelope and its tagged [`StreamEvent`] union
//! - Outbound [`ControlMessage`] frames (`join`/`leave`)
//! - [`RoomKey`] routing keys derived from a message's addressing fields
//! - The [`Entity`] trait implemented by consumer data types
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod messages;
mod room;

pub use entity::Entity;
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{ControlMessage, CustomEvent, EventMessage, JoinMessage, StreamEvent};
pub use room::RoomKey;
