//! Wire messages: the inbound event envelope and outbound control frames.

use crate::error::ProtocolResult;
use crate::room::RoomKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies what a subscription wants to receive.
///
/// `id` present means an item subscription; absent means a group
/// subscription. The same payload is sent for `join` and `leave`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMessage {
    /// Name of the stream.
    pub stream_name: String,
    /// Group within the stream.
    pub group_id: String,
    /// Item id, for item subscriptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Client-generated id identifying this subscription.
    pub subscription_id: String,
}

impl JoinMessage {
    /// Creates a join message for a group subscription.
    pub fn group(
        stream_name: impl Into<String>,
        group_id: impl Into<String>,
        subscription_id: impl Into<String>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            group_id: group_id.into(),
            id: None,
            subscription_id: subscription_id.into(),
        }
    }

    /// Creates a join message for an item subscription.
    pub fn item(
        stream_name: impl Into<String>,
        group_id: impl Into<String>,
        id: impl Into<String>,
        subscription_id: impl Into<String>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            group_id: group_id.into(),
            id: Some(id.into()),
            subscription_id: subscription_id.into(),
        }
    }

    /// Returns true if this subscription addresses a single item.
    pub fn is_item(&self) -> bool {
        self.id.is_some()
    }

    /// Returns the room this subscription registers under.
    pub fn room_key(&self) -> RoomKey {
        match &self.id {
            Some(id) => RoomKey::item(&self.stream_name, &self.group_id, id),
            None => RoomKey::group(&self.stream_name, &self.group_id),
        }
    }
}

/// An outbound control frame: `{type: "join"|"leave", data: {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Start receiving messages for a subscription's room.
    Join {
        /// The subscription being joined.
        data: JoinMessage,
    },
    /// Stop receiving messages for a subscription's room.
    Leave {
        /// The subscription being left.
        data: JoinMessage,
    },
}

impl ControlMessage {
    /// Creates a join frame.
    pub fn join(data: JoinMessage) -> Self {
        Self::Join { data }
    }

    /// Creates a leave frame.
    pub fn leave(data: JoinMessage) -> Self {
        Self::Leave { data }
    }

    /// Encodes to a JSON text frame.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from a JSON text frame.
    pub fn from_json(frame: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// An opaque application-level event, passed through without touching
/// reconciled state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomEvent {
    /// Application-defined event type, used as the dispatch key.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Arbitrary payload.
    #[serde(default)]
    pub data: Value,
}

/// One reconcilable event, tagged by its `type` field on the wire.
///
/// `sync`/`create`/`update`/`delete` carry their payload as raw JSON; the
/// typed decode happens inside each subscription, which is what lets one
/// type-erased dispatch path serve subscriptions of different data types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Full state replacement: one entity for items, an array for groups.
    Sync {
        /// Replacement payload.
        data: Value,
    },
    /// A new entity.
    Create {
        /// The created entity.
        data: Value,
    },
    /// A changed entity.
    Update {
        /// The new version of the entity.
        data: Value,
    },
    /// An entity removal; the payload carries at minimum `{id}`.
    Delete {
        /// The removed entity, or just its id.
        data: Value,
    },
    /// An opaque passthrough event.
    Event {
        /// The application event.
        event: CustomEvent,
    },
}

impl StreamEvent {
    /// Returns the wire name of this event's type, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            StreamEvent::Sync { .. } => "sync",
            StreamEvent::Create { .. } => "create",
            StreamEvent::Update { .. } => "update",
            StreamEvent::Delete { .. } => "delete",
            StreamEvent::Event { .. } => "event",
        }
    }
}

/// The inbound envelope wrapping one [`StreamEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    /// Name of the stream this message belongs to.
    pub stream_name: String,
    /// Group within the stream.
    pub group_id: String,
    /// Item id, present when the message addresses a single item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Publisher-assigned timestamp used by the staleness comparators.
    pub timestamp: u64,
    /// The event itself.
    pub event: StreamEvent,
}

impl EventMessage {
    /// Decodes from a JSON text frame.
    pub fn from_json(frame: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Encodes to a JSON text frame.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the exact room this message is addressed to.
    pub fn room_key(&self) -> RoomKey {
        match &self.id {
            Some(id) => RoomKey::item(&self.stream_name, &self.group_id, id),
            None => RoomKey::group(&self.stream_name, &self.group_id),
        }
    }

    /// Returns the group room, ignoring any item id.
    pub fn group_room_key(&self) -> RoomKey {
        RoomKey::group(&self.stream_name, &self.group_id)
    }
}
