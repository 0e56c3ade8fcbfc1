//! Room keys for routing inbound messages to subscriptions.

use std::fmt;

/// The routing key a subscription registers under.
///
/// A room is derived from `(stream_name, group_id)` for group subscriptions
/// or `(stream_name, group_id, id)` for item subscriptions. Keys are plain
/// struct values so distinct tuples can never collide, regardless of what
/// characters the ids contain; the [`Display`](fmt::Display) form is for
/// logs only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    stream_name: String,
    group_id: String,
    item_id: Option<String>,
}

impl RoomKey {
    /// Creates the room key for a whole group.
    pub fn group(stream_name: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            group_id: group_id.into(),
            item_id: None,
        }
    }

    /// Creates the room key for a single item within a group.
    pub fn item(
        stream_name: impl Into<String>,
        group_id: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            group_id: group_id.into(),
            item_id: Some(id.into()),
        }
    }

    /// Returns true if this key addresses a single item.
    pub fn is_item(&self) -> bool {
        self.item_id.is_some()
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item_id {
            Some(id) => write!(
                f,
                "{}:group:{}:item:{}",
                self.stream_name, self.group_id, id
            ),
            None => write!(f, "{}:group:{}", self.stream_name, self.group_id),
        }
    }
}
