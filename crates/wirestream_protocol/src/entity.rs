//! The entity trait implemented by consumer data types.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A record that can live in a reconciled collection.
///
/// Entities are opaque to the engine apart from their stable string id:
/// identity, not full equality, determines matching. The serde bounds exist
/// because entities arrive as JSON payloads and are re-serialized when a
/// group subscription sorts by a named field.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use wirestream_protocol::Entity;
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Task {
///     id: String,
///     title: String,
/// }
///
/// impl Entity for Task {
///     fn id(&self) -> &str {
///         &self.id
///     }
/// }
/// ```
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns the stable id of this entity.
    fn id(&self) -> &str;
}
