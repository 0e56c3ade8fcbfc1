//! Error types for the client engine.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur inside the engine.
///
/// None of these reach subscribers: transport failures feed the reconnect
/// path, and codec failures cause the offending frame to be discarded. The
/// type exists for the transport seam and for diagnostics.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network or transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Transport is not open.
    #[error("transport is not open")]
    NotOpen,

    /// A frame failed to encode or decode.
    #[error("protocol error: {0}")]
    Protocol(#[from] wirestream_protocol::ProtocolError),

    /// Operation on a stream that was already closed.
    #[error("stream is closed")]
    Closed,
}
