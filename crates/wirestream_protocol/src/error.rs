//! Error types for protocol codecs.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding wire frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The frame is not valid JSON or does not match the expected shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}
