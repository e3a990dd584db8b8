//! Protocol errors.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A message could not be serialized.
    #[error("failed to encode {message}: {reason}")]
    Encode {
        /// Message type name.
        message: &'static str,
        /// Underlying codec error.
        reason: String,
    },

    /// A payload could not be deserialized into the expected message.
    #[error("failed to decode {message}: {reason}")]
    Decode {
        /// Message type name.
        message: &'static str,
        /// Underlying codec error.
        reason: String,
    },

    /// The function name is not part of the protocol.
    #[error("unknown remote function: {0}")]
    UnknownFunction(String),
}
