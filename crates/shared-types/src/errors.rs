//! Wire format error types.

use thiserror::Error;

/// Errors produced while encoding or decoding schema-typed payloads.
#[derive(Debug, Error, Clone)]
pub enum WireError {
    /// Payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(String),

    /// Payload bytes did not match the expected schema.
    #[error("failed to decode payload: {0}")]
    Decode(String),
}
