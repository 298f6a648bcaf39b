//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while decoding or encoding wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Empty message")]
    Empty,
}
