//! Error types for the signaling wire format.

use thiserror::Error;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// The `t` tag does not name a frame type clients may send
    #[error("unknown frame type")]
    UnknownType,

    /// The frame parsed but its contents are not acceptable
    #[error("invalid data: {0}")]
    InvalidData(String),
}
