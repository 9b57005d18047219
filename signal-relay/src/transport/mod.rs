//! Outbound transport abstraction.
//!
//! The relay writes every frame through a [`FrameSink`], which hides the
//! concrete connection (WebSocket in production, [`MockSink`] in tests).
//!
//! # Design
//!
//! A sink is write-only and owned by exactly one connection:
//! - `send_text()` transmits one serialized JSON frame
//! - `close()` terminates the connection
//!
//! Inbound frames arrive separately as a stream of text messages, so reads
//! never contend with writes.

mod mock;

pub use mock::MockSink;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// The write did not complete within the deadline.
    #[error("write timeout")]
    Timeout,
}

/// Write half of a client connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}
