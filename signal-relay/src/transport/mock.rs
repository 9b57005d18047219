//! Mock sink for testing.
//!
//! Captures sent frames for verification and can be told to fail writes.

use super::{FrameSink, TransportError};
use async_trait::async_trait;
use signal_types::{Frame, FrameType};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock sink for testing.
///
/// Clones share state, so a test keeps one handle while the relay owns
/// the boxed other.
#[derive(Debug, Default, Clone)]
pub struct MockSink {
    inner: Arc<Mutex<MockSinkInner>>,
}

#[derive(Debug, Default)]
struct MockSinkInner {
    sent: Vec<String>,
    closed: bool,
    fail_sends: bool,
    delay: Option<Duration>,
}

impl MockSink {
    /// Create a new mock sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All raw text frames that were sent.
    pub fn sent(&self) -> Vec<String> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// All sent frames, parsed.
    pub fn frames(&self) -> Vec<Frame> {
        self.sent()
            .iter()
            .filter_map(|text| Frame::from_json(text).ok())
            .collect()
    }

    /// Sent frames of one type.
    pub fn frames_of(&self, frame_type: FrameType) -> Vec<Frame> {
        self.frames()
            .into_iter()
            .filter(|f| f.frame_type == frame_type)
            .collect()
    }

    /// The last frame that was sent.
    pub fn last_frame(&self) -> Option<Frame> {
        self.frames().pop()
    }

    /// Forget captured frames.
    pub fn clear(&self) {
        self.inner.lock().unwrap().sent.clear();
    }

    /// Whether `close()` was called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Make every following send fail (or succeed again).
    pub fn fail_sends(&self, fail: bool) {
        self.inner.lock().unwrap().fail_sends = fail;
    }

    /// Delay every following send, to exercise write timeouts.
    pub fn delay_sends(&self, delay: Duration) {
        self.inner.lock().unwrap().delay = Some(delay);
    }
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let delay = self.inner.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(TransportError::ConnectionClosed);
        }
        if inner.fail_sends {
            return Err(TransportError::SendFailed("mock failure".to_string()));
        }
        inner.sent.push(text);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.lock().unwrap().closed = true;
        Ok(())
    }
}
