//! One accepted client connection.
//!
//! A [`Connection`] owns the write half of the transport plus the small
//! amount of per-connection state the relay tracks: the bound identity, the
//! message-rate window and the pairing cool-down.

use crate::config::LimitsConfig;
use crate::limits::{Cooldown, MessageWindow};
use crate::transport::{FrameSink, TransportError};
use signal_types::{ConnectionId, Frame, Identity, ServerFrame};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct ConnectionState {
    identity: Option<Identity>,
    messages: MessageWindow,
    pairing: Cooldown,
}

/// A live client connection.
pub struct Connection {
    id: ConnectionId,
    peer_addr: IpAddr,
    /// Serializes writes so two frames never interleave.
    sink: tokio::sync::Mutex<Box<dyn FrameSink>>,
    state: Mutex<ConnectionState>,
    write_timeout: Duration,
    /// Set by `close()` or a timed-out write; later sends fail at once.
    closed: AtomicBool,
    sink_closed: AtomicBool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("identity", &self.identity())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wrap a transport sink.
    pub fn new(
        sink: Box<dyn FrameSink>,
        peer_addr: IpAddr,
        limits: &LimitsConfig,
        write_timeout: Duration,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            peer_addr,
            sink: tokio::sync::Mutex::new(sink),
            state: Mutex::new(ConnectionState {
                identity: None,
                messages: MessageWindow::per_second(limits.messages_per_second),
                pairing: Cooldown::new(Duration::from_secs(limits.pairing_cooldown_secs)),
            }),
            write_timeout,
            closed: AtomicBool::new(false),
            sink_closed: AtomicBool::new(false),
        }
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Source address of the transport.
    pub fn peer_addr(&self) -> IpAddr {
        self.peer_addr
    }

    /// Bound identity, if authenticated.
    pub fn identity(&self) -> Option<Identity> {
        self.state().identity.clone()
    }

    /// Bind an identity, returning the previous one.
    ///
    /// Only the registry calls this, while holding its own lock.
    pub(crate) fn set_identity(&self, identity: Identity) -> Option<Identity> {
        self.state().identity.replace(identity)
    }

    /// Count one message against the per-connection window.
    pub fn allow_message_at(&self, now: Instant) -> bool {
        self.state().messages.allow_at(now)
    }

    /// Start a pairing request unless the cool-down is still running.
    pub fn try_start_pairing_at(&self, now: Instant) -> bool {
        self.state().pairing.try_start_at(now)
    }

    /// Configured pairing cool-down.
    pub fn pairing_cooldown(&self) -> Duration {
        self.state().pairing.period()
    }

    /// Serialize and send a typed frame.
    pub async fn send(&self, frame: &ServerFrame) -> Result<(), TransportError> {
        let text = frame
            .to_json()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.send_text(text).await
    }

    /// Send a raw frame (used for verbatim forwarding).
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let text = frame
            .to_json()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.send_text(text).await
    }

    /// Send one serialized frame.
    ///
    /// The write timeout covers both waiting for the sink and the write
    /// itself. A timed-out write marks the connection failed.
    pub async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send_text(text).await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => {
                if !self.closed.swap(true, Ordering::SeqCst) {
                    tracing::warn!(
                        "Write to {} timed out after {:?}, marking failed",
                        self.id,
                        self.write_timeout
                    );
                }
                Err(TransportError::Timeout)
            }
        }
    }

    /// Close the transport. Only the first call reaches the sink.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if self.sink_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let close = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(self.write_timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Close failed for {}: {}", self.id, e),
            Err(_) => tracing::debug!("Close of {} timed out", self.id),
        }
    }

    /// Whether the connection was closed or failed a write.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockSink;
    use signal_types::{FrameType, SessionId};
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn connection(sink: &MockSink) -> Connection {
        Connection::new(
            Box::new(sink.clone()),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            &LimitsConfig::default(),
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn send_serializes_server_frames() {
        let sink = MockSink::new();
        let conn = connection(&sink);

        conn.send(&ServerFrame::PeerOnline {
            session_id: SessionId::from("s1"),
        })
        .await
        .unwrap();

        let frame = sink.last_frame().unwrap();
        assert_eq!(frame.frame_type, FrameType::PeerOnline);
        assert_eq!(frame.session_id.as_str(), "s1");
    }

    #[tokio::test]
    async fn slow_write_times_out() {
        let sink = MockSink::new();
        sink.delay_sends(Duration::from_secs(1));
        let conn = connection(&sink);

        let result = conn.send(&ServerFrame::Ping).await;
        assert!(matches!(result, Err(TransportError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_peer_bounds_concurrent_senders() {
        let sink = MockSink::new();
        sink.delay_sends(Duration::from_secs(3600));
        let conn = Arc::new(Connection::new(
            Box::new(sink.clone()),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            &LimitsConfig::default(),
            Duration::from_secs(2),
        ));

        let started = tokio::time::Instant::now();
        let sends = (0..10).map(|_| {
            let conn = conn.clone();
            tokio::spawn(async move {
                let result = conn.send(&ServerFrame::Ping).await;
                (result, started.elapsed())
            })
        });
        for handle in futures_util::future::join_all(sends).await {
            let (result, elapsed) = handle.unwrap();
            assert!(result.is_err());
            assert!(elapsed <= Duration::from_secs(2), "waited {:?}", elapsed);
        }
        assert!(conn.is_closed());

        // Later writes fail without waiting again
        let before = tokio::time::Instant::now();
        assert!(matches!(
            conn.send(&ServerFrame::Ping).await,
            Err(TransportError::ConnectionClosed)
        ));
        assert_eq!(before.elapsed(), Duration::ZERO);

        // The transport itself still gets closed on disconnect
        conn.close().await;
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_sends() {
        let sink = MockSink::new();
        let conn = connection(&sink);

        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());
        assert!(sink.is_closed());
        assert!(matches!(
            conn.send(&ServerFrame::Ping).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[test]
    fn identity_binding_returns_previous() {
        let conn = connection(&MockSink::new());
        assert!(conn.identity().is_none());

        let alice = Identity::parse("alice@example.com").unwrap();
        assert_eq!(conn.set_identity(alice.clone()), None);
        assert_eq!(conn.identity(), Some(alice.clone()));

        let bob = Identity::parse("bob@example.com").unwrap();
        assert_eq!(conn.set_identity(bob), Some(alice));
    }

    #[test]
    fn pairing_cooldown_is_per_connection() {
        let a = connection(&MockSink::new());
        let b = connection(&MockSink::new());
        let now = Instant::now();

        assert!(a.try_start_pairing_at(now));
        assert!(!a.try_start_pairing_at(now + Duration::from_secs(1)));
        assert!(b.try_start_pairing_at(now + Duration::from_secs(1)));
        assert_eq!(a.pairing_cooldown(), Duration::from_secs(5));
    }
}
