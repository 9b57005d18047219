//! WebSocket transport.
//!
//! Upgrades `GET /` to a WebSocket, adapts the socket to the relay's
//! [`FrameSink`] and text stream, and hands both to a [`ConnectionHandler`].

use crate::handler::ConnectionHandler;
use crate::server::SignalRelay;
use crate::transport::{FrameSink, TransportError};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::ConnectInfo;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Write half of a WebSocket.
pub struct WsSink {
    inner: SplitSink<WebSocket, Message>,
}

impl WsSink {
    /// Wrap the write half of a split socket.
    pub fn new(inner: SplitSink<WebSocket, Message>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

/// Turn the read half into a stream of text frames.
///
/// Binary frames are read as (lossy) UTF-8; control frames are skipped and a
/// close frame ends the stream with [`TransportError::ConnectionClosed`].
pub fn text_frames(
    stream: SplitStream<WebSocket>,
) -> impl Stream<Item = Result<String, TransportError>> {
    stream.filter_map(|message| async move {
        match message {
            Ok(Message::Text(text)) => Some(Ok(text)),
            Ok(Message::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
            Ok(Message::Close(_)) => Some(Err(TransportError::ConnectionClosed)),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Err(e) => Some(Err(TransportError::ReceiveFailed(e.to_string()))),
        }
    })
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(relay): Extension<Arc<SignalRelay>>,
) -> Response {
    // Rate limit check: prevent connection flooding from a single address
    if let Err(e) = relay.rate_limits().check_connection(addr.ip()) {
        tracing::warn!("Connection rate limited for {}: {}", addr, e);
        relay.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        return (StatusCode::TOO_MANY_REQUESTS, "rate limited").into_response();
    }

    let max_frame = relay.config().limits.max_frame_bytes;
    ws.max_message_size(max_frame)
        .max_frame_size(max_frame)
        .on_upgrade(move |socket| serve_socket(relay, socket, addr))
}

async fn serve_socket(relay: Arc<SignalRelay>, socket: WebSocket, addr: SocketAddr) {
    let (sink, stream) = socket.split();
    let conn = relay.accept(Box::new(WsSink::new(sink)), addr.ip());
    ConnectionHandler::new(relay, conn)
        .run(text_frames(stream))
        .await;
}
