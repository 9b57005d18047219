//! Per-connection frame dispatch.
//!
//! Each connection gets a [`ConnectionHandler`] that processes inbound frames
//! strictly in arrival order. Every frame is decoded into a [`ClientFrame`]
//! and routed through one exhaustive match. Handler errors become `ERROR`
//! frames; fatal ones end the loop and run the disconnect cascade.

use crate::auth::{unix_now, TokenIssuer};
use crate::connection::Connection;
use crate::error::{ProtocolError, ProtocolResult};
use crate::limits::RateLimitError;
use crate::server::SignalRelay;
use crate::transport::TransportError;
use crate::turn::turn_credentials;
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use signal_types::{
    AuthRequest, AuthSuccess, ClientFrame, ConnectRequest, Frame, Identity, MessageBody,
    PeerIntro, PeerProfile, ServerFrame, SessionId,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Drives one connection's read loop.
pub struct ConnectionHandler {
    relay: Arc<SignalRelay>,
    conn: Arc<Connection>,
}

impl ConnectionHandler {
    /// Create a handler for an accepted connection.
    pub fn new(relay: Arc<SignalRelay>, conn: Arc<Connection>) -> Self {
        Self { relay, conn }
    }

    /// The connection this handler serves.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Process inbound text frames until the stream ends, a read fails or a
    /// fatal error occurs, then tear the connection down.
    pub async fn run<S>(self, inbound: S)
    where
        S: Stream<Item = Result<String, TransportError>>,
    {
        let mut inbound = std::pin::pin!(inbound);

        while let Some(item) = inbound.next().await {
            let text = match item {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!("Read from {} ended: {}", self.conn.id(), e);
                    break;
                }
            };

            if let Err(e) = self.handle_text(&text).await {
                let fatal = e.is_fatal();
                self.report(&e).await;
                if fatal {
                    break;
                }
            }
        }

        self.relay.disconnect(&self.conn).await;
    }

    /// Decode and dispatch one inbound frame.
    pub async fn handle_text(&self, text: &str) -> ProtocolResult<()> {
        self.relay
            .metrics()
            .frames_received
            .fetch_add(1, Ordering::Relaxed);

        let limit = self.relay.config().limits.max_frame_bytes;
        if text.len() > limit {
            return Err(ProtocolError::MalformedFrame {
                reason: format!("frame too large: {} > {}", text.len(), limit),
            });
        }

        let frame = Frame::from_json(text)?;
        if frame.frame_type.requires_auth() && self.conn.identity().is_none() {
            return Err(ProtocolError::AuthRequired);
        }

        let frame = ClientFrame::try_from(frame)?;
        self.dispatch(frame).await
    }

    async fn dispatch(&self, frame: ClientFrame) -> ProtocolResult<()> {
        match frame {
            ClientFrame::Auth(req) => self.handle_auth(req).await,
            ClientFrame::ConnectRequest { data } => self.handle_connect_request(data).await,
            ClientFrame::JoinAccept {
                session_id,
                profile,
            } => self.handle_join_accept(session_id, profile).await,
            ClientFrame::JoinDeny { session_id } => self.handle_join_deny(session_id).await,
            ClientFrame::Reattach { session_id } => self.handle_reattach(session_id).await,
            ClientFrame::Message {
                session_id,
                ack_requested,
                data,
            } => self.handle_message(session_id, ack_requested, data).await,
            ClientFrame::Rtc(frame) => self.handle_rtc(frame).await,
            ClientFrame::GetTurnCredentials => self.handle_turn_credentials().await,
        }
    }

    async fn handle_auth(&self, req: AuthRequest) -> ProtocolResult<()> {
        let token = req.token.trim();
        if token.is_empty() {
            return Err(ProtocolError::MalformedFrame {
                reason: "missing token".to_string(),
            });
        }

        // Local token refresh is cheap; only the provider path is limited
        if !TokenIssuer::is_continuation_token(token) {
            if let Err(e) = self.relay.rate_limits().check_auth(self.conn.peer_addr()) {
                tracing::warn!("Auth rate limited for {}: {}", self.conn.peer_addr(), e);
                return Err(ProtocolError::TooManyAttempts);
            }
        }

        let verified = match self.relay.verifier().verify(token).await {
            Ok(verified) => verified,
            Err(e) => {
                self.relay
                    .metrics()
                    .auth_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::info!("Auth failed on {}: {}", self.conn.id(), e);
                return Err(e.into());
            }
        };

        self.relay
            .registry()
            .bind_identity(&self.conn, verified.identity.clone())?;
        self.relay
            .metrics()
            .auth_success
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "Connection {} authenticated as {}",
            self.conn.id(),
            verified.identity.hash().short()
        );

        self.reply(ServerFrame::AuthSuccess(AuthSuccess {
            email: verified.identity.as_str().to_string(),
            token: verified.token,
        }))
        .await;
        Ok(())
    }

    async fn handle_connect_request(&self, data: Option<serde_json::Value>) -> ProtocolResult<()> {
        let identity = self.identity()?;

        if !self.conn.try_start_pairing_at(Instant::now()) {
            return Err(ProtocolError::CooldownActive {
                secs: self.conn.pairing_cooldown().as_secs(),
            });
        }
        let req: ConnectRequest = decode_payload(data)?;

        let target = Identity::parse(&req.target_email).ok_or(ProtocolError::UserOffline)?;
        self.relay.record_pairing(&identity, &target);

        let target_conn = self
            .relay
            .registry()
            .lookup_by_identity(&target)
            .ok_or(ProtocolError::UserOffline)?;

        let session_id = self.relay.sessions().create_from_pairing(&self.conn);
        tracing::info!(
            "Pairing {} -> {} in session {}",
            identity.hash().short(),
            target.hash().short(),
            session_id
        );

        self.relay
            .fan_out(
                &[target_conn],
                &ServerFrame::JoinRequest {
                    session_id,
                    intro: PeerIntro::new(&identity, req.profile),
                },
            )
            .await;
        Ok(())
    }

    async fn handle_join_accept(
        &self,
        session_id: SessionId,
        profile: PeerProfile,
    ) -> ProtocolResult<()> {
        let identity = self.identity()?;

        let Some(others) = self.relay.sessions().join_on_accept(&session_id, &self.conn) else {
            tracing::debug!("JOIN_ACCEPT for unknown session {}", session_id);
            return Ok(());
        };

        self.relay
            .fan_out(
                &others,
                &ServerFrame::JoinAccept {
                    session_id,
                    intro: PeerIntro::new(&identity, profile),
                },
            )
            .await;
        Ok(())
    }

    async fn handle_join_deny(&self, session_id: SessionId) -> ProtocolResult<()> {
        let Some(others) = self.relay.sessions().peers(&session_id, self.conn.id()) else {
            tracing::debug!("JOIN_DENY for unknown session {}", session_id);
            return Ok(());
        };

        self.relay
            .fan_out(&others, &ServerFrame::JoinDenied { session_id })
            .await;
        Ok(())
    }

    async fn handle_reattach(&self, session_id: SessionId) -> ProtocolResult<()> {
        self.validate_session_id(&session_id)?;

        let others = self.relay.sessions().reattach(&session_id, &self.conn);
        tracing::info!(
            "Connection {} reattached to session {} ({} peers)",
            self.conn.id(),
            session_id,
            others.len()
        );

        if !others.is_empty() {
            let online = ServerFrame::PeerOnline { session_id };
            self.relay.fan_out(&others, &online).await;
            self.reply(online).await;
        }
        Ok(())
    }

    async fn handle_message(
        &self,
        session_id: SessionId,
        ack_requested: bool,
        data: Option<serde_json::Value>,
    ) -> ProtocolResult<()> {
        let identity = self.identity()?;
        self.validate_session_id(&session_id)?;

        // Rate checks run before the payload is decoded
        if !self.conn.allow_message_at(Instant::now()) {
            return Err(ProtocolError::RateLimited {
                reason: RateLimitError::MessageLimitExceeded.to_string(),
            });
        }
        self.relay
            .rate_limits()
            .check_global()
            .map_err(|e| ProtocolError::RateLimited {
                reason: e.to_string(),
            })?;

        let body: MessageBody = decode_payload(data)?;
        if body.payload.is_empty() {
            return Err(ProtocolError::MalformedFrame {
                reason: "empty payload".to_string(),
            });
        }
        let limit = self.relay.config().limits.max_payload_bytes;
        if body.payload.len() > limit {
            return Err(ProtocolError::PayloadTooLarge {
                size: body.payload.len(),
                limit,
            });
        }

        let targets = self
            .relay
            .sessions()
            .relay_targets(&session_id, &self.conn)?;
        let delivered = self
            .relay
            .fan_out(
                &targets,
                &ServerFrame::Message {
                    session_id: session_id.clone(),
                    sender_tag: identity.hash(),
                    body,
                },
            )
            .await;

        let metrics = self.relay.metrics();
        metrics
            .messages_relayed
            .fetch_add(delivered as u64, Ordering::Relaxed);
        if delivered == 0 {
            metrics.delivery_failures.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(
            "Relayed MSG in {} to {}/{} recipients",
            session_id,
            delivered,
            targets.len()
        );

        if ack_requested {
            let ack = if delivered > 0 {
                ServerFrame::Delivered { session_id }
            } else {
                ServerFrame::DeliveryFailed { session_id }
            };
            self.reply(ack).await;
        }
        Ok(())
    }

    async fn handle_rtc(&self, mut frame: Frame) -> ProtocolResult<()> {
        let identity = self.identity()?;

        let Some(peers) = self
            .relay
            .sessions()
            .peers(&frame.session_id, self.conn.id())
        else {
            tracing::debug!(
                "Dropping {:?} for unknown session {}",
                frame.frame_type,
                frame.session_id
            );
            return Ok(());
        };

        // The tag is always the real sender, whatever the client claimed
        frame.sender_tag = Some(identity.hash());
        self.relay.forward(&peers, &frame).await;
        Ok(())
    }

    async fn handle_turn_credentials(&self) -> ProtocolResult<()> {
        let identity = self.identity()?;
        let creds = turn_credentials(&self.relay.config().turn, &identity, unix_now());
        self.reply(ServerFrame::TurnCredentials(creds)).await;
        Ok(())
    }

    fn identity(&self) -> ProtocolResult<Identity> {
        self.conn.identity().ok_or(ProtocolError::AuthRequired)
    }

    fn validate_session_id(&self, session_id: &SessionId) -> ProtocolResult<()> {
        let max = self.relay.config().limits.max_session_id_len;
        if session_id.is_empty() || session_id.len() > max {
            return Err(ProtocolError::InvalidSessionId);
        }
        Ok(())
    }

    async fn reply(&self, frame: ServerFrame) {
        if let Err(e) = self.conn.send(&frame).await {
            tracing::debug!(
                "Failed to send {:?} to {}: {}",
                frame.frame_type(),
                self.conn.id(),
                e
            );
        }
    }

    async fn report(&self, error: &ProtocolError) {
        let metrics = self.relay.metrics();
        metrics.errors_total.fetch_add(1, Ordering::Relaxed);
        if error.is_rate_limit() {
            metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        }

        if error.is_fatal() {
            tracing::warn!("Closing {}: {}", self.conn.id(), error);
        } else {
            tracing::debug!("Protocol error on {}: {}", self.conn.id(), error);
        }

        self.reply(ServerFrame::error(error.code(), error.to_string()))
            .await;
    }
}

/// Decode a payload kept raw by [`ClientFrame`], treating absence as the default.
fn decode_payload<T: DeserializeOwned + Default>(
    data: Option<serde_json::Value>,
) -> ProtocolResult<T> {
    match data {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value).map_err(|e| ProtocolError::MalformedFrame {
            reason: e.to_string(),
        }),
    }
}
