//! Typed protocol messages carried inside a [`Frame`].
//!
//! [`ClientFrame`] is everything a client may send; [`ServerFrame`] is
//! everything the relay emits. Both convert to and from the generic
//! [`Frame`] envelope.

use serde::{Deserialize, Serialize};

use crate::{Frame, FrameError, FrameType, Identity, IdentityHash, SessionId};

/// All frames a client may send, after envelope validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Authenticate with a provider credential or a continuation token
    Auth(AuthRequest),
    /// Ask to pair with another identity
    ///
    /// The [`ConnectRequest`] payload stays undecoded until the relay has
    /// checked the pairing cool-down.
    ConnectRequest {
        /// Undecoded payload
        data: Option<serde_json::Value>,
    },
    /// Accept a pairing request
    JoinAccept {
        /// Session being accepted
        session_id: SessionId,
        /// Accepter's key material and display metadata
        profile: PeerProfile,
    },
    /// Decline a pairing request
    JoinDeny {
        /// Session being declined
        session_id: SessionId,
    },
    /// Re-enter a session after reconnecting
    Reattach {
        /// Session to rejoin (client supplied)
        session_id: SessionId,
    },
    /// Relay an opaque payload
    ///
    /// The payload stays undecoded until the relay has run its rate check.
    Message {
        /// Target session
        session_id: SessionId,
        /// Whether a delivery confirmation is wanted
        ack_requested: bool,
        /// Undecoded payload
        data: Option<serde_json::Value>,
    },
    /// WebRTC signaling, forwarded verbatim
    Rtc(Frame),
    /// Ask for TURN credentials
    GetTurnCredentials,
}

impl TryFrom<Frame> for ClientFrame {
    type Error = FrameError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        match frame.frame_type {
            FrameType::Auth => Ok(ClientFrame::Auth(frame.decode_data()?)),
            FrameType::ConnectRequest => Ok(ClientFrame::ConnectRequest { data: frame.data }),
            FrameType::JoinAccept => Ok(ClientFrame::JoinAccept {
                profile: frame.decode_data()?,
                session_id: frame.session_id,
            }),
            FrameType::JoinDeny => Ok(ClientFrame::JoinDeny {
                session_id: frame.session_id,
            }),
            FrameType::Reattach => Ok(ClientFrame::Reattach {
                session_id: frame.session_id,
            }),
            FrameType::Message => Ok(ClientFrame::Message {
                session_id: frame.session_id,
                ack_requested: frame.ack_requested,
                data: frame.data,
            }),
            FrameType::RtcOffer | FrameType::RtcAnswer | FrameType::RtcIce => {
                Ok(ClientFrame::Rtc(frame))
            }
            FrameType::GetTurnCredentials => Ok(ClientFrame::GetTurnCredentials),
            FrameType::AuthSuccess
            | FrameType::Error
            | FrameType::JoinRequest
            | FrameType::JoinDenied
            | FrameType::PeerOnline
            | FrameType::PeerOffline
            | FrameType::Delivered
            | FrameType::DeliveryFailed
            | FrameType::TurnCredentials
            | FrameType::Ping
            | FrameType::Unknown => Err(FrameError::UnknownType),
        }
    }
}

impl FrameType {
    /// Whether a client must be authenticated before sending this type.
    ///
    /// Only `AUTH` itself is exempt. Unknown types are answered with a
    /// type error rather than an auth error.
    pub fn requires_auth(self) -> bool {
        !matches!(self, FrameType::Auth | FrameType::Unknown)
    }
}

/// `AUTH` payload.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthRequest {
    /// Provider id token or `sess:` continuation token
    pub token: String,
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Public key material and display metadata a peer shares when pairing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PeerProfile {
    /// Opaque public key blob (never interpreted by the relay)
    pub public_key: String,
    /// Display name
    pub sender_name: String,
    /// Avatar blob or URL
    pub sender_avatar: String,
    /// Display name revision
    pub sender_name_ver: i64,
    /// Avatar revision
    pub sender_avatar_ver: i64,
}

/// `CONNECT_REQ` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Identity to pair with (normalized by the relay)
    pub target_email: String,
    /// Requester's key material and display metadata
    #[serde(flatten)]
    pub profile: PeerProfile,
}

/// `MSG` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageBody {
    /// Encrypted content, opaque to the relay
    pub payload: String,
}

/// Peer introduction sent with `JOIN_REQUEST` and `JOIN_ACCEPT`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIntro {
    /// Opaque public key blob
    pub public_key: String,
    /// Authenticated identity of the introduced peer
    pub email: String,
    /// SHA-256 of that identity
    pub email_hash: String,
    /// Display name
    pub name: String,
    /// Avatar
    pub avatar: String,
    /// Display name revision
    pub name_version: i64,
    /// Avatar revision
    pub avatar_version: i64,
}

impl PeerIntro {
    /// Introduce `identity` using the profile it sent.
    pub fn new(identity: &Identity, profile: PeerProfile) -> Self {
        Self {
            public_key: profile.public_key,
            email: identity.as_str().to_string(),
            email_hash: identity.hash().as_str().to_string(),
            name: profile.sender_name,
            avatar: profile.sender_avatar,
            name_version: profile.sender_name_ver,
            avatar_version: profile.sender_avatar_ver,
        }
    }
}

/// `AUTH_SUCCESS` payload.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSuccess {
    /// Authenticated identity
    pub email: String,
    /// Continuation token for the next login
    pub token: String,
}

impl std::fmt::Debug for AuthSuccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSuccess")
            .field("email", &"[REDACTED]")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// `ERROR` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `AUTH_REQUIRED`
    pub code: String,
    /// Human-readable message
    pub message: String,
}

/// `TURN_CREDS` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnCredentials {
    /// TURN server URLs
    pub urls: Vec<String>,
    /// Time-bound username (`{expiry}:{identity}`)
    pub username: String,
    /// HMAC-derived password
    pub credential: String,
    /// Lifetime in seconds
    pub ttl: u64,
}

/// All frames the relay emits.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Authentication succeeded
    AuthSuccess(AuthSuccess),
    /// Typed error
    Error(ErrorBody),
    /// Someone wants to pair with the recipient
    JoinRequest {
        /// Newly formed session
        session_id: SessionId,
        /// The requester
        intro: PeerIntro,
    },
    /// The recipient's pairing request was accepted
    JoinAccept {
        /// Accepted session
        session_id: SessionId,
        /// The accepter
        intro: PeerIntro,
    },
    /// The recipient's pairing request was declined
    JoinDenied {
        /// Declined session
        session_id: SessionId,
    },
    /// A peer is present in the session
    PeerOnline {
        /// Session
        session_id: SessionId,
    },
    /// A peer left the session
    PeerOffline {
        /// Session
        session_id: SessionId,
    },
    /// Relayed opaque payload
    Message {
        /// Session
        session_id: SessionId,
        /// Hash of the sender's identity
        sender_tag: IdentityHash,
        /// Opaque payload
        body: MessageBody,
    },
    /// At least one recipient accepted the write
    Delivered {
        /// Session
        session_id: SessionId,
    },
    /// No recipient accepted the write
    DeliveryFailed {
        /// Session
        session_id: SessionId,
    },
    /// TURN credential bundle
    TurnCredentials(TurnCredentials),
    /// Liveness probe
    Ping,
}

impl ServerFrame {
    /// Build an error frame.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerFrame::Error(ErrorBody {
            code: code.into(),
            message: message.into(),
        })
    }

    /// Wire type of this frame.
    pub fn frame_type(&self) -> FrameType {
        match self {
            ServerFrame::AuthSuccess(_) => FrameType::AuthSuccess,
            ServerFrame::Error(_) => FrameType::Error,
            ServerFrame::JoinRequest { .. } => FrameType::JoinRequest,
            ServerFrame::JoinAccept { .. } => FrameType::JoinAccept,
            ServerFrame::JoinDenied { .. } => FrameType::JoinDenied,
            ServerFrame::PeerOnline { .. } => FrameType::PeerOnline,
            ServerFrame::PeerOffline { .. } => FrameType::PeerOffline,
            ServerFrame::Message { .. } => FrameType::Message,
            ServerFrame::Delivered { .. } => FrameType::Delivered,
            ServerFrame::DeliveryFailed { .. } => FrameType::DeliveryFailed,
            ServerFrame::TurnCredentials(_) => FrameType::TurnCredentials,
            ServerFrame::Ping => FrameType::Ping,
        }
    }

    /// Convert into the wire envelope.
    pub fn into_frame(self) -> Result<Frame, FrameError> {
        let frame = Frame::new(self.frame_type());
        match self {
            ServerFrame::AuthSuccess(body) => frame.with_data(&body),
            ServerFrame::Error(body) => frame.with_data(&body),
            ServerFrame::TurnCredentials(body) => frame.with_data(&body),
            ServerFrame::JoinRequest { session_id, intro }
            | ServerFrame::JoinAccept { session_id, intro } => {
                frame.with_session(session_id).with_data(&intro)
            }
            ServerFrame::Message {
                session_id,
                sender_tag,
                body,
            } => {
                let mut frame = frame.with_session(session_id).with_data(&body)?;
                frame.sender_tag = Some(sender_tag);
                Ok(frame)
            }
            ServerFrame::JoinDenied { session_id }
            | ServerFrame::PeerOnline { session_id }
            | ServerFrame::PeerOffline { session_id }
            | ServerFrame::Delivered { session_id }
            | ServerFrame::DeliveryFailed { session_id } => Ok(frame.with_session(session_id)),
            ServerFrame::Ping => Ok(frame),
        }
    }

    /// Serialize straight to a JSON text message.
    pub fn to_json(&self) -> Result<String, FrameError> {
        self.clone().into_frame()?.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<ClientFrame, FrameError> {
        ClientFrame::try_from(Frame::from_json(json).unwrap())
    }

    #[test]
    fn auth_frame_decodes_token() {
        let frame = parse(r#"{"t":"AUTH","data":{"token":"sess:1:a:b"}}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Auth(AuthRequest {
                token: "sess:1:a:b".into()
            })
        );
    }

    #[test]
    fn connect_request_uses_camel_case_fields() {
        let frame = parse(
            r#"{"t":"CONNECT_REQ","data":{"targetEmail":"Bob@Example.com","publicKey":"pk","senderName":"Alice","senderNameVer":3}}"#,
        )
        .unwrap();
        let ClientFrame::ConnectRequest { data } = frame else {
            panic!("expected ConnectRequest");
        };
        let req: ConnectRequest = serde_json::from_value(data.unwrap()).unwrap();
        assert_eq!(req.target_email, "Bob@Example.com");
        assert_eq!(req.profile.public_key, "pk");
        assert_eq!(req.profile.sender_name, "Alice");
        assert_eq!(req.profile.sender_name_ver, 3);
        assert_eq!(req.profile.sender_avatar, "");
    }

    #[test]
    fn message_keeps_payload_undecoded() {
        let frame = parse(r#"{"t":"MSG","sid":"s","c":true,"data":{"payload":"abc"}}"#).unwrap();
        let ClientFrame::Message {
            session_id,
            ack_requested,
            data,
        } = frame
        else {
            panic!("expected Message");
        };
        assert_eq!(session_id.as_str(), "s");
        assert!(ack_requested);
        assert_eq!(data.unwrap()["payload"], "abc");
    }

    #[test]
    fn rtc_frames_are_kept_verbatim() {
        let json = r#"{"t":"RTC_ICE","sid":"s","data":{"candidate":"c1","sdpMid":"0"}}"#;
        let frame = parse(json).unwrap();
        let ClientFrame::Rtc(inner) = frame else {
            panic!("expected Rtc");
        };
        assert_eq!(inner, Frame::from_json(json).unwrap());
    }

    #[test]
    fn server_only_and_unknown_types_are_rejected() {
        assert!(matches!(
            parse(r#"{"t":"AUTH_SUCCESS"}"#),
            Err(FrameError::UnknownType)
        ));
        assert!(matches!(
            parse(r#"{"t":"WHATEVER"}"#),
            Err(FrameError::UnknownType)
        ));
    }

    #[test]
    fn only_auth_is_exempt_from_authentication() {
        assert!(!FrameType::Auth.requires_auth());
        assert!(FrameType::Message.requires_auth());
        assert!(FrameType::ConnectRequest.requires_auth());
        assert!(FrameType::RtcOffer.requires_auth());
        assert!(FrameType::GetTurnCredentials.requires_auth());
    }

    #[test]
    fn relayed_message_carries_sender_tag() {
        let alice = Identity::parse("alice@example.com").unwrap();
        let json = ServerFrame::Message {
            session_id: SessionId::from("s"),
            sender_tag: alice.hash(),
            body: MessageBody {
                payload: "ciphertext".into(),
            },
        }
        .to_json()
        .unwrap();

        let frame = Frame::from_json(&json).unwrap();
        assert_eq!(frame.frame_type, FrameType::Message);
        assert_eq!(frame.sender_tag, Some(alice.hash()));
        assert!(!json.contains("alice@example.com"));
    }

    #[test]
    fn error_frame_shape() {
        let json = ServerFrame::error("AUTH_REQUIRED", "Auth required")
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"t":"ERROR","data":{"code":"AUTH_REQUIRED","message":"Auth required"}}"#
        );
    }

    #[test]
    fn peer_intro_hashes_identity() {
        let bob = Identity::parse("bob@example.com").unwrap();
        let intro = PeerIntro::new(
            &bob,
            PeerProfile {
                public_key: "bob-pk".into(),
                ..Default::default()
            },
        );
        assert_eq!(intro.email, "bob@example.com");
        assert_eq!(intro.email_hash, bob.hash().as_str());

        let value = serde_json::to_value(&intro).unwrap();
        assert_eq!(value["publicKey"], "bob-pk");
        assert!(value.get("emailHash").is_some());
        assert!(value.get("nameVersion").is_some());
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let req = AuthRequest {
            token: "sess:1:a:secret".into(),
        };
        assert!(!format!("{:?}", req).contains("secret"));
    }
}
