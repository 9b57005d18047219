//! Frame - the JSON wire envelope for every signaling message.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{FrameError, IdentityHash, SessionId};

/// Frame type discriminator (the `t` field on the wire).
///
/// A single closed set covers both directions. Any tag the relay does not
/// know deserializes to [`FrameType::Unknown`] instead of failing the whole
/// frame, so the relay can answer with a typed error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    /// Client authentication
    #[serde(rename = "AUTH")]
    Auth,
    /// Client asks to pair with another identity
    #[serde(rename = "CONNECT_REQ")]
    ConnectRequest,
    /// Client accepts a join request / relay announces the acceptance
    #[serde(rename = "JOIN_ACCEPT")]
    JoinAccept,
    /// Client declines a join request
    #[serde(rename = "JOIN_DENY")]
    JoinDeny,
    /// Client re-enters a session it already belongs to
    #[serde(rename = "REATTACH")]
    Reattach,
    /// Opaque encrypted message
    #[serde(rename = "MSG")]
    Message,
    /// WebRTC offer
    #[serde(rename = "RTC_OFFER")]
    RtcOffer,
    /// WebRTC answer
    #[serde(rename = "RTC_ANSWER")]
    RtcAnswer,
    /// WebRTC ICE candidate
    #[serde(rename = "RTC_ICE")]
    RtcIce,
    /// Request for short-lived TURN credentials
    #[serde(rename = "GET_TURN_CREDS")]
    GetTurnCredentials,
    /// Authentication succeeded
    #[serde(rename = "AUTH_SUCCESS")]
    AuthSuccess,
    /// Typed error
    #[serde(rename = "ERROR")]
    Error,
    /// Pairing request forwarded to the target
    #[serde(rename = "JOIN_REQUEST")]
    JoinRequest,
    /// Pairing request was declined
    #[serde(rename = "JOIN_DENIED")]
    JoinDenied,
    /// A peer (re)joined the session
    #[serde(rename = "PEER_ONLINE")]
    PeerOnline,
    /// A peer left the session
    #[serde(rename = "PEER_OFFLINE")]
    PeerOffline,
    /// At least one peer received the message
    #[serde(rename = "DELIVERED")]
    Delivered,
    /// No peer received the message
    #[serde(rename = "DELIVERED_FAILED")]
    DeliveryFailed,
    /// TURN credential bundle
    #[serde(rename = "TURN_CREDS")]
    TurnCredentials,
    /// Liveness probe
    #[serde(rename = "PING")]
    Ping,
    /// Anything else
    #[serde(rename = "UNKNOWN", other)]
    Unknown,
}

/// The envelope of every frame in both directions.
///
/// The relay only interprets the routing fields; `data` is type-specific and
/// opaque where it carries encrypted content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame type discriminator
    #[serde(rename = "t")]
    pub frame_type: FrameType,
    /// Session this frame is scoped to (empty when not session-scoped)
    #[serde(rename = "sid", default, skip_serializing_if = "SessionId::is_empty")]
    pub session_id: SessionId,
    /// Whether the sender wants a delivery confirmation
    #[serde(rename = "c", default, skip_serializing_if = "std::ops::Not::not")]
    pub ack_requested: bool,
    /// Hash of the sender's identity, populated by the relay only
    #[serde(rename = "sh", default, skip_serializing_if = "Option::is_none")]
    pub sender_tag: Option<IdentityHash>,
    /// Type-specific payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Frame {
    /// Create an empty frame of the given type.
    pub fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            session_id: SessionId::default(),
            ack_requested: false,
            sender_tag: None,
            data: None,
        }
    }

    /// Scope the frame to a session.
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }

    /// Attach a serializable payload.
    pub fn with_data<T: Serialize>(mut self, data: &T) -> Result<Self, FrameError> {
        self.data = Some(serde_json::to_value(data).map_err(FrameError::Serialization)?);
        Ok(self)
    }

    /// Decode the `data` field, treating an absent payload as the default.
    pub fn decode_data<T: DeserializeOwned + Default>(&self) -> Result<T, FrameError> {
        match &self.data {
            None | Some(serde_json::Value::Null) => Ok(T::default()),
            Some(value) => T::deserialize(value).map_err(FrameError::Deserialization),
        }
    }

    /// Serialize to a JSON text message.
    pub fn to_json(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Serialization)
    }

    /// Deserialize from a JSON text message.
    pub fn from_json(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(FrameError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_wire_keys() {
        let frame =
            Frame::from_json(r#"{"t":"MSG","sid":"s1","c":true,"data":{"payload":"x"}}"#).unwrap();
        assert_eq!(frame.frame_type, FrameType::Message);
        assert_eq!(frame.session_id.as_str(), "s1");
        assert!(frame.ack_requested);
        assert!(frame.sender_tag.is_none());
        assert!(frame.data.is_some());
    }

    #[test]
    fn unknown_tag_is_not_a_parse_error() {
        let frame = Frame::from_json(r#"{"t":"FILE_CHUNK","sid":"s1"}"#).unwrap();
        assert_eq!(frame.frame_type, FrameType::Unknown);
    }

    #[test]
    fn missing_type_is_a_parse_error() {
        assert!(matches!(
            Frame::from_json(r#"{"sid":"s1"}"#),
            Err(FrameError::Deserialization(_))
        ));
        assert!(Frame::from_json("not json").is_err());
    }

    #[test]
    fn empty_fields_are_omitted_on_the_wire() {
        let json = Frame::new(FrameType::Ping).to_json().unwrap();
        assert_eq!(json, r#"{"t":"PING"}"#);

        let json = Frame::new(FrameType::PeerOnline)
            .with_session(SessionId::from("abc"))
            .to_json()
            .unwrap();
        assert_eq!(json, r#"{"t":"PEER_ONLINE","sid":"abc"}"#);
    }

    #[derive(Debug, Default, serde::Deserialize)]
    struct Probe {
        #[serde(default)]
        token: String,
    }

    #[test]
    fn decode_data_defaults_when_absent() {
        let frame = Frame::new(FrameType::Auth);
        let probe: Probe = frame.decode_data().unwrap();
        assert!(probe.token.is_empty());
    }

    #[test]
    fn decode_data_rejects_wrong_shape() {
        let mut frame = Frame::new(FrameType::Auth);
        frame.data = Some(serde_json::json!({ "token": 42 }));
        assert!(frame.decode_data::<Probe>().is_err());
    }
}
