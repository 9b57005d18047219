//! Error types for signal-relay.

use crate::auth::AuthError;
use std::path::PathBuf;

/// Main error type for signal-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Protocol layer errors.
///
/// Every variant is reported to the offending connection as an `ERROR`
/// frame carrying [`ProtocolError::code`]. Fatal variants additionally close
/// the connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame sent before `AUTH` succeeded.
    #[error("Auth required")]
    AuthRequired,

    /// Credential verification failed.
    #[error("Auth failed: {0}")]
    Auth(#[from] AuthError),

    /// Identity already bound to another live connection.
    #[error("Already logged in on another device")]
    AlreadyOnline,

    /// Too many provider logins from this address.
    #[error("Too many login attempts. Try again later.")]
    TooManyAttempts,

    /// Message rate exceeded.
    #[error("Rate limit exceeded: {reason}")]
    RateLimited {
        /// Which limit was hit.
        reason: String,
    },

    /// Pairing request sent too soon after the previous one.
    #[error("Rate limit exceeded: Wait {secs}s between connection requests")]
    CooldownActive {
        /// Configured cool-down.
        secs: u64,
    },

    /// Pairing target is not connected.
    #[error("User not online")]
    UserOffline,

    /// Sender is not a member of the session it wrote to.
    #[error("Not a member of this session")]
    NotMember,

    /// Session id empty or too long.
    #[error("Invalid session id")]
    InvalidSessionId,

    /// Payload exceeds the configured maximum.
    #[error("Message payload too large: {size} > {limit}")]
    PayloadTooLarge {
        /// Actual size.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },

    /// Frame could not be understood.
    #[error("Invalid message format: {reason}")]
    MalformedFrame {
        /// Why the frame was rejected.
        reason: String,
    },

    /// The connection is no longer registered.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl ProtocolError {
    /// Stable machine-readable code sent in `ERROR` frames.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::AuthRequired => "AUTH_REQUIRED",
            ProtocolError::Auth(e) => e.code(),
            ProtocolError::AlreadyOnline => "ALREADY_ONLINE",
            ProtocolError::TooManyAttempts => "TOO_MANY_ATTEMPTS",
            ProtocolError::RateLimited { .. } => "RATE_LIMITED",
            ProtocolError::CooldownActive { .. } => "COOLDOWN_ACTIVE",
            ProtocolError::UserOffline => "USER_OFFLINE",
            ProtocolError::NotMember => "NOT_MEMBER",
            ProtocolError::InvalidSessionId => "INVALID_SESSION_ID",
            ProtocolError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            ProtocolError::MalformedFrame { .. } => "MALFORMED_FRAME",
            ProtocolError::ConnectionClosed => "CONNECTION_CLOSED",
        }
    }

    /// Whether the connection must be closed after reporting this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::TooManyAttempts
                | ProtocolError::AlreadyOnline
                | ProtocolError::ConnectionClosed
        )
    }

    /// Whether this error counts as a rate-limit hit for metrics.
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            ProtocolError::TooManyAttempts
                | ProtocolError::RateLimited { .. }
                | ProtocolError::CooldownActive { .. }
        )
    }
}

impl From<signal_types::FrameError> for ProtocolError {
    fn from(e: signal_types::FrameError) -> Self {
        ProtocolError::MalformedFrame {
            reason: e.to_string(),
        }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_abuse_and_stale_errors_are_fatal() {
        assert!(ProtocolError::TooManyAttempts.is_fatal());
        assert!(ProtocolError::AlreadyOnline.is_fatal());
        assert!(!ProtocolError::AuthRequired.is_fatal());
        assert!(!ProtocolError::NotMember.is_fatal());
        assert!(!ProtocolError::RateLimited {
            reason: "x".into()
        }
        .is_fatal());
        assert!(!ProtocolError::Auth(AuthError::Expired).is_fatal());
    }

    #[test]
    fn codes_are_screaming_snake() {
        let errors = [
            ProtocolError::AuthRequired,
            ProtocolError::UserOffline,
            ProtocolError::InvalidSessionId,
            ProtocolError::Auth(AuthError::BadSignature),
            ProtocolError::PayloadTooLarge { size: 2, limit: 1 },
        ];
        for e in errors {
            assert!(e
                .code()
                .chars()
                .all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn frame_errors_map_to_malformed() {
        let err: ProtocolError = signal_types::FrameError::UnknownType.into();
        assert_eq!(err.code(), "MALFORMED_FRAME");
    }

    #[test]
    fn messages_match_client_expectations() {
        assert_eq!(ProtocolError::AuthRequired.to_string(), "Auth required");
        assert_eq!(ProtocolError::UserOffline.to_string(), "User not online");
        assert_eq!(
            ProtocolError::CooldownActive { secs: 5 }.to_string(),
            "Rate limit exceeded: Wait 5s between connection requests"
        );
    }
}
