//! Identity verification.
//!
//! Two strategies sit behind [`IdentityVerifier::verify`]:
//! - `sess:` continuation tokens are checked locally by [`TokenIssuer`]
//! - anything else is handed to the external [`IdentityProvider`], and on
//!   success a fresh continuation token is minted

mod provider;
mod token;

pub use provider::{IdentityProvider, ProviderClaims, TokenInfoProvider};
pub use token::{TokenIssuer, TOKEN_TAG};

pub(crate) use token::unix_now;

use crate::config::AuthConfig;
use signal_types::Identity;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Continuation token does not have the expected shape.
    #[error("malformed session token")]
    MalformedToken,

    /// Continuation token signature does not verify.
    #[error("invalid signature")]
    BadSignature,

    /// Continuation token expiry has passed.
    #[error("token expired")]
    Expired,

    /// The identity provider did not accept the credential.
    #[error("identity provider rejected credential: {reason}")]
    ProviderRejected {
        /// Provider-side reason.
        reason: String,
    },

    /// The credential was issued for an unknown client application.
    #[error("invalid token audience: {audience}")]
    AudienceMismatch {
        /// The audience claim that was rejected.
        audience: String,
    },
}

impl AuthError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MalformedToken => "MALFORMED_TOKEN",
            AuthError::BadSignature => "BAD_SIGNATURE",
            AuthError::Expired => "EXPIRED",
            AuthError::ProviderRejected { .. } => "PROVIDER_REJECTED",
            AuthError::AudienceMismatch { .. } => "AUDIENCE_MISMATCH",
        }
    }
}

/// A verified identity and the continuation token the client should keep.
#[derive(Clone, PartialEq, Eq)]
pub struct Verified {
    /// Normalized identity.
    pub identity: Identity,
    /// Continuation token (echoed back when the client used one).
    pub token: String,
}

impl std::fmt::Debug for Verified {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verified")
            .field("identity", &self.identity)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Converts an opaque credential into an identity.
#[derive(Clone)]
pub struct IdentityVerifier {
    tokens: TokenIssuer,
    provider: Arc<dyn IdentityProvider>,
    allowed_audiences: HashSet<String>,
    provider_timeout: Duration,
}

impl std::fmt::Debug for IdentityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityVerifier")
            .field("tokens", &self.tokens)
            .field("allowed_audiences", &self.allowed_audiences)
            .field("provider_timeout", &self.provider_timeout)
            .finish_non_exhaustive()
    }
}

impl IdentityVerifier {
    /// Build a verifier from configuration and a provider backend.
    pub fn new(config: &AuthConfig, provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            tokens: TokenIssuer::from_seed(
                config.session_secret_seed.expose(),
                config.token_ttl_secs,
            ),
            provider,
            allowed_audiences: config.allowed_audiences.iter().cloned().collect(),
            provider_timeout: Duration::from_secs(config.provider_timeout_secs),
        }
    }

    /// Access the token issuer.
    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Verify a credential.
    ///
    /// Continuation tokens are verified locally and echoed back unchanged.
    /// Other credentials go to the identity provider (bounded by the
    /// configured timeout); on success a new continuation token is issued.
    pub async fn verify(&self, credential: &str) -> Result<Verified, AuthError> {
        if TokenIssuer::is_continuation_token(credential) {
            let identity = self.tokens.verify(credential)?;
            return Ok(Verified {
                identity,
                token: credential.to_string(),
            });
        }

        let claims = tokio::time::timeout(self.provider_timeout, self.provider.introspect(credential))
            .await
            .map_err(|_| AuthError::ProviderRejected {
                reason: format!("timed out after {:?}", self.provider_timeout),
            })??;

        if !self.allowed_audiences.contains(&claims.audience) {
            return Err(AuthError::AudienceMismatch {
                audience: claims.audience,
            });
        }

        let identity = Identity::parse(&claims.email).ok_or_else(|| AuthError::ProviderRejected {
            reason: "missing email claim".to_string(),
        })?;
        let token = self.tokens.issue(&identity);

        Ok(Verified { identity, token })
    }
}
