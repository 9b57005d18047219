//! Self-issued continuation tokens.
//!
//! Format: `sess:{expiry}:{identity}:{hex(hmac_sha256(key, "sess:{expiry}:{identity}"))}`.
//! The signing key is `SHA-256(trim(seed))`, derived once at startup.

use super::AuthError;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use signal_types::Identity;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Tag that marks a credential as a continuation token.
pub const TOKEN_TAG: &str = "sess";

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct SigningKey([u8; 32]);

/// Mints and verifies continuation tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    key: SigningKey,
    ttl_secs: u64,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("key", &"[REDACTED]")
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

impl TokenIssuer {
    /// Derive the signing key from a configured seed.
    pub fn from_seed(seed: &str, ttl_secs: u64) -> Self {
        let digest = Sha256::digest(seed.trim().as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self {
            key: SigningKey(key),
            ttl_secs,
        }
    }

    /// Whether a credential is structurally a continuation token.
    pub fn is_continuation_token(credential: &str) -> bool {
        credential
            .strip_prefix(TOKEN_TAG)
            .is_some_and(|rest| rest.starts_with(':'))
    }

    /// Issue a token for `identity` that expires `ttl_secs` from now.
    pub fn issue(&self, identity: &Identity) -> String {
        self.issue_at(identity, unix_now())
    }

    /// Issue a token as if the current time were `now` (unix seconds).
    pub fn issue_at(&self, identity: &Identity, now: u64) -> String {
        let expiry = now.saturating_add(self.ttl_secs);
        let data = format!("{}:{}:{}", TOKEN_TAG, expiry, identity.as_str());
        let signature = hex::encode(self.mac(&data).finalize().into_bytes());
        format!("{}:{}", data, signature)
    }

    /// Verify a token against the current time.
    ///
    /// # Errors
    ///
    /// [`AuthError::MalformedToken`] if the token has fewer than four fields,
    /// [`AuthError::BadSignature`] if the signature does not match, and
    /// [`AuthError::Expired`] if the expiry is not in the future.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.verify_at(token, unix_now())
    }

    /// Verify a token as if the current time were `now` (unix seconds).
    pub fn verify_at(&self, token: &str, now: u64) -> Result<Identity, AuthError> {
        // The identity may itself contain ':', so the signature is split off the end
        let mut fields = token.splitn(3, ':');
        let (Some(tag), Some(expiry), Some(rest)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(AuthError::MalformedToken);
        };
        let Some((identity, signature)) = rest.rsplit_once(':') else {
            return Err(AuthError::MalformedToken);
        };
        if tag != TOKEN_TAG {
            return Err(AuthError::MalformedToken);
        }

        let data = format!("{}:{}:{}", tag, expiry, identity);
        let signature = hex::decode(signature).map_err(|_| AuthError::BadSignature)?;
        // verify_slice compares in constant time
        self.mac(&data)
            .verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        let expiry: u64 = expiry.parse().map_err(|_| AuthError::MalformedToken)?;
        if expiry <= now {
            return Err(AuthError::Expired);
        }

        Identity::parse(identity).ok_or(AuthError::MalformedToken)
    }

    /// Configured token lifetime in seconds.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    fn mac(&self, data: &str) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.key.0).expect("HMAC accepts keys of any length");
        mac.update(data.as_bytes());
        mac
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
