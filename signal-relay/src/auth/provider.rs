//! External identity provider introspection.

use super::AuthError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Claims returned by a successful introspection.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderClaims {
    /// Identity the credential was issued to.
    pub email: String,
    /// Client application the credential was issued for.
    pub audience: String,
}

impl std::fmt::Debug for ProviderClaims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClaims")
            .field("email", &"[REDACTED]")
            .field("audience", &self.audience)
            .finish()
    }
}

/// Trait for external credential verification backends.
///
/// Implementations must not hold any relay lock; the call may take as long
/// as its own timeout allows.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange an opaque bearer credential for its claims.
    ///
    /// Returns [`AuthError::ProviderRejected`] if the provider does not
    /// accept the credential.
    async fn introspect(&self, credential: &str) -> Result<ProviderClaims, AuthError>;
}

/// OAuth `tokeninfo` style introspection over HTTPS.
#[derive(Debug, Clone)]
pub struct TokenInfoProvider {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    email: String,
    #[serde(default)]
    aud: String,
}

impl TokenInfoProvider {
    /// Create a provider client with a bounded request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built (TLS backend
    /// initialisation failure).
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl IdentityProvider for TokenInfoProvider {
    async fn introspect(&self, credential: &str) -> Result<ProviderClaims, AuthError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("id_token", credential)])
            .send()
            .await
            .map_err(|e| AuthError::ProviderRejected {
                reason: format!("request failed: {}", e.without_url()),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::ProviderRejected {
                reason: format!("status {}", status.as_u16()),
            });
        }

        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| AuthError::ProviderRejected {
                reason: format!("invalid response: {}", e.without_url()),
            })?;

        Ok(ProviderClaims {
            email: info.email,
            audience: info.aud,
        })
    }
}
