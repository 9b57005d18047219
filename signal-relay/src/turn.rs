//! Short-lived TURN credentials (shared-secret REST scheme).
//!
//! The username is `{expiry}:{identity}` and the password is
//! `base64(HMAC-SHA1(secret, username))`, which the TURN server can verify
//! with the same shared secret and no per-user state.

use crate::config::TurnConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use signal_types::{Identity, TurnCredentials};

type HmacSha1 = Hmac<Sha1>;

/// Issue credentials for `identity` as of `now` (unix seconds).
pub fn turn_credentials(config: &TurnConfig, identity: &Identity, now: u64) -> TurnCredentials {
    let expiry = now.saturating_add(config.ttl_secs);
    let username = format!("{}:{}", expiry, identity.as_str());

    let mut mac = HmacSha1::new_from_slice(config.secret.expose().as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(username.as_bytes());
    let credential = STANDARD.encode(mac.finalize().into_bytes());

    TurnCredentials {
        urls: vec![
            format!("turn:{}:{}?transport=udp", config.host, config.port),
            format!("turn:{}:{}?transport=tcp", config.host, config.port),
        ],
        username,
        credential,
        ttl: config.ttl_secs,
    }
}
