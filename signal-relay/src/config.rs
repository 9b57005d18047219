//! Configuration loading for signal-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`), then
//! deployment secrets are overlaid from the environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `TURN_SECRET` | `turn.secret` (required) |
//! | `TURN_HOST` | `turn.host` |
//! | `AUTH_SESSION_SECRET` | `auth.session_secret_seed` |
//! | `PORT` | port of `server.bind_address` |

use serde::Deserialize;
use std::path::PathBuf;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A secret string that never appears in logs.
#[derive(Clone, Default, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is empty after trimming.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// Root configuration for signal-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// TURN credential configuration.
    #[serde(default)]
    pub turn: TurnConfig,
    /// Rate limiting and size limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Audit storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Cleanup task configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WebSocket listener (default: 0.0.0.0:9000).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Deadline for a single outbound frame write in milliseconds (default: 2000).
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Interval between liveness probes in seconds (default: 10).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Seed for the continuation-token signing key.
    #[serde(default)]
    pub session_secret_seed: Secret,
    /// Lifetime of continuation tokens in seconds (default: 30 days).
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    /// Identity provider token introspection endpoint.
    #[serde(default = "default_provider_url")]
    pub provider_url: String,
    /// Timeout for one introspection call in seconds (default: 5).
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
    /// Client application ids accepted in the `aud` claim.
    #[serde(default = "default_allowed_audiences")]
    pub allowed_audiences: Vec<String>,
    /// Provider-path login attempts allowed per source address per window (default: 3).
    #[serde(default = "default_attempts_per_window")]
    pub attempts_per_window: usize,
    /// Length of the login attempt window in seconds (default: 60).
    #[serde(default = "default_attempt_window")]
    pub attempt_window_secs: u64,
    /// Start even without a token seed (local development only).
    ///
    /// Tokens are then signed with a key derived from the empty string,
    /// which anyone can reproduce.
    #[serde(default)]
    pub allow_blank_session_secret: bool,
}

/// TURN credential configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnConfig {
    /// Shared secret with the TURN server. Required.
    #[serde(default)]
    pub secret: Secret,
    /// TURN server hostname.
    #[serde(default)]
    pub host: String,
    /// TURN server port (default: 3478).
    #[serde(default = "default_turn_port")]
    pub port: u16,
    /// Credential lifetime in seconds (default: 600).
    #[serde(default = "default_turn_ttl")]
    pub ttl_secs: u64,
}

/// Rate limiting and size limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Messages allowed per connection per second (default: 100).
    #[serde(default = "default_messages_per_second")]
    pub messages_per_second: u32,
    /// Minimum seconds between pairing requests on one connection (default: 5).
    #[serde(default = "default_pairing_cooldown")]
    pub pairing_cooldown_secs: u64,
    /// Maximum size of one inbound frame in bytes (default: 1MB).
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Maximum size of an encrypted message payload in bytes (default: 400KB).
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Maximum session id length in bytes (default: 128).
    #[serde(default = "default_max_session_id_len")]
    pub max_session_id_len: usize,
    /// Maximum new connections per source IP per minute (default: 60).
    #[serde(default = "default_connections_per_ip")]
    pub connections_per_ip: u32,
    /// Relayed messages per second across all clients (default: 10000).
    #[serde(default = "default_global_messages_per_second")]
    pub global_messages_per_second: u32,
}

/// Audit storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite audit database.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Record hashed pairing requests (default: true).
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

/// Cleanup task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Enable cleanup task (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cleanup interval in seconds (default: 300).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// How long a session with no members survives before it is swept (default: 3600).
    #[serde(default = "default_abandoned_ttl")]
    pub abandoned_session_ttl_secs: u64,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_write_timeout_ms() -> u64 {
    2000
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_token_ttl() -> u64 {
    30 * 24 * 60 * 60 // 30 days in seconds
}

fn default_provider_url() -> String {
    "https://oauth2.googleapis.com/tokeninfo".to_string()
}

fn default_provider_timeout() -> u64 {
    5
}

fn default_allowed_audiences() -> Vec<String> {
    vec![
        // Web / desktop
        "588653192623-aqs0s01hv62pbp5p7pe3r0h7mce8m10l.apps.googleusercontent.com".to_string(),
        // Android
        "588653192623-lrcr1rs3meptlo4a2dkt6aam6jpvoua1.apps.googleusercontent.com".to_string(),
    ]
}

fn default_attempts_per_window() -> usize {
    3
}

fn default_attempt_window() -> u64 {
    60
}

fn default_turn_port() -> u16 {
    3478
}

fn default_turn_ttl() -> u64 {
    600
}

fn default_messages_per_second() -> u32 {
    100
}

fn default_pairing_cooldown() -> u64 {
    5
}

fn default_max_frame_bytes() -> usize {
    1024 * 1024 // 1MB
}

fn default_max_payload_bytes() -> usize {
    400 * 1024 // 400KB
}

fn default_max_session_id_len() -> usize {
    128
}

fn default_connections_per_ip() -> u32 {
    60
}

fn default_global_messages_per_second() -> u32 {
    10_000
}

fn default_database_path() -> PathBuf {
    PathBuf::from("audit.db")
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_abandoned_ttl() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            write_timeout_ms: default_write_timeout_ms(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_secret_seed: Secret::default(),
            token_ttl_secs: default_token_ttl(),
            provider_url: default_provider_url(),
            provider_timeout_secs: default_provider_timeout(),
            allowed_audiences: default_allowed_audiences(),
            attempts_per_window: default_attempts_per_window(),
            attempt_window_secs: default_attempt_window(),
            allow_blank_session_secret: false,
        }
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            secret: Secret::default(),
            host: String::new(),
            port: default_turn_port(),
            ttl_secs: default_turn_ttl(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            messages_per_second: default_messages_per_second(),
            pairing_cooldown_secs: default_pairing_cooldown(),
            max_frame_bytes: default_max_frame_bytes(),
            max_payload_bytes: default_max_payload_bytes(),
            max_session_id_len: default_max_session_id_len(),
            connections_per_ip: default_connections_per_ip(),
            global_messages_per_second: default_global_messages_per_second(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            audit_enabled: default_true(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_true(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_cleanup_interval(),
            abandoned_session_ttl_secs: default_abandoned_ttl(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Overlay deployment secrets from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary key lookup (environment-style names).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("TURN_SECRET") {
            self.turn.secret = Secret::new(secret);
        }
        if let Some(host) = lookup("TURN_HOST") {
            self.turn.host = host;
        }
        if let Some(seed) = lookup("AUTH_SESSION_SECRET") {
            self.auth.session_secret_seed = Secret::new(seed);
        }
        if let Some(port) = lookup("PORT") {
            let host = self
                .server
                .bind_address
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.server.bind_address = format!("{}:{}", host, port.trim());
        }
    }

    /// Check invariants the relay relies on at startup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] if the TURN secret or (unless
    /// `auth.allow_blank_session_secret` is set) the token seed is unset, and
    /// [`ConfigError::Invalid`] for limits that must be non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.turn.secret.is_blank() {
            return Err(ConfigError::MissingSecret { name: "TURN_SECRET" });
        }
        if self.auth.session_secret_seed.is_blank() && !self.auth.allow_blank_session_secret {
            return Err(ConfigError::MissingSecret {
                name: "AUTH_SESSION_SECRET",
            });
        }

        let non_zero = [
            ("limits.messages_per_second", self.limits.messages_per_second as u64),
            ("limits.connections_per_ip", self.limits.connections_per_ip as u64),
            (
                "limits.global_messages_per_second",
                self.limits.global_messages_per_second as u64,
            ),
            ("auth.attempts_per_window", self.auth.attempts_per_window as u64),
            ("server.write_timeout_ms", self.server.write_timeout_ms),
            ("server.heartbeat_interval_secs", self.server.heartbeat_interval_secs),
            ("cleanup.interval_secs", self.cleanup.interval_secs),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A required secret is not set.
    #[error("{name} is not set")]
    MissingSecret {
        /// Environment variable name of the secret.
        name: &'static str,
    },
    /// A value is out of range.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid_except_turn_secret() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:9000");
        assert_eq!(config.server.write_timeout_ms, 2000);
        assert_eq!(config.auth.token_ttl_secs, 30 * 24 * 60 * 60);
        assert_eq!(config.auth.attempts_per_window, 3);
        assert_eq!(config.limits.messages_per_second, 100);
        assert_eq!(config.limits.max_frame_bytes, 1024 * 1024);
        assert_eq!(config.limits.max_payload_bytes, 400 * 1024);
        assert_eq!(config.limits.max_session_id_len, 128);
        assert_eq!(config.turn.ttl_secs, 600);

        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSecret { name: "TURN_SECRET" })
        ));
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:5000"
heartbeat_interval_secs = 30

[auth]
session_secret_seed = "seed"
allowed_audiences = ["web-client"]

[turn]
secret = "turn-secret"
host = "turn.example.com"

[limits]
messages_per_second = 5

[storage]
database = "/data/audit.db"

[cleanup]
interval_secs = 1800
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert_eq!(config.server.heartbeat_interval_secs, 30);
        assert_eq!(config.auth.session_secret_seed.expose(), "seed");
        assert_eq!(config.auth.allowed_audiences, vec!["web-client".to_string()]);
        assert_eq!(config.turn.host, "turn.example.com");
        assert_eq!(config.limits.messages_per_second, 5);
        assert_eq!(config.storage.database, PathBuf::from("/data/audit.db"));
        assert_eq!(config.cleanup.interval_secs, 1800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config: Config = toml::from_str("[limits]\n").unwrap();
        assert_eq!(config.limits.pairing_cooldown_secs, 5);
        assert_eq!(config.turn.port, 3478);
        assert_eq!(config.cleanup.abandoned_session_ttl_secs, 3600);
        assert!(config.storage.audit_enabled);
    }

    #[test]
    fn environment_overrides_secrets_and_port() {
        let env: HashMap<&str, &str> = [
            ("TURN_SECRET", "from-env"),
            ("TURN_HOST", "turn.internal"),
            ("AUTH_SESSION_SECRET", "seed-env"),
            ("PORT", "8443"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.turn.secret.expose(), "from-env");
        assert_eq!(config.turn.host, "turn.internal");
        assert_eq!(config.auth.session_secret_seed.expose(), "seed-env");
        assert_eq!(config.server.bind_address, "0.0.0.0:8443");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut config = Config::default();
        config.turn.secret = Secret::new("s");
        config.auth.session_secret_seed = Secret::new("seed");
        config.limits.messages_per_second = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "limits.messages_per_second",
                ..
            })
        ));
    }

    #[test]
    fn blank_session_secret_is_rejected_unless_allowed() {
        let mut config = Config::default();
        config.turn.secret = Secret::new("s");
        config.auth.session_secret_seed = Secret::new("   ");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSecret {
                name: "AUTH_SESSION_SECRET"
            })
        ));

        config.auth.allow_blank_session_secret = true;
        assert!(config.validate().is_ok());

        let config: Config = toml::from_str(
            "[auth]\nallow_blank_session_secret = true\n[turn]\nsecret = \"s\"\n",
        )
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let mut config = Config::default();
        config.turn.secret = Secret::new("hunter2");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "[turn]\nsecret = \"abc\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.turn.secret.expose(), "abc");

        let missing = Config::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::ReadError { .. })));
    }
}
