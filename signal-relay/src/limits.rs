//! Rate limiting for signal-relay.
//!
//! Provides protection against login brute forcing, connection flooding and
//! message spam.
//!
//! ## Design Notes
//!
//! - **Login attempts** use an exact sliding-window log per source address:
//!   at most `attempts_per_window` provider logins inside any trailing
//!   window. A rejected check does not record an attempt.
//! - **Messages** use a fixed one-second window per connection
//!   ([`MessageWindow`], owned by the connection itself).
//! - **Pairing** uses a single last-request timestamp per connection
//!   ([`Cooldown`]).
//! - **Connections per IP** and the **global message rate** use the governor
//!   crate's GCRA limiters, keyed and direct respectively.

use crate::config::{AuthConfig, LimitsConfig};
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Sliding-window log of login attempts per source address.
#[derive(Debug)]
pub struct AuthAttemptLimiter {
    attempts: DashMap<IpAddr, VecDeque<Instant>>,
    max_attempts: usize,
    window: Duration,
}

impl AuthAttemptLimiter {
    /// Allow `max_attempts` per trailing `window`.
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: DashMap::new(),
            max_attempts,
            window,
        }
    }

    /// Record an attempt from `addr` now, if the window has room.
    pub fn check(&self, addr: IpAddr) -> Result<(), RateLimitError> {
        self.check_at(addr, Instant::now())
    }

    /// Record an attempt from `addr` at `now`, if the window has room.
    pub fn check_at(&self, addr: IpAddr, now: Instant) -> Result<(), RateLimitError> {
        let mut entry = self.attempts.entry(addr).or_default();
        let log = entry.value_mut();
        prune(log, now, self.window);

        if log.len() >= self.max_attempts {
            return Err(RateLimitError::AuthAttemptsExceeded);
        }
        log.push_back(now);
        Ok(())
    }

    /// Number of tracked addresses.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// Whether no address is tracked.
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Drop addresses with no attempt inside the window.
    pub fn shrink_at(&self, now: Instant) {
        let window = self.window;
        self.attempts.retain(|_, log| {
            prune(log, now, window);
            !log.is_empty()
        });
    }
}

fn prune(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = log.front() {
        if now.saturating_duration_since(*oldest) >= window {
            log.pop_front();
        } else {
            break;
        }
    }
}

/// Fixed-window message counter for one connection.
#[derive(Debug, Clone)]
pub struct MessageWindow {
    limit: u32,
    window: Duration,
    started: Option<Instant>,
    count: u32,
}

impl MessageWindow {
    /// Allow `limit` messages per second.
    pub fn per_second(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::from_secs(1),
            started: None,
            count: 0,
        }
    }

    /// Count a message at `now`; `false` once the window's quota is spent.
    pub fn allow_at(&mut self, now: Instant) -> bool {
        let expired = self
            .started
            .map_or(true, |start| now.saturating_duration_since(start) >= self.window);
        if expired {
            self.started = Some(now);
            self.count = 0;
        }
        self.count = self.count.saturating_add(1);
        self.count <= self.limit
    }
}

/// Minimum spacing between two events on one connection.
#[derive(Debug, Clone)]
pub struct Cooldown {
    period: Duration,
    last: Option<Instant>,
}

impl Cooldown {
    /// Require `period` between events.
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    /// Record an event at `now` unless the previous one was too recent.
    pub fn try_start_at(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.period {
                return false;
            }
        }
        self.last = Some(now);
        true
    }

    /// Configured period.
    pub fn period(&self) -> Duration {
        self.period
    }
}

/// Shared rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Provider-path login attempts per source address.
    auth_limiter: Arc<AuthAttemptLimiter>,

    /// Limits new connections per source IP.
    ///
    /// Configured via `limits.connections_per_ip` (per minute).
    connection_limiter: Arc<KeyedLimiter<IpAddr>>,

    /// Global rate limiter across all clients for relayed messages.
    ///
    /// Prevents aggregate overload even if individual clients are within limits.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("auth_limiter", &self.auth_limiter)
            .field("connection_limiter", &"KeyedLimiter<IpAddr>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configured governor quotas are zero; `Config::validate`
    /// rejects such configurations at startup.
    pub fn new(limits: &LimitsConfig, auth: &AuthConfig) -> Self {
        let connections_per_minute =
            NonZeroU32::new(limits.connections_per_ip).expect("connections_per_ip must be > 0");
        let global_mps = NonZeroU32::new(limits.global_messages_per_second)
            .expect("global_messages_per_second must be > 0");

        Self {
            auth_limiter: Arc::new(AuthAttemptLimiter::new(
                auth.attempts_per_window,
                Duration::from_secs(auth.attempt_window_secs),
            )),
            connection_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(
                connections_per_minute,
            ))),
            global_limiter: Arc::new(RateLimiter::direct(Quota::per_second(global_mps))),
        }
    }

    /// Check if a provider login attempt from `addr` is allowed.
    pub fn check_auth(&self, addr: IpAddr) -> Result<(), RateLimitError> {
        self.auth_limiter.check(addr)
    }

    /// Direct access to the login attempt limiter.
    pub fn auth_limiter(&self) -> &AuthAttemptLimiter {
        &self.auth_limiter
    }

    /// Check if a new connection from `addr` is allowed.
    pub fn check_connection(&self, addr: IpAddr) -> Result<(), RateLimitError> {
        self.connection_limiter
            .check_key(&addr)
            .map_err(|_| RateLimitError::ConnectionLimitExceeded)
    }

    /// Check if the global message rate is within limits.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Get the number of tracked connection keys (for metrics).
    pub fn connection_keys_count(&self) -> usize {
        self.connection_limiter.len()
    }

    /// Evict idle entries from keyed limiters.
    ///
    /// Call periodically from the cleanup task.
    pub fn shrink(&self) {
        self.auth_limiter.shrink_at(Instant::now());
        self.connection_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Too many provider logins from this address.
    AuthAttemptsExceeded,
    /// Too many connection attempts from this address.
    ConnectionLimitExceeded,
    /// Too many messages on this connection.
    MessageLimitExceeded,
    /// Global message rate exceeded across all clients.
    GlobalLimitExceeded,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthAttemptsExceeded => {
                write!(f, "too many login attempts")
            }
            Self::ConnectionLimitExceeded => {
                write!(f, "connection rate limit exceeded")
            }
            Self::MessageLimitExceeded => {
                write!(f, "Too many messages per second")
            }
            Self::GlobalLimitExceeded => {
                write!(f, "global rate limit exceeded")
            }
        }
    }
}

impl std::error::Error for RateLimitError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const OTHER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn three_attempts_per_minute_then_blocked() {
        let limiter = AuthAttemptLimiter::new(3, secs(60));
        let t0 = Instant::now();

        assert!(limiter.check_at(ADDR, t0).is_ok());
        assert!(limiter.check_at(ADDR, t0 + secs(10)).is_ok());
        assert!(limiter.check_at(ADDR, t0 + secs(20)).is_ok());
        assert_eq!(
            limiter.check_at(ADDR, t0 + secs(30)),
            Err(RateLimitError::AuthAttemptsExceeded)
        );
    }

    #[test]
    fn oldest_attempt_ageing_out_frees_one_slot() {
        let limiter = AuthAttemptLimiter::new(3, secs(60));
        let t0 = Instant::now();

        limiter.check_at(ADDR, t0).unwrap();
        limiter.check_at(ADDR, t0 + secs(10)).unwrap();
        limiter.check_at(ADDR, t0 + secs(20)).unwrap();

        // Still inside the window of the first attempt
        assert!(limiter.check_at(ADDR, t0 + secs(59)).is_err());
        // First attempt aged out: exactly one new slot
        assert!(limiter.check_at(ADDR, t0 + secs(60)).is_ok());
        assert!(limiter.check_at(ADDR, t0 + secs(61)).is_err());
        // Second attempt aged out
        assert!(limiter.check_at(ADDR, t0 + secs(70)).is_ok());
    }

    #[test]
    fn rejected_attempts_do_not_extend_the_block() {
        let limiter = AuthAttemptLimiter::new(3, secs(60));
        let t0 = Instant::now();
        for i in 0..3 {
            limiter.check_at(ADDR, t0 + secs(i)).unwrap();
        }
        for i in 3..50 {
            assert!(limiter.check_at(ADDR, t0 + secs(i)).is_err());
        }
        assert!(limiter.check_at(ADDR, t0 + secs(60)).is_ok());
    }

    #[test]
    fn addresses_are_independent() {
        let limiter = AuthAttemptLimiter::new(1, secs(60));
        let t0 = Instant::now();
        assert!(limiter.check_at(ADDR, t0).is_ok());
        assert!(limiter.check_at(ADDR, t0).is_err());
        assert!(limiter.check_at(OTHER, t0).is_ok());
    }

    #[test]
    fn shrink_forgets_idle_addresses() {
        let limiter = AuthAttemptLimiter::new(3, secs(60));
        let t0 = Instant::now();
        limiter.check_at(ADDR, t0).unwrap();
        limiter.check_at(OTHER, t0 + secs(30)).unwrap();
        assert_eq!(limiter.len(), 2);

        limiter.shrink_at(t0 + secs(61));
        assert_eq!(limiter.len(), 1);
        limiter.shrink_at(t0 + secs(91));
        assert!(limiter.is_empty());
    }

    #[test]
    fn message_window_allows_limit_per_second() {
        let mut window = MessageWindow::per_second(100);
        let t0 = Instant::now();

        for i in 0..100 {
            assert!(window.allow_at(t0 + Duration::from_millis(i)), "message {}", i);
        }
        assert!(!window.allow_at(t0 + Duration::from_millis(500)));
        assert!(!window.allow_at(t0 + Duration::from_millis(999)));

        // New window
        assert!(window.allow_at(t0 + secs(1)));
    }

    #[test]
    fn message_window_resets_from_first_message_of_window() {
        let mut window = MessageWindow::per_second(2);
        let t0 = Instant::now();
        assert!(window.allow_at(t0));
        assert!(window.allow_at(t0 + Duration::from_millis(900)));
        assert!(!window.allow_at(t0 + Duration::from_millis(950)));
        // Window started at t0, so it resets at t0 + 1s
        assert!(window.allow_at(t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn cooldown_requires_spacing() {
        let mut cooldown = Cooldown::new(secs(5));
        let t0 = Instant::now();
        assert!(cooldown.try_start_at(t0));
        assert!(!cooldown.try_start_at(t0 + secs(4)));
        assert!(cooldown.try_start_at(t0 + secs(5)));
        assert!(!cooldown.try_start_at(t0 + secs(6)));
    }

    #[test]
    fn connection_limit_allows_within_quota() {
        let limits = LimitsConfig {
            connections_per_ip: 5,
            ..LimitsConfig::default()
        };
        let limits = RateLimits::new(&limits, &AuthConfig::default());

        for _ in 0..5 {
            assert!(limits.check_connection(ADDR).is_ok());
        }
        assert_eq!(
            limits.check_connection(ADDR),
            Err(RateLimitError::ConnectionLimitExceeded)
        );
        assert!(limits.check_connection(OTHER).is_ok());
        assert_eq!(limits.connection_keys_count(), 2);
    }

    #[test]
    fn global_rate_limiter_rejects_excess() {
        let limits = LimitsConfig {
            global_messages_per_second: 5,
            ..LimitsConfig::default()
        };
        let limits = RateLimits::new(&limits, &AuthConfig::default());

        for _ in 0..5 {
            assert!(limits.check_global().is_ok());
        }
        assert_eq!(
            limits.check_global(),
            Err(RateLimitError::GlobalLimitExceeded)
        );
    }

    #[test]
    fn shrink_does_not_panic() {
        let limits = RateLimits::new(&LimitsConfig::default(), &AuthConfig::default());
        let _ = limits.check_connection(ADDR);
        let _ = limits.check_auth(ADDR);
        limits.shrink();
    }

    #[test]
    fn rate_limit_error_display() {
        assert_eq!(
            RateLimitError::ConnectionLimitExceeded.to_string(),
            "connection rate limit exceeded"
        );
        assert_eq!(
            RateLimitError::MessageLimitExceeded.to_string(),
            "Too many messages per second"
        );
    }
}
