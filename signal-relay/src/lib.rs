//! # signal-relay
//!
//! Zero-knowledge signaling and message relay for Veil.
//!
//! This crate implements a relay server that:
//! - Accepts WebSocket connections from chat clients
//! - Verifies identities against an external provider and issues
//!   continuation tokens for later logins
//! - Brokers pairing between two identities and tracks session membership
//! - Relays opaque encrypted messages and WebRTC signaling within a session
//! - Never sees plaintext and never stores message content
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                    ┌── Client B
//!            │  WebSocket (JSON)  │
//!            ├───────────────────►│
//!            │                    │
//!        ┌───┴────────────────────┴───┐
//!        │        signal-relay        │
//!        │  registry    sessions      │
//!        │  ┌─────────────────────┐   │
//!        │  │ SQLite (audit only) │   │
//!        │  └─────────────────────┘   │
//!        └────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Every frame is a JSON object with short routing keys (`t`, `sid`, `c`,
//! `sh`, `data`):
//! - AUTH → AUTH_SUCCESS (login)
//! - CONNECT_REQ → JOIN_REQUEST → JOIN_ACCEPT / JOIN_DENIED (pairing)
//! - REATTACH → PEER_ONLINE (rejoin a session)
//! - MSG → MSG, DELIVERED / DELIVERED_FAILED (relay)
//! - RTC_OFFER / RTC_ANSWER / RTC_ICE (forwarded verbatim)
//! - GET_TURN_CREDS → TURN_CREDS
//! - PING, PEER_OFFLINE, ERROR (server → client)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod cleanup;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod heartbeat;
pub mod http;
pub mod limits;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;
pub mod transport;
pub mod turn;
