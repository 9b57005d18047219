//! # signal-types
//!
//! Wire format types for the Veil signaling relay.
//!
//! This crate provides the types shared by the relay and its clients:
//! - [`ConnectionId`], [`SessionId`], [`Identity`], [`IdentityHash`] - Identifier types
//! - [`Frame`] - JSON envelope with routing fields (`t`, `sid`, `c`, `sh`, `data`)
//! - [`ClientFrame`], [`ServerFrame`] - Typed protocol messages
//! - [`FrameError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod frame;
mod ids;
mod messages;

pub use error::FrameError;
pub use frame::{Frame, FrameType};
pub use ids::{ConnectionId, Identity, IdentityHash, SessionId};
pub use messages::{
    AuthRequest, AuthSuccess, ClientFrame, ConnectRequest, ErrorBody, MessageBody, PeerIntro,
    PeerProfile, ServerFrame, TurnCredentials,
};
