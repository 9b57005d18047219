//! Storage layer for signal-relay.
//!
//! The relay keeps no message content. The only persisted state is an
//! append-only audit log of pairing requests, recorded as hashed identity
//! pairs.

mod sqlite;

pub use sqlite::SqliteAuditStore;

use crate::error::StorageError;
use async_trait::async_trait;
use signal_types::IdentityHash;

/// One audited pairing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRecord {
    /// Hash of the requesting identity.
    pub initiator: IdentityHash,
    /// Hash of the requested identity.
    pub target: IdentityHash,
    /// Unix timestamp of the request.
    pub requested_at: i64,
}

/// Trait for audit log backends.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one pairing record.
    async fn record_pairing(&self, record: PairingRecord) -> Result<(), StorageError>;

    /// Most recent records, newest first.
    async fn recent_pairings(&self, limit: u32) -> Result<Vec<PairingRecord>, StorageError>;

    /// Total number of records.
    async fn pairing_count(&self) -> Result<u64, StorageError>;
}
