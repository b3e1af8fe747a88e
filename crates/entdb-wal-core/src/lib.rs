#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **entdb-wal-core** – Core write-ahead-log abstraction for EntDB
//! (spec.md §4.2).
//!
//! This crate defines the [`Wal`] and [`WalConsumer`] traits and the
//! position/error types every backend shares. It intentionally ships no
//! concrete backend — those live in `entdb-wal-memory`, `entdb-wal-kafka`
//! and `entdb-wal-kinesis`, each implementing this trait over a different
//! broker. This mirrors `toka-store-core`, which defines `StorageBackend`
//! and `WriteAheadLog` without providing a concrete implementation.

use async_trait::async_trait;
use entdb_types::Position;
use thiserror::Error;

pub use entdb_types::{Checkpoint, TenantId};

/// Failure contract for [`Wal::append`] (spec.md §4.2).
#[derive(Debug, Error)]
pub enum WalError {
    /// The caller may retry with the same idempotency key; the append did
    /// not durably happen.
    #[error("transient WAL failure: {0}")]
    Transient(String),
    /// The caller must not retry (e.g. record too large).
    #[error("permanent WAL failure: {0}")]
    Permanent(String),
    /// Broker quorum lost; the server surfaces `SERVICE_UNAVAILABLE`.
    #[error("WAL backend unavailable: {0}")]
    Unavailable(String),
}

impl WalError {
    /// Whether a caller may safely retry an `append` that failed with this
    /// error, reusing the same idempotency key.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalError::Transient(_) | WalError::Unavailable(_))
    }
}

/// Starting point for [`Wal::open_consumer`].
#[derive(Debug, Clone, Copy)]
pub enum ConsumeFrom {
    /// Resume immediately after a specific position.
    Position(Position),
    /// Start from the oldest retained record in the partition.
    Earliest,
    /// Resume from the backend's own advisory checkpoint for this
    /// consumer group (not the tenant store's authoritative checkpoint —
    /// see spec.md §4.5).
    Checkpoint,
}

/// An ordered, gap-free iterator over `(position, record)` pairs within one
/// partition.
#[async_trait]
pub trait WalConsumer: Send {
    /// Fetch the next record, or `None` if the consumer has reached the
    /// live tail and no new record arrived before the implementation's
    /// internal poll timeout. Callers loop on `next()` to keep tailing.
    async fn next(&mut self) -> Result<Option<(Position, Vec<u8>)>, WalError>;
}

/// Core abstraction over an ordered, partitioned, replicated record
/// stream (spec.md §4.2). The partition key is always the tenant id, which
/// guarantees per-tenant total order; cross-tenant order is undefined.
#[async_trait]
pub trait Wal: Send + Sync {
    /// Append `record` under partition key `key` (the tenant id), blocking
    /// until the configured acknowledgment policy is satisfied
    /// (`acks=all`, `min_insync>=2`). The producer is idempotent
    /// (sequence-numbered per partition) so a caller retry after a
    /// `Transient`/`Unavailable` error never duplicates the record.
    async fn append(&self, key: &str, record: Vec<u8>) -> Result<Position, WalError>;

    /// Open a consumer over one partition starting at `from`.
    async fn open_consumer(
        &self,
        partition: u32,
        from: ConsumeFrom,
    ) -> Result<Box<dyn WalConsumer>, WalError>;

    /// Durably record apply progress out-of-band. Advisory only: the
    /// applier's authoritative checkpoint lives inside the tenant store's
    /// `tenant_meta` table (spec.md §4.5).
    async fn commit_checkpoint(&self, partition: u32, position: Position) -> Result<(), WalError>;

    /// Oldest retained position in `partition`.
    async fn earliest_position(&self, partition: u32) -> Result<Position, WalError>;

    /// Newest position in `partition`.
    async fn latest_position(&self, partition: u32) -> Result<Position, WalError>;

    /// Map a tenant id to its partition. The default implementation hashes
    /// the tenant id; backends may override this to match their native
    /// partitioning scheme.
    fn partition_for_tenant(&self, tenant_id: &TenantId, partition_count: u32) -> u32 {
        partition_for_tenant(tenant_id, partition_count)
    }
}

/// Deterministic tenant -> partition mapping shared by every backend, so
/// that switching backends never changes which tenants land on which
/// partition for a given `partition_count`.
pub fn partition_for_tenant(tenant_id: &TenantId, partition_count: u32) -> u32 {
    use std::hash::{Hash, Hasher};
    if partition_count == 0 {
        return 0;
    }
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    tenant_id.as_str().hash(&mut hasher);
    (hasher.finish() % partition_count as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitioning_is_deterministic_for_the_same_tenant() {
        let t = TenantId::from("tenant-a");
        assert_eq!(partition_for_tenant(&t, 16), partition_for_tenant(&t, 16));
    }

    #[test]
    fn partitioning_stays_within_bounds() {
        let t = TenantId::from("tenant-b");
        assert!(partition_for_tenant(&t, 8) < 8);
    }

    #[test]
    fn transient_and_unavailable_are_retryable_permanent_is_not() {
        assert!(WalError::Transient("x".into()).is_retryable());
        assert!(WalError::Unavailable("x".into()).is_retryable());
        assert!(!WalError::Permanent("x".into()).is_retryable());
    }
}
