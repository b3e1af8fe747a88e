//! WAL position and per-tenant checkpoint types, shared between the
//! coordinator, the WAL backends, the applier and recovery so that none of
//! them need to agree on a backend-specific offset representation.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A position within one partition of the WAL: `(partition, offset)`. The
/// partition key is always the tenant id (spec.md §4.2), so a `Position`
/// only needs to be compared against other positions from the same
/// partition to be meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Partition number, assigned by the WAL backend from the tenant id.
    pub partition: u32,
    /// Backend-specific monotonic offset within the partition (Kafka
    /// offset, Kinesis sequence number mapped to a dense integer, etc).
    pub offset: u64,
}

impl Position {
    /// The position immediately preceding the first record in a partition.
    pub const ZERO: Position = Position { partition: 0, offset: 0 };

    /// Construct a position.
    pub fn new(partition: u32, offset: u64) -> Self {
        Self { partition, offset }
    }

    /// The position one record after this one, used to resume a consumer
    /// at "checkpoint + 1" (spec.md §4.5).
    pub fn next(self) -> Self {
        Self { partition: self.partition, offset: self.offset + 1 }
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.partition != other.partition {
            None
        } else {
            Some(self.offset.cmp(&other.offset))
        }
    }
}

/// Per-tenant checkpoint: the last position the applier has fully applied.
/// Authoritative copy lives in the tenant's own `tenant_meta` table
/// (spec.md §4.5), not in the WAL's own (advisory) checkpoint store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last fully-applied position.
    pub position: Position,
}
