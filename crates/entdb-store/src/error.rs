//! Failure taxonomy for the tenant store (spec.md §4.5 "Failure
//! semantics").

use thiserror::Error;

/// Failures the store itself can raise. Unlike `entdb_types::EntError`,
/// this is an internal type the applier interprets into one of the three
/// apply-time behaviors spec.md §4.5 describes (retry, dead-letter,
/// conflict-success) — it never crosses the wire to a client directly.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O or lock contention; the caller should retry the same record
    /// after backoff without advancing its checkpoint.
    #[error("transient store failure: {0}")]
    Transient(String),
    /// The event's payload or references are invalid against the live
    /// schema at apply time (schema drift since coordination, or a
    /// best-effort pre-check at the coordinator having missed it). The
    /// applier dead-letters the record and advances its checkpoint.
    #[error("invariant violation at apply time: {0}")]
    Invariant(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Transient(e.to_string())
    }
}
