//! WAL record framing (spec.md §6): the canonical event envelope written to
//! the WAL, and later to the archive (§4.6) verbatim.

use crate::ids::TenantId;
use crate::operation::Operation;
use serde::{Deserialize, Serialize};

/// One-byte envelope version preceding every encoded event. The applier
/// understands every version `>=` the minimum version recorded in the
/// tenant's most recent snapshot manifest (spec.md §6).
pub type EnvelopeVersion = u8;

/// Current envelope version produced by this build of the coordinator.
pub const CURRENT_ENVELOPE_VERSION: EnvelopeVersion = 1;

/// The resolved, durable transaction record: every alias has already been
/// replaced with its assigned id by the time this is built (spec.md §4.3
/// step 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Envelope version this event was encoded with.
    pub envelope_version: EnvelopeVersion,
    /// Globally unique event id (UUIDv4).
    pub event_id: uuid::Uuid,
    /// Tenant this event belongs to; also the WAL partition key.
    pub tenant_id: TenantId,
    /// Principal that submitted the transaction.
    pub actor: String,
    /// Client-chosen idempotency key.
    pub idempotency_key: String,
    /// Schema fingerprint in effect when the event was built.
    pub schema_fingerprint: [u8; 32],
    /// Wall-clock creation time, milliseconds since the Unix epoch.
    pub created_at_ms: i64,
    /// Resolved operations, in submission order, with every alias replaced
    /// by its assigned id.
    pub operations: Vec<Operation>,
}

impl Event {
    /// Encode the event body with MessagePack (the canonical on-disk and
    /// on-wire representation per spec.md §6), and prefix it with the
    /// one-byte envelope version and a 4-byte big-endian length, so readers
    /// can frame a stream of events without needing a separator.
    pub fn encode(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        let body = rmp_serde::to_vec_named(self)?;
        let mut out = Vec::with_capacity(body.len() + 5);
        out.push(self.envelope_version);
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode a single length-prefixed, versioned event from the front of
    /// `bytes`, returning the event and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), EventDecodeError> {
        if bytes.len() < 5 {
            return Err(EventDecodeError::Truncated);
        }
        let version = bytes[0];
        if version == 0 || version > CURRENT_ENVELOPE_VERSION {
            return Err(EventDecodeError::UnsupportedVersion(version));
        }
        let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        let total = 5 + len;
        if bytes.len() < total {
            return Err(EventDecodeError::Truncated);
        }
        let event: Event = rmp_serde::from_slice(&bytes[5..total])
            .map_err(EventDecodeError::Deserialize)?;
        Ok((event, total))
    }
}

/// Errors decoding an [`Event`] off the wire or out of an archive segment.
#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    /// Fewer bytes were available than the framing header requires.
    #[error("truncated event frame")]
    Truncated,
    /// The envelope version is newer than this build understands.
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),
    /// The body failed to deserialize as a valid `Event`.
    #[error("event body deserialization failed: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),
}
