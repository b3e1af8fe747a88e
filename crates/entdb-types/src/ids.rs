//! Identifier newtypes shared across every EntDB crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque tenant identity. Namespaces every other entity; created on first
/// use and never garbage-collected by the core (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    /// Borrow the tenant id as a plain string, e.g. for use as a WAL
    /// partition key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// `(type_id, field_id)` is permanent per spec.md §3: this newtype wraps the
/// numeric type identifier so it cannot be confused with an [`EdgeTypeId`]
/// or a [`FieldId`] at the type level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub u32);

/// Numeric field identifier, permanent once used within a [`TypeId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(pub u32);

/// Numeric edge type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeTypeId(pub u32);

/// Tenant-local opaque node identifier: 128-bit random value with a
/// monotonic suffix, assigned by the coordinator at id-assignment time
/// (spec.md §4.3 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u128);

impl NodeId {
    /// Generate a fresh id: 96 bits of randomness packed with a caller
    /// supplied monotonic counter in the low 32 bits. The counter only
    /// needs to be unique *within* a single coordinator process tick; the
    /// random prefix provides cross-process and cross-restart uniqueness.
    pub fn generate(monotonic_suffix: u32) -> Self {
        let mut buf = [0u8; 16];
        rand::Rng::fill(&mut rand::thread_rng(), &mut buf[..12]);
        buf[12..].copy_from_slice(&monotonic_suffix.to_be_bytes());
        Self(u128::from_be_bytes(buf))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u128::from_str_radix(s, 16).map(NodeId)
    }
}
