//! Snapshot manifest (spec.md §4.7 step 4, §6 "Snapshot layout").
//!
//! The manifest is the last object written for a given snapshot; readers
//! (recovery, retention pruning) treat its absence as absence of the
//! snapshot, even if the data files underneath it are already present.

use entdb_types::{Position, TenantId};
use std::collections::HashMap;

/// `{tenant_id, wal_position, schema_fingerprint, created_at, file_list,
/// checksums}` exactly as spec.md §4.7 names it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SnapshotManifest {
    /// Tenant this snapshot belongs to.
    pub tenant_id: TenantId,
    /// The tenant's applied position at the moment the backup was taken.
    pub wal_position: Position,
    /// Hex-encoded schema fingerprint in effect when the backup was taken.
    pub schema_fingerprint: String,
    /// Wall-clock creation time, milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Backup file names, relative to this snapshot's directory.
    pub file_list: Vec<String>,
    /// SHA-256 hex digest of each file in `file_list`, keyed by file name.
    pub checksums: HashMap<String, String>,
}

impl SnapshotManifest {
    /// The object-storage directory segment this snapshot lives under:
    /// `<tenant>/<partition>-<offset>`.
    pub fn position_key(position: Position) -> String {
        format!("{}-{}", position.partition, position.offset)
    }
}
