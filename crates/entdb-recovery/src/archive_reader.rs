//! Read-back path over the archiver's own segment format (spec.md §4.8
//! step 3: "source the records from the archive while still inside the
//! archive's retention window").

use entdb_archiver::ArchivedRecord;
use entdb_types::Position;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::sync::Arc;

/// Failures reading back an archived segment.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveReadError {
    /// The object store itself failed (missing object, transport error).
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    /// The segment's checksum sibling did not match the decompressed
    /// bytes — the archive is corrupt or truncated.
    #[error("checksum mismatch for segment {0}: expected {1}, got {2}")]
    ChecksumMismatch(String, String, String),
    /// The segment failed to decompress or deserialize.
    #[error("malformed archive segment {0}: {1}")]
    Malformed(String, String),
}

/// Replays segments written by `entdb-archiver` back into ordered
/// `(position, raw event bytes)` pairs.
pub struct ArchiveReader {
    object_store: Arc<dyn ObjectStore>,
    archive_prefix: String,
}

impl ArchiveReader {
    /// Build a reader over the same `object_prefix` the archiver wrote to.
    pub fn new(object_store: Arc<dyn ObjectStore>, archive_prefix: String) -> Self {
        Self { object_store, archive_prefix }
    }

    /// Fetch every archived record for `partition` with position strictly
    /// greater than `after` (or from the start of the archive if `None`)
    /// and, if `upto` is given, no greater than it. Segment object keys
    /// are zero-padded and date-prefixed, so a lexicographic sort of
    /// their full paths already yields chronological order.
    pub async fn read_partition_after(
        &self,
        partition: u32,
        after: Option<Position>,
        upto: Option<Position>,
    ) -> Result<Vec<(Position, Vec<u8>)>, ArchiveReadError> {
        use futures::StreamExt;

        let prefix = ObjectPath::from(format!("{}/p{partition}", self.archive_prefix));
        let mut listing = self.object_store.list(Some(&prefix));
        let mut segment_keys = Vec::new();
        while let Some(meta) = listing.next().await {
            let meta = meta?;
            let key = meta.location.to_string();
            if key.ends_with(".jsonl.gz") {
                segment_keys.push(key);
            }
        }
        segment_keys.sort();

        let mut out = Vec::new();
        for key in segment_keys {
            let records = self.read_segment(&key).await?;
            for (position, payload) in records {
                if let Some(after) = after {
                    if position.partition == after.partition && position.offset <= after.offset {
                        continue;
                    }
                }
                if let Some(upto) = upto {
                    if position.partition == upto.partition && position.offset > upto.offset {
                        continue;
                    }
                }
                out.push((position, payload));
            }
        }
        Ok(out)
    }

    async fn read_segment(&self, key: &str) -> Result<Vec<(Position, Vec<u8>)>, ArchiveReadError> {
        let segment_path = ObjectPath::from(key);
        let base = key.strip_suffix(".jsonl.gz").unwrap_or(key);
        let checksum_path = ObjectPath::from(format!("{base}.checksum"));

        let compressed = self.object_store.get(&segment_path).await?.bytes().await?;
        let expected_checksum = String::from_utf8_lossy(
            &self.object_store.get(&checksum_path).await?.bytes().await?,
        )
        .trim()
        .to_string();

        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut jsonl = Vec::new();
        decoder
            .read_to_end(&mut jsonl)
            .map_err(|e| ArchiveReadError::Malformed(key.to_string(), e.to_string()))?;

        let actual_checksum = hex_encode(Sha256::digest(&jsonl));
        if actual_checksum != expected_checksum {
            return Err(ArchiveReadError::ChecksumMismatch(key.to_string(), expected_checksum, actual_checksum));
        }

        let mut records = Vec::new();
        for line in jsonl.split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let record: ArchivedRecord = serde_json::from_slice(line)
                .map_err(|e| ArchiveReadError::Malformed(key.to_string(), e.to_string()))?;
            records.push((record.position, record.payload));
        }
        Ok(records)
    }
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.as_ref().len() * 2);
    for byte in bytes.as_ref() {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
