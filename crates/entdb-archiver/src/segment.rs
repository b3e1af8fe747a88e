//! Segment framing: newline-delimited, gzip-compressed WAL records with a
//! sibling checksum (spec.md §4.6).

use entdb_types::Position;
use sha2::{Digest, Sha256};
use std::io::Write;

/// One record captured into the segment currently being built.
pub struct SegmentRecord {
    /// Position the record occupied in its WAL partition.
    pub position: Position,
    /// Raw (undecoded) event bytes as read off the WAL.
    pub payload: Vec<u8>,
}

/// Accumulates records until a size or time bound is hit, then renders
/// them into a gzip-compressed JSONL blob plus its SHA-256 checksum.
pub struct SegmentBuilder {
    records: Vec<SegmentRecord>,
    uncompressed_bytes: usize,
    opened_at: chrono::DateTime<chrono::Utc>,
}

/// One finished, ready-to-upload segment.
pub struct FinishedSegment {
    /// Gzip-compressed JSONL bytes.
    pub compressed: Vec<u8>,
    /// SHA-256 hex digest of the *decompressed* JSONL bytes (spec.md
    /// §4.6: "checksum of the decompressed segment").
    pub checksum_hex: String,
    /// Position of the last record in the segment; the archiver's own
    /// committed position advances to this once the upload succeeds.
    pub last_position: Position,
    /// Number of records in the segment.
    pub record_count: usize,
}

impl SegmentBuilder {
    /// Start a new, empty segment timed from `opened_at`.
    pub fn new(opened_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self { records: Vec::new(), uncompressed_bytes: 0, opened_at }
    }

    /// Append one record.
    pub fn push(&mut self, record: SegmentRecord) {
        self.uncompressed_bytes += record.payload.len();
        self.records.push(record);
    }

    /// Whether the segment has crossed `max_bytes` or `max_age`,
    /// i.e. should be closed and uploaded before accepting more records.
    pub fn should_close(&self, max_bytes: usize, max_age: chrono::Duration, now: chrono::DateTime<chrono::Utc>) -> bool {
        !self.records.is_empty()
            && (self.uncompressed_bytes >= max_bytes || now - self.opened_at >= max_age)
    }

    /// True if no records have been appended yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Render the accumulated records into JSONL, gzip it, and compute the
    /// checksum. Consumes the builder.
    pub fn finish(self) -> anyhow::Result<FinishedSegment> {
        let last_position = self
            .records
            .last()
            .map(|r| r.position)
            .expect("finish() called on an empty segment");
        let record_count = self.records.len();

        let mut jsonl = Vec::with_capacity(self.uncompressed_bytes + record_count * 32);
        for record in &self.records {
            let line = ArchivedRecord { position: record.position, payload: record.payload.clone() };
            serde_json::to_writer(&mut jsonl, &line)?;
            jsonl.push(b'\n');
        }

        let checksum_hex = hex_encode(Sha256::digest(&jsonl));

        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&jsonl)?;
        let compressed = encoder.finish()?;

        Ok(FinishedSegment { compressed, checksum_hex, last_position, record_count })
    }
}

/// One line of the archive's JSONL format. `payload` is base64-encoded so
/// the archive stays valid text even though the WAL record itself is
/// raw MessagePack bytes. `entdb-recovery` deserializes this same shape
/// when replaying a segment.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ArchivedRecord {
    /// Position the record occupied in its WAL partition.
    pub position: Position,
    /// Base64-encoded (standard alphabet) raw event bytes.
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_builder_never_reports_should_close() {
        let builder = SegmentBuilder::new(chrono::Utc::now());
        assert!(!builder.should_close(1, chrono::Duration::zero(), chrono::Utc::now()));
    }

    #[test]
    fn segment_closes_once_byte_threshold_crossed() {
        let mut builder = SegmentBuilder::new(chrono::Utc::now());
        builder.push(SegmentRecord { position: Position::new(0, 1), payload: vec![0u8; 128] });
        assert!(builder.should_close(64, chrono::Duration::hours(1), chrono::Utc::now()));
        assert!(!builder.should_close(1024, chrono::Duration::hours(1), chrono::Utc::now()));
    }

    #[test]
    fn finish_produces_a_stable_checksum_for_the_same_records() {
        let mut a = SegmentBuilder::new(chrono::Utc::now());
        a.push(SegmentRecord { position: Position::new(0, 1), payload: vec![1, 2, 3] });
        let mut b = SegmentBuilder::new(chrono::Utc::now());
        b.push(SegmentRecord { position: Position::new(0, 1), payload: vec![1, 2, 3] });
        assert_eq!(a.finish().unwrap().checksum_hex, b.finish().unwrap().checksum_hex);
    }
}
