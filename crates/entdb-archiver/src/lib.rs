#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **entdb-archiver** – WAL-to-object-storage segment archiver for EntDB
//! (spec.md §4.6).
//!
//! One [`Archiver`] task per WAL partition tails the partition
//! independently of the applier, batches records into time- or
//! size-bounded [`segment::SegmentBuilder`] segments, and uploads each as
//! gzip-compressed JSONL plus a checksum sibling under
//! `<object_prefix>/p<partition>/<date>/<sequence>.jsonl.gz`. No teacher
//! crate covers blob archiving directly; the task-per-partition shape and
//! non-blocking failure posture (spec.md §7: "never block writes ...
//! raise health-check signals") generalize `toka-runtime`'s
//! "orchestrates a background task against a shared backend" pattern.

mod segment;

pub use segment::{ArchivedRecord, FinishedSegment, SegmentBuilder, SegmentRecord};

use entdb_types::Position;
use entdb_wal_core::{ConsumeFrom, Wal};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Archiver configuration (spec.md `archive.*`).
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    /// Close a segment once its uncompressed size reaches this many bytes.
    pub segment_bytes: u64,
    /// Close a segment once it has been open this many seconds.
    pub segment_seconds: u64,
    /// Object storage key prefix all segments and state markers are
    /// written under.
    pub object_prefix: String,
    /// Number of WAL partitions to tail (one task each).
    pub partition_count: u32,
}

impl From<entdb_types::ArchiveConfig> for ArchiverConfig {
    fn from(c: entdb_types::ArchiveConfig) -> Self {
        Self {
            segment_bytes: c.segment_bytes,
            segment_seconds: c.segment_seconds,
            object_prefix: c.object_prefix,
            partition_count: 16,
        }
    }
}

/// Per-partition archival state persisted to object storage so a restarted
/// archiver resumes without re-uploading or skipping records. This is the
/// archiver's own committed position (spec.md §4.6), distinct from the
/// applier's authoritative tenant checkpoint.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ArchiveState {
    last_position: Option<Position>,
    next_sequence: u64,
}

/// Drives one [`Archiver`] task per WAL partition; each tails its
/// partition independently of the applier and of every other partition's
/// task.
pub struct Archiver {
    wal: Arc<dyn Wal>,
    object_store: Arc<dyn ObjectStore>,
    config: ArchiverConfig,
}

impl Archiver {
    /// Build an archiver over `wal`, writing to `object_store`.
    pub fn new(wal: Arc<dyn Wal>, object_store: Arc<dyn ObjectStore>, config: ArchiverConfig) -> Self {
        Self { wal, object_store, config }
    }

    /// Spawn one tokio task per configured partition. Each runs until the
    /// process exits; a task that hits a fatal WAL error logs and retries
    /// rather than exiting, since the archiver must never be the reason a
    /// write path stalls.
    pub fn spawn_all(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.partition_count)
            .map(|partition| {
                let this = self.clone();
                tokio::spawn(async move { this.run_partition(partition).await })
            })
            .collect()
    }

    async fn run_partition(self: Arc<Self>, partition: u32) {
        let mut state = self.load_state(partition).await;
        let mut backoff_ms = 50u64;

        loop {
            let from = match state.last_position {
                Some(p) => ConsumeFrom::Position(p),
                None => ConsumeFrom::Earliest,
            };
            let mut consumer = match self.wal.open_consumer(partition, from).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(partition, error = %e, "archiver failed to open WAL consumer, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(30_000);
                    continue;
                }
            };
            backoff_ms = 50;

            let mut builder = SegmentBuilder::new(now());
            let mut opened_on = today();

            loop {
                let now_ts = now();
                if !builder.is_empty()
                    && builder.should_close(
                        self.config.segment_bytes as usize,
                        chrono::Duration::seconds(self.config.segment_seconds as i64),
                        now_ts,
                    )
                {
                    let closed = std::mem::replace(&mut builder, SegmentBuilder::new(now()));
                    opened_on = today();
                    self.close_and_upload(partition, &mut state, opened_on, closed).await;
                    continue;
                }

                // Real backends return `None` once their own internal poll
                // timeout elapses at the live tail (spec.md §4.2); the
                // in-memory backend has no such timeout, so this wrapper
                // guarantees the time-bounded close above still fires on
                // an idle partition.
                let polled = tokio::time::timeout(Duration::from_secs(5), consumer.next()).await;
                match polled {
                    Ok(Ok(Some((position, bytes)))) => {
                        builder.push(SegmentRecord { position, payload: bytes });
                    }
                    Ok(Ok(None)) | Err(_) => continue,
                    Ok(Err(e)) if e.is_retryable() => {
                        warn!(partition, error = %e, "archiver WAL read failed, retrying");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        continue;
                    }
                    Ok(Err(e)) => {
                        warn!(partition, error = %e, "archiver hit an unrecoverable WAL error, reopening consumer");
                        break;
                    }
                }
            }
        }
    }

    async fn close_and_upload(
        &self,
        partition: u32,
        state: &mut ArchiveState,
        date: chrono::NaiveDate,
        builder: SegmentBuilder,
    ) {
        let finished = match builder.finish() {
            Ok(f) => f,
            Err(e) => {
                warn!(partition, error = %e, "failed to render segment, dropping in-memory buffer");
                return;
            }
        };
        let sequence = state.next_sequence;
        match self.upload(partition, date, sequence, &finished).await {
            Ok(()) => {
                state.next_sequence += 1;
                state.last_position = Some(finished.last_position);
                self.save_state(partition, state).await;
                info!(
                    partition,
                    sequence,
                    records = finished.record_count,
                    last_position = ?finished.last_position,
                    "archived segment"
                );
            }
            Err(e) => {
                // At-least-once delivery is tolerated (spec.md §4.6): the
                // record's own position makes a retried upload trivial to
                // deduplicate at replay, so we simply retry the same
                // sequence number next time around rather than advancing
                // state.
                warn!(partition, sequence, error = %e, "segment upload failed, will retry");
            }
        }
    }

    async fn upload(
        &self,
        partition: u32,
        date: chrono::NaiveDate,
        sequence: u64,
        finished: &FinishedSegment,
    ) -> anyhow::Result<()> {
        let base = format!(
            "{}/p{partition}/{date}/{sequence:010}",
            self.config.object_prefix,
            date = date.format("%Y-%m-%d")
        );
        let segment_path = ObjectPath::from(format!("{base}.jsonl.gz"));
        let checksum_path = ObjectPath::from(format!("{base}.checksum"));

        self.object_store
            .put(&segment_path, PutPayload::from(finished.compressed.clone()))
            .await?;
        self.object_store
            .put(&checksum_path, PutPayload::from(finished.checksum_hex.clone().into_bytes()))
            .await?;
        Ok(())
    }

    async fn load_state(&self, partition: u32) -> ArchiveState {
        let path = self.state_path(partition);
        match self.object_store.get(&path).await {
            Ok(result) => match result.bytes().await {
                Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or(ArchiveState { last_position: None, next_sequence: 0 }),
                Err(_) => ArchiveState { last_position: None, next_sequence: 0 },
            },
            Err(_) => ArchiveState { last_position: None, next_sequence: 0 },
        }
    }

    async fn save_state(&self, partition: u32, state: &ArchiveState) {
        let path = self.state_path(partition);
        if let Ok(bytes) = serde_json::to_vec(state) {
            if let Err(e) = self.object_store.put(&path, PutPayload::from(bytes)).await {
                warn!(partition, error = %e, "failed to persist archiver state marker");
            }
        }
    }

    fn state_path(&self, partition: u32) -> ObjectPath {
        ObjectPath::from(format!("{}/_state/p{partition}.json", self.config.object_prefix))
    }
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

fn today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use entdb_wal_memory::MemoryWal;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn archiver_persists_and_reloads_state_markers() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let wal: Arc<dyn Wal> = Arc::new(MemoryWal::default());
        let archiver = Archiver::new(
            wal,
            store,
            ArchiverConfig {
                segment_bytes: 1 << 20,
                segment_seconds: 600,
                object_prefix: "archive".to_string(),
                partition_count: 1,
            },
        );

        let mut state = ArchiveState { last_position: None, next_sequence: 0 };
        assert!(archiver.load_state(0).await.last_position.is_none());

        state.last_position = Some(Position::new(0, 41));
        state.next_sequence = 3;
        archiver.save_state(0, &state).await;

        let reloaded = archiver.load_state(0).await;
        assert_eq!(reloaded.last_position, Some(Position::new(0, 41)));
        assert_eq!(reloaded.next_sequence, 3);
    }

    #[tokio::test]
    async fn upload_writes_a_segment_and_a_checksum_sibling() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let wal: Arc<dyn Wal> = Arc::new(MemoryWal::default());
        let archiver = Archiver::new(
            wal,
            store.clone(),
            ArchiverConfig {
                segment_bytes: 1 << 20,
                segment_seconds: 600,
                object_prefix: "archive".to_string(),
                partition_count: 1,
            },
        );

        let mut builder = SegmentBuilder::new(chrono::Utc::now());
        builder.push(SegmentRecord { position: Position::new(0, 0), payload: b"hello".to_vec() });
        let finished = builder.finish().unwrap();

        archiver.upload(0, today(), 0, &finished).await.unwrap();

        let segment_path = ObjectPath::from(format!("archive/p0/{}/{:010}.jsonl.gz", today().format("%Y-%m-%d"), 0));
        let checksum_path = ObjectPath::from(format!("archive/p0/{}/{:010}.checksum", today().format("%Y-%m-%d"), 0));
        assert!(store.get(&segment_path).await.is_ok());
        let checksum_bytes = store.get(&checksum_path).await.unwrap().bytes().await.unwrap();
        assert_eq!(String::from_utf8(checksum_bytes.to_vec()).unwrap(), finished.checksum_hex);
    }
}
