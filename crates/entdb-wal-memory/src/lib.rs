#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **entdb-wal-memory** – In-memory [`entdb_wal_core::Wal`] backend.
//!
//! Non-persistent, suitable for tests and local development, generalizing
//! `toka-store-memory`'s `Arc<RwLock<HashMap<_>>>` + broadcast-channel shape
//! from a flat event store to a partitioned WAL.

use async_trait::async_trait;
use entdb_types::Position;
use entdb_wal_core::{ConsumeFrom, TenantId, Wal, WalConsumer, WalError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Default number of records buffered for slow live-tail subscribers
/// before older notifications are dropped.
const DEFAULT_BUFFER: usize = 1024;

struct Partition {
    records: Vec<Vec<u8>>,
    /// Producer idempotency: the last `(key, content-hash)` pair appended,
    /// to suppress a network-level retry duplicate of the exact same
    /// produce call (spec.md §4.2: "producer is idempotent").
    last_seen: Option<(String, u64)>,
    notify: broadcast::Sender<Position>,
}

impl Partition {
    fn new() -> Self {
        let (notify, _) = broadcast::channel(DEFAULT_BUFFER);
        Self { records: Vec::new(), last_seen: None, notify }
    }
}

/// An in-memory, non-durable WAL backend.
pub struct MemoryWal {
    partitions: Arc<RwLock<HashMap<u32, Partition>>>,
    partition_count: u32,
    max_record_bytes: usize,
}

impl MemoryWal {
    /// Create a backend with `partition_count` partitions and the given
    /// maximum record size (spec.md `wal.max_record_bytes`).
    pub fn new(partition_count: u32, max_record_bytes: usize) -> Self {
        Self {
            partitions: Arc::new(RwLock::new(HashMap::new())),
            partition_count,
            max_record_bytes,
        }
    }

    fn content_hash(bytes: &[u8]) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        bytes.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for MemoryWal {
    fn default() -> Self {
        Self::new(16, 1 << 20)
    }
}

#[async_trait]
impl Wal for MemoryWal {
    async fn append(&self, key: &str, record: Vec<u8>) -> Result<Position, WalError> {
        if record.len() > self.max_record_bytes {
            return Err(WalError::Permanent(format!(
                "record of {} bytes exceeds max_record_bytes {}",
                record.len(),
                self.max_record_bytes
            )));
        }

        let partition = entdb_wal_core::partition_for_tenant(
            &TenantId::from(key),
            self.partition_count,
        );

        let mut partitions = self.partitions.write().await;
        let entry = partitions.entry(partition).or_insert_with(Partition::new);

        let hash = Self::content_hash(&record);
        if entry.last_seen.as_ref().map(|(k, h)| k == key && *h == hash).unwrap_or(false) {
            // Idempotent producer retry of the exact same record: return
            // the position it already occupies rather than duplicating it.
            let offset = (entry.records.len() - 1) as u64;
            return Ok(Position::new(partition, offset));
        }

        entry.records.push(record);
        entry.last_seen = Some((key.to_string(), hash));
        let offset = (entry.records.len() - 1) as u64;
        let position = Position::new(partition, offset);
        let _ = entry.notify.send(position);
        Ok(position)
    }

    async fn open_consumer(
        &self,
        partition: u32,
        from: ConsumeFrom,
    ) -> Result<Box<dyn WalConsumer>, WalError> {
        let start_offset = match from {
            ConsumeFrom::Position(p) => p.offset + 1,
            ConsumeFrom::Earliest | ConsumeFrom::Checkpoint => 0,
        };
        let mut subs = self.partitions.write().await;
        let entry = subs.entry(partition).or_insert_with(Partition::new);
        let rx = entry.notify.subscribe();
        Ok(Box::new(MemoryConsumer {
            partitions: self.partitions.clone(),
            partition,
            next_offset: start_offset,
            notify_rx: rx,
        }))
    }

    async fn commit_checkpoint(&self, _partition: u32, _position: Position) -> Result<(), WalError> {
        Ok(())
    }

    async fn earliest_position(&self, partition: u32) -> Result<Position, WalError> {
        Ok(Position::new(partition, 0))
    }

    async fn latest_position(&self, partition: u32) -> Result<Position, WalError> {
        let partitions = self.partitions.read().await;
        let len = partitions.get(&partition).map(|p| p.records.len()).unwrap_or(0);
        Ok(Position::new(partition, len.saturating_sub(1) as u64))
    }
}

struct MemoryConsumer {
    partitions: Arc<RwLock<HashMap<u32, Partition>>>,
    partition: u32,
    next_offset: u64,
    notify_rx: broadcast::Receiver<Position>,
}

#[async_trait]
impl WalConsumer for MemoryConsumer {
    async fn next(&mut self) -> Result<Option<(Position, Vec<u8>)>, WalError> {
        loop {
            {
                let partitions = self.partitions.read().await;
                if let Some(p) = partitions.get(&self.partition) {
                    if let Some(record) = p.records.get(self.next_offset as usize) {
                        let position = Position::new(self.partition, self.next_offset);
                        self.next_offset += 1;
                        return Ok(Some((position, record.clone())));
                    }
                }
            }
            // Nothing new yet: wait for the next append notification, or
            // give up after one round if the broadcast channel itself has
            // lagged and missed it (the loop above will simply recheck).
            match self.notify_rx.recv().await {
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_consume_from_earliest_yields_the_record() {
        let wal = MemoryWal::default();
        let pos = wal.append("tenant-a", b"hello".to_vec()).await.unwrap();
        let partition = pos.partition;

        let mut consumer = wal.open_consumer(partition, ConsumeFrom::Earliest).await.unwrap();
        let (got_pos, got_record) = consumer.next().await.unwrap().unwrap();
        assert_eq!(got_pos, pos);
        assert_eq!(got_record, b"hello");
    }

    #[tokio::test]
    async fn consumer_resumes_after_a_given_position() {
        let wal = MemoryWal::default();
        let p1 = wal.append("tenant-a", b"one".to_vec()).await.unwrap();
        let _p2 = wal.append("tenant-a", b"two".to_vec()).await.unwrap();

        let mut consumer = wal
            .open_consumer(p1.partition, ConsumeFrom::Position(p1))
            .await
            .unwrap();
        let (_pos, record) = consumer.next().await.unwrap().unwrap();
        assert_eq!(record, b"two");
    }

    #[tokio::test]
    async fn oversized_record_is_rejected_as_permanent() {
        let wal = MemoryWal::new(4, 4);
        let err = wal.append("tenant-a", b"too-long".to_vec()).await.unwrap_err();
        assert!(matches!(err, WalError::Permanent(_)));
    }

    #[tokio::test]
    async fn per_tenant_order_is_preserved() {
        let wal = MemoryWal::default();
        wal.append("tenant-a", b"a1".to_vec()).await.unwrap();
        wal.append("tenant-a", b"a2".to_vec()).await.unwrap();
        let partition =
            entdb_wal_core::partition_for_tenant(&TenantId::from("tenant-a"), 16);
        let mut consumer = wal.open_consumer(partition, ConsumeFrom::Earliest).await.unwrap();
        let (_, r1) = consumer.next().await.unwrap().unwrap();
        let (_, r2) = consumer.next().await.unwrap().unwrap();
        assert_eq!(r1, b"a1");
        assert_eq!(r2, b"a2");
    }
}
