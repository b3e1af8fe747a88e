#![forbid(unsafe_code)]

//! **entdb-wal-kinesis** – Kinesis-family [`entdb_wal_core::Wal`] backend
//! (spec.md §4.2).
//!
//! Kinesis shard sequence numbers are opaque, large decimal strings, not
//! small monotonic integers, so this adapter keeps a per-shard ledger
//! mapping a dense `u64` offset (the `Position` this crate hands back to
//! callers) to the sequence number needed to resume a shard iterator. This
//! is exactly the "differences ... handled by the adapter; the applier
//! sees only positions" boundary spec.md §4.2 describes.

use async_trait::async_trait;
use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::types::ShardIteratorType;
use aws_sdk_kinesis::Client;
use entdb_types::Position;
use entdb_wal_core::{ConsumeFrom, TenantId, Wal, WalConsumer, WalError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Configuration needed to reach a Kinesis-family stream.
#[derive(Debug, Clone)]
pub struct KinesisWalConfig {
    /// Stream all tenants share, sharded by tenant id.
    pub stream_name: String,
    /// Shard count, used for `partition_for_tenant`.
    pub shard_count: u32,
    /// Maximum record size in bytes (Kinesis hard limit is 1 MiB).
    pub max_record_bytes: usize,
}

/// Per-shard ledger mapping dense offsets to the sequence numbers needed
/// to resume a shard iterator after a restart.
type SequenceLedger = Arc<RwLock<HashMap<u32, Vec<String>>>>;

/// Kinesis-family WAL backend.
pub struct KinesisWal {
    client: Client,
    config: KinesisWalConfig,
    ledger: SequenceLedger,
}

impl KinesisWal {
    /// Wrap an already-configured Kinesis client.
    pub fn new(client: Client, config: KinesisWalConfig) -> Self {
        Self { client, config, ledger: Arc::new(RwLock::new(HashMap::new())) }
    }

    fn shard_id(&self, shard_index: u32) -> String {
        format!("shardId-{:012}", shard_index)
    }
}

#[async_trait]
impl Wal for KinesisWal {
    async fn append(&self, key: &str, record: Vec<u8>) -> Result<Position, WalError> {
        if record.len() > self.config.max_record_bytes {
            return Err(WalError::Permanent(format!(
                "record of {} bytes exceeds max_record_bytes {}",
                record.len(),
                self.config.max_record_bytes
            )));
        }

        let result = self
            .client
            .put_record()
            .stream_name(&self.config.stream_name)
            .partition_key(key)
            .data(Blob::new(record))
            .send()
            .await;

        match result {
            Ok(output) => {
                let shard_index = shard_index_from_id(output.shard_id());
                let sequence_number = output.sequence_number().to_string();
                let mut ledger = self.ledger.write().await;
                let entries = ledger.entry(shard_index).or_default();
                entries.push(sequence_number);
                let offset = (entries.len() - 1) as u64;
                Ok(Position::new(shard_index, offset))
            }
            Err(e) if e.as_service_error().map(|s| s.is_provisioned_throughput_exceeded_exception()).unwrap_or(false) => {
                Err(WalError::Transient(format!("throughput exceeded: {e}")))
            }
            Err(e) if e.as_service_error().map(|s| s.is_resource_not_found_exception()).unwrap_or(false) => {
                Err(WalError::Unavailable(format!("stream unavailable: {e}")))
            }
            Err(e) => Err(WalError::Transient(format!("put_record failed: {e}"))),
        }
    }

    async fn open_consumer(
        &self,
        partition: u32,
        from: ConsumeFrom,
    ) -> Result<Box<dyn WalConsumer>, WalError> {
        let shard_id = self.shard_id(partition);
        let (iter_type, starting_sequence) = match from {
            ConsumeFrom::Position(p) => {
                let ledger = self.ledger.read().await;
                let sequence = ledger
                    .get(&partition)
                    .and_then(|entries| entries.get(p.offset as usize))
                    .cloned();
                (ShardIteratorType::AfterSequenceNumber, sequence)
            }
            ConsumeFrom::Earliest | ConsumeFrom::Checkpoint => (ShardIteratorType::TrimHorizon, None),
        };

        let mut request = self
            .client
            .get_shard_iterator()
            .stream_name(&self.config.stream_name)
            .shard_id(&shard_id)
            .shard_iterator_type(iter_type);
        if let Some(seq) = starting_sequence {
            request = request.starting_sequence_number(seq);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WalError::Unavailable(format!("failed to get shard iterator: {e}")))?;
        let shard_iterator = response
            .shard_iterator()
            .ok_or_else(|| WalError::Unavailable("no shard iterator returned".to_string()))?
            .to_string();

        Ok(Box::new(KinesisConsumer {
            client: self.client.clone(),
            partition,
            shard_iterator: Some(shard_iterator),
            buffered: Vec::new(),
            ledger: self.ledger.clone(),
        }))
    }

    async fn commit_checkpoint(&self, _partition: u32, _position: Position) -> Result<(), WalError> {
        Ok(())
    }

    async fn earliest_position(&self, partition: u32) -> Result<Position, WalError> {
        Ok(Position::new(partition, 0))
    }

    async fn latest_position(&self, partition: u32) -> Result<Position, WalError> {
        let ledger = self.ledger.read().await;
        let len = ledger.get(&partition).map(|e| e.len()).unwrap_or(0);
        Ok(Position::new(partition, len.saturating_sub(1) as u64))
    }

    fn partition_for_tenant(&self, tenant_id: &TenantId, _partition_count: u32) -> u32 {
        entdb_wal_core::partition_for_tenant(tenant_id, self.config.shard_count)
    }
}

struct KinesisConsumer {
    client: Client,
    partition: u32,
    shard_iterator: Option<String>,
    buffered: Vec<(String, Vec<u8>)>,
    ledger: SequenceLedger,
}

#[async_trait]
impl WalConsumer for KinesisConsumer {
    async fn next(&mut self) -> Result<Option<(Position, Vec<u8>)>, WalError> {
        if self.buffered.is_empty() {
            let Some(iterator) = self.shard_iterator.clone() else {
                return Ok(None);
            };
            let response = self
                .client
                .get_records()
                .shard_iterator(&iterator)
                .send()
                .await
                .map_err(|e| WalError::Transient(format!("get_records failed: {e}")))?;

            self.shard_iterator = response.next_shard_iterator().map(|s| s.to_string());
            for record in response.records() {
                self.buffered.push((
                    record.sequence_number().to_string(),
                    record.data().as_ref().to_vec(),
                ));
            }
            if self.buffered.is_empty() {
                return Ok(None);
            }
        }

        let (sequence_number, data) = self.buffered.remove(0);
        let mut ledger = self.ledger.write().await;
        let entries = ledger.entry(self.partition).or_default();
        entries.push(sequence_number);
        let offset = (entries.len() - 1) as u64;
        Ok(Some((Position::new(self.partition, offset), data)))
    }
}

fn shard_index_from_id(shard_id: &str) -> u32 {
    shard_id
        .rsplit('-')
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(0)
}
