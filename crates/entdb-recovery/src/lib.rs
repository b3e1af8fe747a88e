#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **entdb-recovery** – (Snapshot, archive, live WAL) -> rebuilt tenant
//! state (spec.md §4.8).
//!
//! Generalizes `toka-store-raft`'s composition of a storage backend, an
//! event-replay loop, and a live log into a single recovery-capable
//! driver: [`Recovery::recover_tenant`] runs the five steps spec.md §4.8
//! lays out in order, restoring a tenant store from its latest eligible
//! snapshot and replaying the archive (falling back to the live WAL once
//! the archive is exhausted) until the requested target is reached.

mod archive_reader;

pub use archive_reader::{ArchiveReadError, ArchiveReader};

use entdb_schema::FrozenSchema;
use entdb_snapshotter::SnapshotManifest;
use entdb_store::{StoreError, StoreManager, TenantStore};
use entdb_types::{Event, Position, TenantId};
use entdb_wal_core::{ConsumeFrom, Wal};
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Failures the recovery driver can raise. Unlike the other crates' error
/// enums, every variant here is terminal: recovery either succeeds or it
/// refuses to mount the tenant, per spec.md §4.8 step 5.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// The object store or store backend failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Reading back an archived segment failed.
    #[error(transparent)]
    Archive(#[from] ArchiveReadError),
    /// A snapshot data file's downloaded bytes did not match the
    /// manifest's recorded checksum.
    #[error("checksum mismatch restoring {0}: expected {1}, got {2}")]
    ChecksumMismatch(String, String, String),
    /// The manifest's schema fingerprint does not match the live
    /// registry's and no migration was supplied (spec.md §4.8 step 5:
    /// "refuse to mount otherwise").
    #[error("schema fingerprint mismatch: manifest has {manifest}, live registry has {live}")]
    SchemaMismatch {
        /// Fingerprint recorded in the snapshot manifest.
        manifest: String,
        /// Fingerprint of the live, in-process schema registry.
        live: String,
    },
    /// Generic I/O or object-store failure restoring snapshot files.
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    /// A WAL backend failure while sourcing the live tail.
    #[error("WAL error: {0}")]
    Wal(String),
    /// Local filesystem I/O failure while writing restored files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where recovery should stop.
#[derive(Debug, Clone, Copy)]
pub enum RecoveryTarget {
    /// Replay exactly up to (and including) this position.
    Position(Position),
    /// Replay until caught up with the live WAL tail. A long-running
    /// recovery daemon would keep looping past this point instead of
    /// returning; this driver returns once it has observed one empty
    /// poll of the live consumer, which is sufficient for operator-driven
    /// "rebuild this tenant now" use (spec.md §4.8 step 4: "or
    /// indefinitely for full recovery").
    Latest,
}

/// Summary of one `recover_tenant` run.
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    /// Whether a snapshot was found and restored (`false` means the
    /// tenant was rebuilt from the beginning of the log).
    pub restored_from_snapshot: bool,
    /// The position recovery stopped at.
    pub final_position: Option<Position>,
    /// Number of events replayed (archive + live combined).
    pub events_replayed: u64,
}

/// Object-store key prefixes recovery reads from (must match the
/// archiver's and snapshotter's `object_prefix` configuration) plus the
/// WAL partition count used to map a tenant to its partition.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Snapshot key prefix (spec.md §6: `snapshots/<tenant>/<position>/`).
    pub snapshot_prefix: String,
    /// Archive key prefix (spec.md §6: `archive/<tenant-shard>/...`).
    pub archive_prefix: String,
    /// WAL partition count, for `partition_for_tenant`.
    pub partition_count: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { snapshot_prefix: "snapshots".to_string(), archive_prefix: "archive".to_string(), partition_count: 16 }
    }
}

/// Drives a tenant from (snapshot + archive + live WAL) to a target
/// position.
pub struct Recovery {
    object_store: Arc<dyn ObjectStore>,
    store_manager: Arc<StoreManager>,
    wal: Arc<dyn Wal>,
    schema: Arc<FrozenSchema>,
    config: RecoveryConfig,
}

impl Recovery {
    /// Build a recovery driver. `schema` is the *live* registry recovery
    /// will refuse to diverge from (spec.md §4.8 step 5).
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        store_manager: Arc<StoreManager>,
        wal: Arc<dyn Wal>,
        schema: Arc<FrozenSchema>,
        config: RecoveryConfig,
    ) -> Self {
        Self { object_store, store_manager, wal, schema, config }
    }

    /// Run the full recovery procedure for `tenant_id` (spec.md §4.8).
    pub async fn recover_tenant(&self, tenant_id: &TenantId, target: RecoveryTarget) -> Result<RecoveryOutcome, RecoveryError> {
        let target_position = match target {
            RecoveryTarget::Position(p) => Some(p),
            RecoveryTarget::Latest => None,
        };

        // Step 1: pick the latest eligible snapshot.
        let manifest = self.find_snapshot(tenant_id, target_position).await?;
        let restored_from_snapshot = manifest.is_some();

        // Step 2: restore it (if any) into the tenant's store directory.
        if let Some(manifest) = &manifest {
            self.restore_snapshot(tenant_id, manifest).await?;
        }

        let store = self.store_manager.get(tenant_id).await?;
        let applied_position = store.checkpoint().await?;

        // Step 5 (checked here, before replay, per "refuse to mount
        // otherwise"): the manifest's fingerprint must match the live
        // registry.
        if let Some(manifest) = &manifest {
            let live_fp = hex_encode(self.schema.fingerprint());
            if manifest.schema_fingerprint != live_fp {
                return Err(RecoveryError::SchemaMismatch { manifest: manifest.schema_fingerprint.clone(), live: live_fp });
            }
        }

        // Step 3 + 4: replay from the archive, then the live tail, until
        // `target` is reached.
        let partition = entdb_wal_core::partition_for_tenant(tenant_id, self.config.partition_count);
        let mut cursor = applied_position;
        let mut events_replayed = 0u64;

        let reader = ArchiveReader::new(self.object_store.clone(), self.config.archive_prefix.clone());
        let archived = reader.read_partition_after(partition, cursor, target_position).await?;
        info!(tenant = %tenant_id, count = archived.len(), "replaying archived records");
        for (position, bytes) in archived {
            self.replay_one(&store, position, &bytes).await?;
            cursor = Some(position);
            events_replayed += 1;
            if reached_target(target_position, position) {
                return Ok(RecoveryOutcome { restored_from_snapshot, final_position: cursor, events_replayed });
            }
        }

        let from = match cursor {
            Some(p) => ConsumeFrom::Position(p),
            None => ConsumeFrom::Earliest,
        };
        let mut consumer = self.wal.open_consumer(partition, from).await.map_err(|e| RecoveryError::Wal(e.to_string()))?;
        loop {
            let polled = tokio::time::timeout(Duration::from_millis(500), consumer.next()).await;
            match polled {
                Ok(Ok(Some((position, bytes)))) => {
                    self.replay_one(&store, position, &bytes).await?;
                    cursor = Some(position);
                    events_replayed += 1;
                    if reached_target(target_position, position) {
                        break;
                    }
                }
                Ok(Ok(None)) | Err(_) => {
                    // Caught up with the live tail: done for `Latest`, and
                    // a `Position` target that never appears is a no-op
                    // past this point rather than a hang.
                    break;
                }
                Ok(Err(e)) => return Err(RecoveryError::Wal(e.to_string())),
            }
        }

        Ok(RecoveryOutcome { restored_from_snapshot, final_position: cursor, events_replayed })
    }

    async fn replay_one(&self, store: &TenantStore, position: Position, bytes: &[u8]) -> Result<(), RecoveryError> {
        let (event, _) = Event::decode(bytes).map_err(|e| RecoveryError::Archive(ArchiveReadError::Malformed(
            format!("{position:?}"),
            e.to_string(),
        )))?;
        if store.applied_outcome(&event.idempotency_key).await?.is_some() {
            return Ok(());
        }
        match store.apply_transaction(position, &event).await {
            Ok(_) => Ok(()),
            Err(StoreError::Invariant(reason)) => {
                warn!(?position, reason, "skipping invariant-violating event during recovery replay");
                Ok(())
            }
            Err(e @ StoreError::Transient(_)) => Err(RecoveryError::Store(e)),
        }
    }

    async fn find_snapshot(&self, tenant_id: &TenantId, target: Option<Position>) -> Result<Option<SnapshotManifest>, RecoveryError> {
        let prefix = ObjectPath::from(format!("{}/{}", self.config.snapshot_prefix, tenant_id));
        let listing = self.object_store.list_with_delimiter(Some(&prefix)).await?;

        let mut best: Option<SnapshotManifest> = None;
        for dir in listing.common_prefixes {
            let manifest_path = ObjectPath::from(format!("{dir}/manifest.json"));
            let bytes = match self.object_store.get(&manifest_path).await {
                Ok(r) => r.bytes().await?,
                Err(_) => continue,
            };
            let manifest: SnapshotManifest = match serde_json::from_slice(&bytes) {
                Ok(m) => m,
                Err(_) => continue,
            };
            if let Some(target) = target {
                if manifest.wal_position.partition == target.partition && manifest.wal_position.offset > target.offset {
                    continue;
                }
            }
            let better = match &best {
                None => true,
                Some(current) => manifest.wal_position.offset > current.wal_position.offset,
            };
            if better {
                best = Some(manifest);
            }
        }
        Ok(best)
    }

    async fn restore_snapshot(&self, tenant_id: &TenantId, manifest: &SnapshotManifest) -> Result<(), RecoveryError> {
        let dir_key = format!(
            "{}/{}/{}",
            self.config.snapshot_prefix,
            tenant_id,
            SnapshotManifest::position_key(manifest.wal_position)
        );
        let dest_dir = self.store_manager.tenant_dir(tenant_id);
        tokio::fs::create_dir_all(&dest_dir).await?;

        for file_name in &manifest.file_list {
            let object_path = ObjectPath::from(format!("{dir_key}/{file_name}"));
            let bytes = self.object_store.get(&object_path).await?.bytes().await?;

            let actual = hex_encode(Sha256::digest(&bytes));
            let expected = manifest.checksums.get(file_name).cloned().unwrap_or_default();
            if actual != expected {
                return Err(RecoveryError::ChecksumMismatch(file_name.clone(), expected, actual));
            }

            tokio::fs::write(dest_dir.join(file_name), &bytes[..]).await?;
        }

        self.store_manager.evict(tenant_id).await;
        info!(tenant = %tenant_id, position = ?manifest.wal_position, "restored snapshot");
        Ok(())
    }
}

fn reached_target(target: Option<Position>, position: Position) -> bool {
    match target {
        Some(t) => position.partition == t.partition && position.offset >= t.offset,
        None => false,
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
    use entdb_coordinator::{Coordinator, NoopObserver};
    use entdb_schema::Registry;
    use entdb_types::{FieldDef, FieldKind, NodeType, Operation, TxRequest, TypeId, Value};
    use entdb_wal_memory::MemoryWal;
    use object_store::memory::InMemory;
    use std::collections::HashMap;

    fn schema() -> Arc<FrozenSchema> {
        let mut reg = Registry::new();
        reg.register_node_type(NodeType {
            type_id: TypeId(1),
            name: "person".to_string(),
            fields: vec![FieldDef {
                field_id: entdb_types::FieldId(1),
                name: "email".to_string(),
                kind: FieldKind::String,
                required: false,
                default: None,
                enum_values: None,
                deprecated: false,
            }],
            deprecated: false,
            default_acl: Vec::new(),
        })
        .unwrap();
        Arc::new(reg.freeze().unwrap())
    }

    #[tokio::test]
    async fn recovery_with_no_snapshot_replays_the_whole_archive() {
        let schema = schema();
        let wal: Arc<dyn Wal> = Arc::new(MemoryWal::default());
        let coordinator = Coordinator::new(schema.clone(), wal.clone(), NoopObserver, NoopObserver, 1000);

        let mut payload = HashMap::new();
        payload.insert("email".to_string(), Value::Str("a@x".to_string()));
        let tenant = TenantId::from("tenant-a");
        let receipt = coordinator
            .submit(TxRequest {
                tenant_id: tenant.clone(),
                actor: "user:alice".to_string(),
                idempotency_key: "k1".to_string(),
                operations: vec![Operation::CreateNode {
                    id: entdb_types::NodeId(0),
                    type_id: TypeId(1),
                    payload,
                    alias: Some("u".to_string()),
                    principals: None,
                    recipients: None,
                }],
                schema_fingerprint: None,
                wait_for_applied: false,
                deadline_ms: None,
            })
            .await
            .unwrap();

        // Archive the one record that made it onto the WAL, bypassing a
        // live `Archiver` task for test determinism.
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let mut consumer = wal
            .open_consumer(receipt.wal_position.partition, ConsumeFrom::Earliest)
            .await
            .unwrap();
        let mut builder = entdb_archiver::SegmentBuilder::new(chrono::Utc::now());
        while let Ok(Some((position, bytes))) =
            tokio::time::timeout(Duration::from_millis(100), consumer.next()).await.unwrap_or(Ok(None))
        {
            builder.push(entdb_archiver::SegmentRecord { position, payload: bytes });
        }
        let finished = builder.finish().unwrap();
        let segment_path = ObjectPath::from(format!("archive/p{}/2026-01-01/{:010}.jsonl.gz", receipt.wal_position.partition, 0));
        let checksum_path = ObjectPath::from(format!("archive/p{}/2026-01-01/{:010}.checksum", receipt.wal_position.partition, 0));
        object_store.put(&segment_path, finished.compressed.clone().into()).await.unwrap();
        object_store.put(&checksum_path, finished.checksum_hex.clone().into_bytes().into()).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let store_manager = Arc::new(StoreManager::new(dir.path(), schema.clone()));
        let recovery = Recovery::new(
            object_store,
            store_manager.clone(),
            Arc::new(MemoryWal::default()),
            schema,
            RecoveryConfig { partition_count: 16, ..Default::default() },
        );

        let outcome = recovery.recover_tenant(&tenant, RecoveryTarget::Latest).await.unwrap();
        assert!(!outcome.restored_from_snapshot);
        assert_eq!(outcome.events_replayed, 1);

        let store = store_manager.get(&tenant).await.unwrap();
        let node = store.get_node(receipt.result_aliases["u"]).await.unwrap().unwrap();
        assert_eq!(node.payload.get("email"), Some(&Value::Str("a@x".to_string())));
    }
}
