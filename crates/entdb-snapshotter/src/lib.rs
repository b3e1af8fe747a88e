#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **entdb-snapshotter** – Scheduled consistent tenant-store snapshotter
//! for EntDB (spec.md §4.7).
//!
//! No teacher crate covers blob snapshotting directly; this crate shares
//! `entdb-archiver`'s `object_store` dependency and non-blocking failure
//! posture (spec.md §7), and generalizes `toka-storage`'s "pluggable
//! storage adapter wraps a backup directory" shape to a per-tenant,
//! scheduled backup-plus-manifest operation.

mod manifest;

pub use manifest::SnapshotManifest;

use entdb_schema::FrozenSchema;
use entdb_store::StoreManager;
use entdb_types::TenantId;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Snapshotter configuration (spec.md `snapshot.*`), plus the object-store
/// key prefix snapshots are written under.
#[derive(Debug, Clone)]
pub struct SnapshotterConfig {
    /// Hours between scheduled snapshots of a given tenant.
    pub interval_hours: u64,
    /// How long a snapshot is retained before `prune_retention` deletes it.
    pub retention_days: u64,
    /// Object storage key prefix (spec.md §6: `snapshots/<tenant>/<position>/`).
    pub object_prefix: String,
    /// Global cap on concurrently running tenant snapshots (spec.md §5:
    /// "gated by a global concurrency limit").
    pub max_concurrent: usize,
}

impl From<entdb_types::SnapshotConfig> for SnapshotterConfig {
    fn from(c: entdb_types::SnapshotConfig) -> Self {
        Self {
            interval_hours: c.interval_hours,
            retention_days: c.retention_days,
            object_prefix: "snapshots".to_string(),
            max_concurrent: 4,
        }
    }
}

/// Takes and prunes per-tenant snapshots against a shared object store.
pub struct Snapshotter {
    store_manager: Arc<StoreManager>,
    schema: Arc<FrozenSchema>,
    object_store: Arc<dyn ObjectStore>,
    config: SnapshotterConfig,
    concurrency: Arc<Semaphore>,
}

impl Snapshotter {
    /// Build a snapshotter over `store_manager`, writing to `object_store`.
    pub fn new(
        store_manager: Arc<StoreManager>,
        schema: Arc<FrozenSchema>,
        object_store: Arc<dyn ObjectStore>,
        config: SnapshotterConfig,
    ) -> Self {
        let concurrency = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self { store_manager, schema, object_store, config, concurrency }
    }

    /// Run the four-step snapshot procedure for one tenant (spec.md §4.7).
    /// Safe to run concurrently with heavy apply traffic: `backup_to` uses
    /// SQLite's own consistent `VACUUM INTO` snapshot, so it never blocks
    /// or is torn by the applier's writer.
    pub async fn snapshot_tenant(&self, tenant_id: &TenantId) -> anyhow::Result<SnapshotManifest> {
        let _permit = self.concurrency.acquire().await?;

        let store = self.store_manager.get(tenant_id).await?;

        // Step 1: current applied position.
        let position = store.checkpoint().await?.unwrap_or(entdb_types::Position::ZERO);

        // Step 2: consistent backup into a local staging directory.
        let staging = tempfile::tempdir()?;
        let files = store.backup_to(staging.path()).await?;

        // Step 3: stream the backup files to object storage.
        let dir_key = format!(
            "{}/{}/{}",
            self.config.object_prefix,
            tenant_id,
            SnapshotManifest::position_key(position)
        );
        let mut file_list = Vec::with_capacity(files.len());
        let mut checksums = HashMap::with_capacity(files.len());
        for path in &files {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("backup file has no utf-8 name: {}", path.display()))?
                .to_string();
            let bytes = tokio::fs::read(path).await?;
            let checksum = hex_encode(Sha256::digest(&bytes));
            let object_path = ObjectPath::from(format!("{dir_key}/{file_name}"));
            self.object_store.put(&object_path, PutPayload::from(bytes)).await?;
            checksums.insert(file_name.clone(), checksum);
            file_list.push(file_name);
        }

        // Step 4: manifest, written last.
        let schema_fingerprint = hex_encode(self.schema.fingerprint());
        let manifest = SnapshotManifest {
            tenant_id: tenant_id.clone(),
            wal_position: position,
            schema_fingerprint,
            created_at: chrono::Utc::now().timestamp_millis(),
            file_list,
            checksums,
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        let manifest_path = ObjectPath::from(format!("{dir_key}/manifest.json"));
        self.object_store.put(&manifest_path, PutPayload::from(manifest_bytes)).await?;

        info!(tenant = %tenant_id, ?position, "snapshot complete");
        Ok(manifest)
    }

    /// Delete snapshots older than `retention_days` for `tenant_id`. The
    /// manifest is deleted first so a reader never sees a snapshot
    /// directory whose data is mid-deletion but whose manifest still
    /// claims it is whole.
    pub async fn prune_retention(&self, tenant_id: &TenantId) -> anyhow::Result<usize> {
        use futures::StreamExt;

        let prefix = ObjectPath::from(format!("{}/{}", self.config.object_prefix, tenant_id));
        let listing = self.object_store.list_with_delimiter(Some(&prefix)).await?;
        let cutoff = chrono::Utc::now() - chrono::Duration::days(self.config.retention_days as i64);

        let mut pruned = 0usize;
        for snapshot_dir in listing.common_prefixes {
            let manifest_path = ObjectPath::from(format!("{}/manifest.json", snapshot_dir));
            let manifest: SnapshotManifest = match self.object_store.get(&manifest_path).await {
                Ok(result) => match result.bytes().await {
                    Ok(bytes) => match serde_json::from_slice(&bytes) {
                        Ok(m) => m,
                        Err(_) => continue,
                    },
                    Err(_) => continue,
                },
                Err(_) => continue,
            };
            let created = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(manifest.created_at)
                .unwrap_or_else(chrono::Utc::now);
            if created >= cutoff {
                continue;
            }

            if let Err(e) = self.object_store.delete(&manifest_path).await {
                warn!(tenant = %tenant_id, error = %e, "failed to delete expired manifest, skipping snapshot");
                continue;
            }
            let mut objects = self.object_store.list(Some(&snapshot_dir));
            while let Some(meta) = objects.next().await {
                if let Ok(meta) = meta {
                    let _ = self.object_store.delete(&meta.location).await;
                }
            }
            pruned += 1;
        }
        Ok(pruned)
    }

    /// Spawn a background task that snapshots every tenant `list_tenants`
    /// returns, once per `interval_hours`, pruning retention afterward.
    /// Mirrors spec.md §5's "snapshotter task per tenant, gated by a
    /// global concurrency limit" by fanning the per-tick batch out through
    /// the same semaphore `snapshot_tenant` already acquires.
    pub fn spawn_scheduler<F>(self: Arc<Self>, list_tenants: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn() -> Vec<TenantId> + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.config.interval_hours.max(1) * 3600);
            loop {
                let tenants = list_tenants();
                let mut tasks = Vec::with_capacity(tenants.len());
                for tenant in tenants {
                    let this = self.clone();
                    tasks.push(tokio::spawn(async move {
                        if let Err(e) = this.snapshot_tenant(&tenant).await {
                            warn!(tenant = %tenant, error = %e, "scheduled snapshot failed");
                        }
                        if let Err(e) = this.prune_retention(&tenant).await {
                            warn!(tenant = %tenant, error = %e, "retention prune failed");
                        }
                    }));
                }
                for task in tasks {
                    let _ = task.await;
                }
                tokio::time::sleep(period).await;
            }
        })
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
    use entdb_schema::Registry;
    use entdb_types::{FieldDef, FieldKind, NodeType, TypeId};
    use object_store::memory::InMemory;

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
    async fn snapshot_tenant_writes_a_manifest_last_and_it_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema();
        let store_manager = Arc::new(StoreManager::new(dir.path(), schema.clone()));
        let tenant = TenantId::from("tenant-a");
        // Ensure the tenant's store exists before snapshotting it.
        store_manager.get(&tenant).await.unwrap();

        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let snapshotter = Snapshotter::new(
            store_manager,
            schema,
            object_store.clone(),
            SnapshotterConfig { interval_hours: 6, retention_days: 30, object_prefix: "snapshots".to_string(), max_concurrent: 2 },
        );

        let manifest = snapshotter.snapshot_tenant(&tenant).await.unwrap();
        assert_eq!(manifest.tenant_id, tenant);
        assert_eq!(manifest.file_list.len(), 2);
        assert_eq!(manifest.checksums.len(), 2);

        let dir_key = format!("snapshots/{}/{}", tenant, SnapshotManifest::position_key(manifest.wal_position));
        let manifest_path = ObjectPath::from(format!("{dir_key}/manifest.json"));
        let bytes = object_store.get(&manifest_path).await.unwrap().bytes().await.unwrap();
        let reloaded: SnapshotManifest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reloaded.checksums, manifest.checksums);
    }

    #[tokio::test]
    async fn prune_retention_deletes_only_expired_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema();
        let store_manager = Arc::new(StoreManager::new(dir.path(), schema.clone()));
        let tenant = TenantId::from("tenant-b");
        store_manager.get(&tenant).await.unwrap();

        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let snapshotter = Snapshotter::new(
            store_manager,
            schema,
            object_store.clone(),
            SnapshotterConfig { interval_hours: 6, retention_days: 30, object_prefix: "snapshots".to_string(), max_concurrent: 2 },
        );

        let manifest = snapshotter.snapshot_tenant(&tenant).await.unwrap();
        let pruned = snapshotter.prune_retention(&tenant).await.unwrap();
        assert_eq!(pruned, 0, "freshly written snapshot must not be pruned");

        // Backdate the manifest to simulate an expired one, then re-run.
        let dir_key = format!("snapshots/{}/{}", tenant, SnapshotManifest::position_key(manifest.wal_position));
        let mut expired = manifest.clone();
        expired.created_at = 0;
        let manifest_path = ObjectPath::from(format!("{dir_key}/manifest.json"));
        object_store
            .put(&manifest_path, PutPayload::from(serde_json::to_vec(&expired).unwrap()))
            .await
            .unwrap();

        let pruned = snapshotter.prune_retention(&tenant).await.unwrap();
        assert_eq!(pruned, 1);
        assert!(object_store.get(&manifest_path).await.is_err());
    }
}
