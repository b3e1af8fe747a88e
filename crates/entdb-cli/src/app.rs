//! Bootstraps one in-process EntDB instance and dispatches CLI commands
//! against it, the way `apps/toka-cli` assembles a `toka_runtime::Runtime`
//! and `crates/toka-cli`'s `CliApp` wraps a `Kernel`: one struct owning
//! every shared component, one `execute` entry point per command,
//! returning a JSON string rather than printing inline.

use crate::node_lookup::StoreNodeLookup;
use crate::{Cli, Commands, Direction, WalBackend};
use entdb_applier::{Applier, ApplierConfig, AppliedPositionTracker};
use entdb_coordinator::Coordinator;
use entdb_recovery::{Recovery, RecoveryConfig, RecoveryTarget};
use entdb_schema::FrozenSchema;
use entdb_snapshotter::{Snapshotter, SnapshotterConfig};
use entdb_store::StoreManager;
use entdb_types::{Config, EdgeTypeId, NodeId, Operation, Position, TenantId, TxRequest, TypeId, Value};
use entdb_wal_core::Wal;
use object_store::local::LocalFileSystem;
use object_store::ObjectStore;
use std::collections::HashMap;
use std::sync::Arc;

/// One assembled, in-process EntDB instance: every component the spec's
/// C1-C8 modules define, wired together the way a production deployment
/// would split them across processes but collapsed here into one binary
/// for operator convenience.
pub struct App {
    schema: Arc<FrozenSchema>,
    wal: Arc<dyn Wal>,
    store_manager: Arc<StoreManager>,
    coordinator: Coordinator<StoreNodeLookup, Arc<AppliedPositionTracker>>,
    applier: Arc<Applier>,
    snapshotter: Arc<Snapshotter>,
    recovery: Recovery,
    partition_count: u32,
}

impl App {
    /// Assemble every component from `cli` flags layered over `config`.
    pub async fn bootstrap(cli: &Cli, config: &Config) -> anyhow::Result<Self> {
        let schema = Arc::new(entdb_schema::builtin::load()?);

        let wal = build_wal(cli, config).await?;

        let store_manager = Arc::new(StoreManager::new(config.store.data_dir.clone(), schema.clone()));
        let tracker = Arc::new(AppliedPositionTracker::new(store_manager.clone()));
        let node_lookup = StoreNodeLookup::new(store_manager.clone());

        let coordinator = Coordinator::new(schema.clone(), wal.clone(), node_lookup, tracker.clone(), config.deadline_default_ms);

        let applier = Arc::new(Applier::new(
            wal.clone(),
            store_manager.clone(),
            tracker.clone(),
            config.apply.deadletter_dir.clone(),
            ApplierConfig { max_retry_backoff_ms: config.apply.max_retry_backoff_ms },
        ));

        let object_store: Arc<dyn ObjectStore> = Arc::new(LocalFileSystem::new_with_prefix(&cli.object_store_root)?);

        let snapshotter = Arc::new(Snapshotter::new(
            store_manager.clone(),
            schema.clone(),
            object_store.clone(),
            SnapshotterConfig::from(config.snapshot.clone()),
        ));

        let recovery = Recovery::new(
            object_store.clone(),
            store_manager.clone(),
            wal.clone(),
            schema.clone(),
            RecoveryConfig {
                snapshot_prefix: "snapshots".to_string(),
                archive_prefix: config.archive.object_prefix.clone(),
                partition_count: cli.partition_count,
            },
        );

        Ok(Self { schema, wal, store_manager, coordinator, applier, snapshotter, recovery, partition_count: cli.partition_count })
    }

    /// Run one command to completion, returning a pretty-printed JSON
    /// result string. Mirrors `crates/toka-cli::CliApp::execute`'s shape:
    /// no printing here, the caller decides how to surface the result.
    pub async fn execute(&self, command: Commands) -> anyhow::Result<String> {
        match command {
            Commands::Submit { tenant, actor, idempotency_key, operations, wait } => {
                self.submit(tenant, actor, idempotency_key, operations, wait).await
            }
            Commands::Get { tenant, node_id } => self.get(tenant, node_id).await,
            Commands::QueryNodes { tenant, type_id, filter, limit, offset } => {
                self.query_nodes(tenant, type_id, filter, limit, offset).await
            }
            Commands::Edges { tenant, node_id, direction, edge_type } => {
                self.edges(tenant, node_id, direction, edge_type).await
            }
            Commands::Mailbox { tenant, user, limit, offset } => self.mailbox(tenant, user, limit, offset).await,
            Commands::Search { tenant, user, query } => self.search(tenant, user, query).await,
            Commands::Health => self.health().await,
            Commands::Snapshot { tenant } => self.snapshot(tenant).await,
            Commands::Recover { tenant, partition, offset } => self.recover(tenant, partition, offset).await,
            Commands::SchemaInfo => self.schema_info(),
        }
    }

    async fn submit(
        &self,
        tenant: String,
        actor: String,
        idempotency_key: String,
        operations_path: std::path::PathBuf,
        wait: bool,
    ) -> anyhow::Result<String> {
        let tenant_id = TenantId::from(tenant);
        let raw = std::fs::read_to_string(&operations_path)?;
        let operations: Vec<Operation> = serde_json::from_str(&raw)?;

        let partition = self.wal.partition_for_tenant(&tenant_id, self.partition_count);
        self.applier.assign(tenant_id.clone(), partition);

        let request = TxRequest {
            tenant_id,
            actor,
            idempotency_key,
            operations,
            schema_fingerprint: None,
            wait_for_applied: wait,
            deadline_ms: None,
        };

        let receipt = self
            .coordinator
            .submit(request)
            .await
            .map_err(|e| anyhow::anyhow!("{}: {}", e.message, e.correlation_id))?;
        Ok(serde_json::to_string_pretty(&receipt)?)
    }

    async fn get(&self, tenant: String, node_id: String) -> anyhow::Result<String> {
        let store = self.store_manager.get(&TenantId::from(tenant)).await?;
        let id: NodeId = node_id.parse().map_err(|_| anyhow::anyhow!("invalid node id '{node_id}'"))?;
        let node = store.get_node(id).await?;
        Ok(serde_json::to_string_pretty(&node)?)
    }

    async fn query_nodes(
        &self,
        tenant: String,
        type_id: u32,
        filter: Vec<String>,
        limit: u32,
        offset: u32,
    ) -> anyhow::Result<String> {
        let store = self.store_manager.get(&TenantId::from(tenant)).await?;
        let mut filters = HashMap::new();
        for entry in filter {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("filter '{entry}' is not of the form key=value"))?;
            filters.insert(key.to_string(), Value::Str(value.to_string()));
        }
        let nodes = store.query_nodes(TypeId(type_id), &filters, limit, offset).await?;
        Ok(serde_json::to_string_pretty(&nodes)?)
    }

    async fn edges(
        &self,
        tenant: String,
        node_id: String,
        direction: Direction,
        edge_type: Option<u32>,
    ) -> anyhow::Result<String> {
        let store = self.store_manager.get(&TenantId::from(tenant)).await?;
        let id: NodeId = node_id.parse().map_err(|_| anyhow::anyhow!("invalid node id '{node_id}'"))?;
        let edge_type = edge_type.map(EdgeTypeId);
        let edges = match direction {
            Direction::Out => store.edges_out(id, edge_type).await?,
            Direction::In => store.edges_in(id, edge_type).await?,
        };
        Ok(serde_json::to_string_pretty(&edges)?)
    }

    async fn mailbox(&self, tenant: String, user: String, limit: u32, offset: u32) -> anyhow::Result<String> {
        let store = self.store_manager.get(&TenantId::from(tenant)).await?;
        let items = store.mailbox(&user, limit, offset).await?;
        Ok(serde_json::to_string_pretty(&items)?)
    }

    async fn search(&self, tenant: String, user: String, query: String) -> anyhow::Result<String> {
        let store = self.store_manager.get(&TenantId::from(tenant)).await?;
        let items = store.search(&user, &query).await?;
        Ok(serde_json::to_string_pretty(&items)?)
    }

    async fn health(&self) -> anyhow::Result<String> {
        let wal_reachable = self.wal.latest_position(0).await.is_ok();
        let report = serde_json::json!({
            "wal_reachable": wal_reachable,
            "partition_count": self.partition_count,
            "schema_fingerprint": hex_encode(self.schema.fingerprint()),
        });
        Ok(serde_json::to_string_pretty(&report)?)
    }

    async fn snapshot(&self, tenant: String) -> anyhow::Result<String> {
        let manifest = self.snapshotter.snapshot_tenant(&TenantId::from(tenant)).await?;
        Ok(serde_json::to_string_pretty(&manifest)?)
    }

    async fn recover(&self, tenant: String, partition: Option<u32>, offset: Option<u64>) -> anyhow::Result<String> {
        let target = match (partition, offset) {
            (Some(partition), Some(offset)) => RecoveryTarget::Position(Position::new(partition, offset)),
            _ => RecoveryTarget::Latest,
        };
        let outcome = self.recovery.recover_tenant(&TenantId::from(tenant), target).await?;
        Ok(serde_json::to_string_pretty(&serde_json::json!({
            "restored_from_snapshot": outcome.restored_from_snapshot,
            "final_position": outcome.final_position,
            "events_replayed": outcome.events_replayed,
        }))?)
    }

    fn schema_info(&self) -> anyhow::Result<String> {
        let schema = self.schema.schema();
        let report = serde_json::json!({
            "fingerprint": hex_encode(self.schema.fingerprint()),
            "node_types": schema.node_types,
            "edge_types": schema.edge_types,
        });
        Ok(serde_json::to_string_pretty(&report)?)
    }
}

async fn build_wal(cli: &Cli, config: &Config) -> anyhow::Result<Arc<dyn Wal>> {
    match cli.wal_backend {
        WalBackend::Memory => Ok(Arc::new(entdb_wal_memory::MemoryWal::new(cli.partition_count, config.wal.max_record_bytes))),
        WalBackend::Kafka => build_kafka_wal(cli, config),
        WalBackend::Kinesis => build_kinesis_wal(cli, config).await,
    }
}

#[cfg(feature = "kafka-wal")]
fn build_kafka_wal(cli: &Cli, config: &Config) -> anyhow::Result<Arc<dyn Wal>> {
    let bootstrap_servers = cli
        .kafka_brokers
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--kafka-brokers is required for --wal-backend kafka"))?;
    let topic = cli.kafka_topic.clone().unwrap_or_else(|| "entdb-wal".to_string());
    let wal = entdb_wal_kafka::KafkaWal::connect(entdb_wal_kafka::KafkaWalConfig {
        bootstrap_servers,
        topic,
        min_insync: config.wal.min_insync,
        max_record_bytes: config.wal.max_record_bytes,
        batch_linger_ms: config.wal.batch_linger_ms,
    })?;
    Ok(Arc::new(wal))
}

#[cfg(not(feature = "kafka-wal"))]
fn build_kafka_wal(_cli: &Cli, _config: &Config) -> anyhow::Result<Arc<dyn Wal>> {
    anyhow::bail!("this binary was built without the 'kafka-wal' feature; rebuild with --features kafka-wal")
}

#[cfg(feature = "kinesis-wal")]
async fn build_kinesis_wal(cli: &Cli, config: &Config) -> anyhow::Result<Arc<dyn Wal>> {
    let stream_name = cli
        .kinesis_stream
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--kinesis-stream is required for --wal-backend kinesis"))?;
    let aws_config = aws_config::load_from_env().await;
    let client = aws_sdk_kinesis::Client::new(&aws_config);
    let wal = entdb_wal_kinesis::KinesisWal::new(
        client,
        entdb_wal_kinesis::KinesisWalConfig {
            stream_name,
            shard_count: cli.partition_count,
            max_record_bytes: config.wal.max_record_bytes,
        },
    );
    Ok(Arc::new(wal))
}

#[cfg(not(feature = "kinesis-wal"))]
async fn build_kinesis_wal(_cli: &Cli, _config: &Config) -> anyhow::Result<Arc<dyn Wal>> {
    anyhow::bail!("this binary was built without the 'kinesis-wal' feature; rebuild with --features kinesis-wal")
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.as_ref().len() * 2);
    for byte in bytes.as_ref() {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
