//! Configuration surface (spec.md §6), deserialized via `serde` from
//! TOML/env by the `config` crate in `entdb-cli`. Defaults here match the
//! parenthesized defaults enumerated in spec.md §6 exactly.

use serde::{Deserialize, Serialize};

/// WAL backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalBackendKind {
    /// Kafka-family broker (`entdb-wal-kafka`).
    Kafka,
    /// Sharded append stream in the Kinesis family (`entdb-wal-kinesis`).
    Kinesis,
}

/// `wal.*` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Selected backend.
    pub backend: WalBackendKind,
    /// Acknowledgment policy; always "all" in this implementation.
    pub acks: String,
    /// Minimum in-sync replicas required before an append is acknowledged.
    pub min_insync: u32,
    /// Maximum size of a single WAL record, in bytes.
    pub max_record_bytes: usize,
    /// Producer batch size, in bytes.
    pub batch_bytes: usize,
    /// Producer batch linger time, in milliseconds.
    pub batch_linger_ms: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            backend: WalBackendKind::Kafka,
            acks: "all".to_string(),
            min_insync: 2,
            max_record_bytes: 1 << 20,
            batch_bytes: 64 * 1024,
            batch_linger_ms: 5,
        }
    }
}

/// `apply.*` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Parallelism per node; `0` means "auto" (one task per assigned
    /// tenant partition).
    pub parallelism_per_node: usize,
    /// Maximum backoff between transient-failure retries, in
    /// milliseconds.
    pub max_retry_backoff_ms: u64,
    /// Directory dead-lettered events are written to.
    pub deadletter_dir: String,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            parallelism_per_node: 0,
            max_retry_backoff_ms: 5000,
            deadletter_dir: "./data/deadletter".to_string(),
        }
    }
}

/// `store.*` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory holding one subdirectory per tenant.
    pub data_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { data_dir: "./data/tenants".to_string() }
    }
}

/// `archive.*` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Segment size threshold, in bytes (compressed).
    pub segment_bytes: u64,
    /// Segment time threshold, in seconds.
    pub segment_seconds: u64,
    /// Object storage key prefix (e.g. `s3://bucket/archive`).
    pub object_prefix: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            segment_bytes: 256 * 1024 * 1024,
            segment_seconds: 600,
            object_prefix: "archive".to_string(),
        }
    }
}

/// `snapshot.*` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Interval between scheduled snapshots, in hours.
    pub interval_hours: u64,
    /// Retention window for snapshots, in days.
    pub retention_days: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { interval_hours: 6, retention_days: 30 }
    }
}

/// `registry.*` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Module path or identifier the schema definitions are loaded from.
    pub schema_module: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { schema_module: "entdb_schema::builtin".to_string() }
    }
}

/// Top-level configuration, assembled the way `toka-cli` assembles a
/// `RuntimeConfig`: defaults here, overridden by a config file, overridden
/// again by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// WAL configuration.
    pub wal: WalConfig,
    /// Applier configuration.
    pub apply: ApplyConfig,
    /// Per-tenant store configuration.
    pub store: StoreConfig,
    /// Archiver configuration.
    pub archive: ArchiveConfig,
    /// Snapshotter configuration.
    pub snapshot: SnapshotConfig,
    /// Schema registry configuration.
    pub registry: RegistryConfig,
    /// Default request deadline, in milliseconds.
    pub deadline_default_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wal: WalConfig::default(),
            apply: ApplyConfig::default(),
            store: StoreConfig::default(),
            archive: ArchiveConfig::default(),
            snapshot: SnapshotConfig::default(),
            registry: RegistryConfig::default(),
            deadline_default_ms: 30_000,
        }
    }
}

impl Default for WalBackendKind {
    fn default() -> Self {
        WalBackendKind::Kafka
    }
}
