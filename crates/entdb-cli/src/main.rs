#![forbid(unsafe_code)]

//! **entdb-cli** – Command-line interface for EntDB.
//!
//! Assembles one in-process instance of the write pipeline (schema
//! registry, WAL, coordinator, applier, snapshotter, recovery driver) and
//! dispatches a single operator command against it, the way `toka-cli`
//! assembles a `toka-runtime::Runtime` before dispatching a command. The
//! wire protocol (gRPC/HTTP) this CLI's commands stand in for remains out
//! of scope (spec.md §1).

mod app;
mod config;
mod node_lookup;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use app::App;

#[derive(Parser)]
#[command(name = "entdb")]
#[command(about = "EntDB operator CLI")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (optional; `ENTDB__*` env vars and
    /// built-in defaults still apply without one).
    #[arg(long)]
    config: Option<String>,

    /// WAL backend to bootstrap for this invocation. `memory` is
    /// non-persistent and only useful within a single invocation;
    /// `kafka`/`kinesis` require the matching cargo feature.
    #[arg(long, value_enum, default_value_t = WalBackend::Memory)]
    wal_backend: WalBackend,

    /// Number of WAL partitions (and, for `kinesis`, shards).
    #[arg(long, default_value_t = 16)]
    partition_count: u32,

    /// Directory the local object store (snapshots, archive segments) is
    /// rooted at.
    #[arg(long, default_value = "./data/objects")]
    object_store_root: String,

    /// Kafka bootstrap servers, required when `--wal-backend kafka`.
    #[arg(long)]
    kafka_brokers: Option<String>,

    /// Kafka topic, defaults to `entdb-wal`.
    #[arg(long)]
    kafka_topic: Option<String>,

    /// Kinesis stream name, required when `--wal-backend kinesis`.
    #[arg(long)]
    kinesis_stream: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum WalBackend {
    Memory,
    Kafka,
    Kinesis,
}

impl std::fmt::Display for WalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WalBackend::Memory => "memory",
            WalBackend::Kafka => "kafka",
            WalBackend::Kinesis => "kinesis",
        })
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    Out,
    In,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an atomic transaction (spec.md §4.3).
    Submit {
        /// Target tenant.
        #[arg(long)]
        tenant: String,
        /// Principal the transaction is submitted on behalf of.
        #[arg(long)]
        actor: String,
        /// Client-chosen idempotency key.
        #[arg(long)]
        idempotency_key: String,
        /// Path to a JSON file containing an array of operations, each
        /// shaped like `entdb_types::Operation`'s serde representation.
        #[arg(long)]
        operations: std::path::PathBuf,
        /// Block until the applier has caught up to this transaction's
        /// WAL position before returning.
        #[arg(long, default_value_t = false)]
        wait: bool,
    },
    /// Fetch one node by id.
    Get {
        /// Target tenant.
        #[arg(long)]
        tenant: String,
        /// Node id, as printed by `submit`/`query-nodes` (32 hex chars).
        #[arg(long)]
        node_id: String,
    },
    /// List nodes of a type, optionally filtered by exact-match fields.
    QueryNodes {
        /// Target tenant.
        #[arg(long)]
        tenant: String,
        /// Numeric type id.
        #[arg(long)]
        type_id: u32,
        /// Repeatable `key=value` exact-match filter.
        #[arg(long = "filter")]
        filter: Vec<String>,
        /// Maximum rows to return.
        #[arg(long, default_value_t = 50)]
        limit: u32,
        /// Rows to skip.
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// List a node's incoming or outgoing edges.
    Edges {
        /// Target tenant.
        #[arg(long)]
        tenant: String,
        /// Node id.
        #[arg(long)]
        node_id: String,
        /// Which endpoint `node_id` occupies.
        #[arg(long, value_enum, default_value_t = Direction::Out)]
        direction: Direction,
        /// Restrict to one numeric edge type id.
        #[arg(long)]
        edge_type: Option<u32>,
    },
    /// List a user's mailbox, newest first.
    Mailbox {
        /// Target tenant.
        #[arg(long)]
        tenant: String,
        /// Recipient user id.
        #[arg(long)]
        user: String,
        /// Maximum rows to return.
        #[arg(long, default_value_t = 50)]
        limit: u32,
        /// Rows to skip.
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Full-text search a user's mailbox snippets.
    Search {
        /// Target tenant.
        #[arg(long)]
        tenant: String,
        /// Recipient user id.
        #[arg(long)]
        user: String,
        /// Full-text query.
        #[arg(long)]
        query: String,
    },
    /// Report whether the configured WAL backend is reachable.
    Health,
    /// Force an immediate consistent snapshot of one tenant.
    Snapshot {
        /// Target tenant.
        #[arg(long)]
        tenant: String,
    },
    /// Rebuild one tenant's store from its latest snapshot plus archive
    /// plus live WAL (spec.md §4.8).
    Recover {
        /// Target tenant.
        #[arg(long)]
        tenant: String,
        /// Stop at this WAL partition (requires `--offset`); omit both to
        /// recover up to the live tail.
        #[arg(long)]
        partition: Option<u32>,
        /// Stop at this WAL offset (requires `--partition`).
        #[arg(long)]
        offset: Option<u64>,
    },
    /// Print the live, frozen schema: node types, edge types, fingerprint.
    SchemaInfo,
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = config::load(cli.config.as_deref())?;
    let app = App::bootstrap(&cli, &config).await?;

    let result = app.execute(cli.command).await?;
    println!("{result}");

    Ok(())
}
