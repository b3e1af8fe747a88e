#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **entdb-store** – Per-tenant canonical and mailbox stores for EntDB
//! (spec.md §4.4).
//!
//! Generalizes `toka-store-sqlite`'s single `SqlitePool` + `migrate()` +
//! `StorageBackend` shape from a two-table event store into the
//! seven-table relational schema spec.md §4.4 defines, split across two
//! files per tenant (`canonical.db`, `mailbox.db`) so a tenant's durable
//! graph state and its ephemeral notification inbox can be backed up,
//! restored, or dropped independently (spec.md §4.7's per-tenant
//! snapshot boundary).

mod apply;
mod error;
mod reader;
pub mod snippets;

pub use apply::ApplyOutcome;
pub use error::StoreError;

use entdb_schema::FrozenSchema;
use entdb_types::TenantId;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

const CANONICAL_MIGRATIONS: &str = include_str!("schema_canonical.sql");
const MAILBOX_MIGRATIONS: &str = include_str!("schema_mailbox.sql");

/// One tenant's pair of embedded SQLite stores.
pub struct TenantStore {
    tenant_id: TenantId,
    canonical: SqlitePool,
    mailbox: SqlitePool,
    schema: Arc<FrozenSchema>,
}

impl TenantStore {
    /// Open (creating if absent) the canonical and mailbox databases under
    /// `dir`, running migrations on both.
    pub async fn open(tenant_id: TenantId, dir: impl AsRef<Path>, schema: Arc<FrozenSchema>) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(dir.as_ref())
            .await
            .map_err(|e| StoreError::Transient(format!("failed to create tenant dir: {e}")))?;

        let canonical_path = dir.as_ref().join("canonical.db");
        let mailbox_path = dir.as_ref().join("mailbox.db");

        let canonical = SqlitePool::connect(&format!("sqlite://{}?mode=rwc", canonical_path.display())).await?;
        let mailbox = SqlitePool::connect(&format!("sqlite://{}?mode=rwc", mailbox_path.display())).await?;

        for statement in CANONICAL_MIGRATIONS.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&canonical).await?;
        }
        for statement in MAILBOX_MIGRATIONS.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&mailbox).await?;
        }

        Ok(Self { tenant_id, canonical, mailbox, schema })
    }

    /// Open in-memory stores, for tests.
    pub async fn in_memory(tenant_id: TenantId, schema: Arc<FrozenSchema>) -> Result<Self, StoreError> {
        let canonical = SqlitePool::connect("sqlite::memory:").await?;
        let mailbox = SqlitePool::connect("sqlite::memory:").await?;
        for statement in CANONICAL_MIGRATIONS.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&canonical).await?;
        }
        for statement in MAILBOX_MIGRATIONS.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&mailbox).await?;
        }
        Ok(Self { tenant_id, canonical, mailbox, schema })
    }

    /// This store's tenant.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Read the applier's last-committed checkpoint from `tenant_meta`, or
    /// `None` if the tenant has never had an event applied. This doubles
    /// as the tenant's "applied position" for the snapshotter (spec.md
    /// §4.7 step 1).
    pub async fn checkpoint(&self) -> Result<Option<entdb_types::Position>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT v FROM tenant_meta WHERE k = 'checkpoint'")
            .fetch_optional(&self.canonical)
            .await?;
        Ok(row.and_then(|(v,)| serde_json::from_str(&v).ok()))
    }

    /// Read the schema fingerprint the last-applied event was validated
    /// against, as recorded into `tenant_meta` by `apply_transaction`.
    /// Recovery (spec.md §4.8 step 5) compares this against the live
    /// registry's fingerprint before mounting a restored store.
    pub async fn schema_fingerprint(&self) -> Result<Option<[u8; 32]>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT v FROM tenant_meta WHERE k = 'schema_fingerprint'")
            .fetch_optional(&self.canonical)
            .await?;
        Ok(row.and_then(|(hex_str,)| decode_hex32(&hex_str)))
    }

    /// Write a consistent, crash-safe backup of both databases into
    /// `dest_dir`, returning the backup file paths. Uses SQLite's own
    /// `VACUUM INTO`, which snapshots the database at a single point in
    /// time without blocking concurrent readers or the applier's writer
    /// (spec.md §4.7 step 2: "the embedded store must support a
    /// consistent backup operation").
    pub async fn backup_to(&self, dest_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, StoreError> {
        tokio::fs::create_dir_all(dest_dir.as_ref())
            .await
            .map_err(|e| StoreError::Transient(format!("failed to create backup dir: {e}")))?;

        let canonical_dest = dest_dir.as_ref().join("canonical.db");
        let mailbox_dest = dest_dir.as_ref().join("mailbox.db");

        // Any pre-existing file at the destination makes VACUUM INTO fail;
        // this path is always a fresh staging directory per snapshot, but
        // guard against a retried snapshot reusing one.
        for path in [&canonical_dest, &mailbox_dest] {
            let _ = tokio::fs::remove_file(path).await;
        }

        sqlx::query(&format!("VACUUM INTO '{}'", canonical_dest.display()))
            .execute(&self.canonical)
            .await?;
        sqlx::query(&format!("VACUUM INTO '{}'", mailbox_dest.display()))
            .execute(&self.mailbox)
            .await?;

        Ok(vec![canonical_dest, mailbox_dest])
    }
}

fn decode_hex32(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

/// Opens and caches one [`TenantStore`] per tenant under a shared root
/// directory (spec.md §4.4: "held in a directory"). Mirrors the
/// "one embedded backend instance per logical partition" shape `toka`'s
/// storage drivers assume their caller provides.
pub struct StoreManager {
    root: PathBuf,
    schema: Arc<FrozenSchema>,
    open: RwLock<HashMap<TenantId, Arc<TenantStore>>>,
}

impl StoreManager {
    /// Create a manager rooted at `root` (spec.md `store.data_dir`),
    /// validating every tenant's payload against `schema`.
    pub fn new(root: impl Into<PathBuf>, schema: Arc<FrozenSchema>) -> Self {
        Self { root: root.into(), schema, open: RwLock::new(HashMap::new()) }
    }

    /// Get (opening lazily if needed) the store for `tenant_id`.
    pub async fn get(&self, tenant_id: &TenantId) -> Result<Arc<TenantStore>, StoreError> {
        if let Some(store) = self.open.read().await.get(tenant_id) {
            return Ok(store.clone());
        }
        let mut open = self.open.write().await;
        if let Some(store) = open.get(tenant_id) {
            return Ok(store.clone());
        }
        let dir = self.tenant_dir(tenant_id);
        let store = Arc::new(TenantStore::open(tenant_id.clone(), dir, self.schema.clone()).await?);
        open.insert(tenant_id.clone(), store.clone());
        Ok(store)
    }

    /// The on-disk directory a tenant's `canonical.db`/`mailbox.db` live
    /// under, whether or not the store has been opened yet. Recovery
    /// (spec.md §4.8) writes restored backup files here before the next
    /// `get` call opens them.
    pub fn tenant_dir(&self, tenant_id: &TenantId) -> PathBuf {
        self.root.join(tenant_id.as_str())
    }

    /// Drop a cached, already-open handle so a subsequent `get` reopens it
    /// from disk. Recovery calls this after overwriting a tenant's backup
    /// files out from under a live `StoreManager`.
    pub async fn evict(&self, tenant_id: &TenantId) {
        self.open.write().await.remove(tenant_id);
    }
}
