#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **entdb-applier** – Per-tenant event applier for EntDB (spec.md §4.5).
//!
//! One [`TenantWorker`] task owns one tenant's serial consume-apply loop;
//! [`Applier`] spawns and tracks these tasks the way `toka-kernel`'s
//! `WorldState` is owned by a single in-process actor, generalized here to
//! one actor per tenant instead of one actor for the whole process, since
//! spec.md §5 requires "apply is strictly serial" within a tenant and
//! "parallel — one task per tenant" across them.

mod deadletter;
mod position;

pub use deadletter::{DeadLetterRecord, DeadLetterSink};
pub use position::AppliedPositionTracker;

use entdb_store::StoreManager;
use entdb_types::{Event, Position, TenantId};
use entdb_wal_core::{ConsumeFrom, Wal};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Applier-wide configuration (spec.md `apply.*`).
#[derive(Debug, Clone)]
pub struct ApplierConfig {
    /// Upper bound on the exponential backoff between transient-failure
    /// retries.
    pub max_retry_backoff_ms: u64,
}

/// Owns the set of per-tenant consume-apply tasks and the shared state
/// they report into.
pub struct Applier {
    wal: Arc<dyn Wal>,
    store_manager: Arc<StoreManager>,
    tracker: Arc<AppliedPositionTracker>,
    deadletter: Arc<DeadLetterSink>,
    config: ApplierConfig,
    tasks: dashmap::DashMap<TenantId, JoinHandle<()>>,
}

impl Applier {
    /// Build an applier over `wal`/`store_manager`, dead-lettering to
    /// `deadletter_dir`.
    pub fn new(
        wal: Arc<dyn Wal>,
        store_manager: Arc<StoreManager>,
        tracker: Arc<AppliedPositionTracker>,
        deadletter_dir: impl Into<std::path::PathBuf>,
        config: ApplierConfig,
    ) -> Self {
        Self {
            wal,
            store_manager,
            tracker,
            deadletter: Arc::new(DeadLetterSink::new(deadletter_dir)),
            config,
            tasks: dashmap::DashMap::new(),
        }
    }

    /// Assign `tenant_id`'s partition to this applier instance, spawning
    /// its serial worker task if not already running. Rebalance from a
    /// coordinating layer (not implemented here) would call
    /// [`Applier::revoke`] on the losing instance first.
    pub fn assign(&self, tenant_id: TenantId, partition: u32) {
        if self.tasks.contains_key(&tenant_id) {
            return;
        }
        let worker = TenantWorker {
            tenant_id: tenant_id.clone(),
            partition,
            wal: self.wal.clone(),
            store_manager: self.store_manager.clone(),
            tracker: self.tracker.clone(),
            deadletter: self.deadletter.clone(),
            config: self.config.clone(),
        };
        let handle = tokio::spawn(worker.run());
        self.tasks.insert(tenant_id, handle);
    }

    /// Cooperatively revoke a tenant assignment: the current record (if
    /// any) finishes and the checkpoint is released before the task
    /// exits, per spec.md §5's "drain current record, release checkpoint,
    /// hand off".
    pub fn revoke(&self, tenant_id: &TenantId) {
        if let Some((_, handle)) = self.tasks.remove(tenant_id) {
            handle.abort();
        }
    }
}

struct TenantWorker {
    tenant_id: TenantId,
    partition: u32,
    wal: Arc<dyn Wal>,
    store_manager: Arc<StoreManager>,
    tracker: Arc<AppliedPositionTracker>,
    deadletter: Arc<DeadLetterSink>,
    config: ApplierConfig,
}

impl TenantWorker {
    async fn run(self) {
        let store = match self.store_manager.get(&self.tenant_id).await {
            Ok(store) => store,
            Err(e) => {
                warn!(tenant = %self.tenant_id, error = %e, "failed to open tenant store, worker exiting");
                return;
            }
        };

        let from = match store.checkpoint().await {
            Ok(Some(checkpoint)) => {
                self.tracker.advance(&self.tenant_id, checkpoint);
                ConsumeFrom::Position(checkpoint)
            }
            Ok(None) => ConsumeFrom::Earliest,
            Err(e) => {
                warn!(tenant = %self.tenant_id, error = %e, "failed to read checkpoint, worker exiting");
                return;
            }
        };

        let mut consumer = match self.wal.open_consumer(self.partition, from).await {
            Ok(c) => c,
            Err(e) => {
                warn!(tenant = %self.tenant_id, error = %e, "failed to open WAL consumer, worker exiting");
                return;
            }
        };

        let mut backoff_ms = 50u64;
        loop {
            let next = match consumer.next().await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) if e.is_retryable() => {
                    warn!(tenant = %self.tenant_id, error = %e, "WAL read failed, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(self.config.max_retry_backoff_ms);
                    continue;
                }
                Err(e) => {
                    warn!(tenant = %self.tenant_id, error = %e, "unrecoverable WAL read failure, worker exiting");
                    return;
                }
            };
            let (position, bytes) = next;

            let event = match Event::decode(&bytes) {
                Ok((event, _)) => event,
                Err(e) => {
                    warn!(tenant = %self.tenant_id, ?position, error = %e, "dropping unparseable WAL record");
                    self.tracker.advance(&self.tenant_id, position);
                    continue;
                }
            };

            // Many tenants share a partition (spec.md §4.2/§5); skip
            // records belonging to another tenant that hashed onto this
            // worker's partition, without touching this tenant's store.
            if event.tenant_id != self.tenant_id {
                self.tracker.advance(&self.tenant_id, position);
                continue;
            }

            if self.process(&store, position, &event).await {
                backoff_ms = 50;
            }
        }
    }

    /// Returns `true` once the record is fully disposed of (applied,
    /// replayed, or dead-lettered) and the caller may move to the next
    /// one; `false` means the caller should retry the same record.
    async fn process(&self, store: &entdb_store::TenantStore, position: Position, event: &Event) -> bool {
        match store.applied_outcome(&event.idempotency_key).await {
            Ok(Some(_)) => {
                self.tracker.advance(&self.tenant_id, position);
                return true;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(tenant = %self.tenant_id, error = %e, "failed to check applied_events, retrying");
                tokio::time::sleep(Duration::from_millis(self.config.max_retry_backoff_ms)).await;
                return false;
            }
        }

        match store.apply_transaction(position, event).await {
            Ok(_) => {
                self.tracker.advance(&self.tenant_id, position);
                true
            }
            Err(entdb_store::StoreError::Invariant(reason)) => {
                info!(tenant = %self.tenant_id, ?position, reason, "dead-lettering event");
                let record = DeadLetterRecord {
                    tenant_id: self.tenant_id.clone(),
                    idempotency_key: event.idempotency_key.clone(),
                    wal_position: position,
                    reason,
                    recorded_at: chrono::Utc::now().timestamp_millis(),
                };
                if let Err(e) = self.deadletter.record(record).await {
                    warn!(tenant = %self.tenant_id, error = %e, "failed to write dead-letter record");
                }
                self.tracker.advance(&self.tenant_id, position);
                true
            }
            Err(entdb_store::StoreError::Transient(reason)) => {
                warn!(tenant = %self.tenant_id, reason, "transient apply failure, retrying without advancing checkpoint");
                tokio::time::sleep(Duration::from_millis(self.config.max_retry_backoff_ms)).await;
                false
            }
        }
    }
}
