//! Per-tenant "applied position" tracker: the condition variable
//! `Coordinator::submit`'s `wait_for_applied` blocks on (spec.md §4.3 step
//! 8, §5 "suspension points").

use dashmap::DashMap;
use entdb_coordinator::ApplyObserver;
use entdb_store::StoreManager;
use entdb_types::{Conflict, Position, TenantId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

struct TenantPosition {
    /// Packed `(partition, offset)`; `u64::MAX` sentinels "nothing
    /// applied yet" since `offset` alone cannot distinguish partition 0
    /// from an unset tracker.
    partition: AtomicU64,
    offset: AtomicU64,
    notify: Notify,
}

impl TenantPosition {
    fn new() -> Self {
        Self { partition: AtomicU64::new(u64::MAX), offset: AtomicU64::new(0), notify: Notify::new() }
    }

    fn get(&self) -> Option<Position> {
        let partition = self.partition.load(Ordering::Acquire);
        if partition == u64::MAX {
            return None;
        }
        Some(Position::new(partition as u32, self.offset.load(Ordering::Acquire)))
    }

    fn set(&self, position: Position) {
        self.partition.store(position.partition as u64, Ordering::Release);
        self.offset.store(position.offset, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// Shared handle the applier updates as it processes records, and the
/// coordinator reads from while honoring `wait_for_applied`.
pub struct AppliedPositionTracker {
    positions: DashMap<TenantId, Arc<TenantPosition>>,
    store_manager: Arc<StoreManager>,
}

impl AppliedPositionTracker {
    /// Build a tracker backed by `store_manager` for conflict lookups.
    pub fn new(store_manager: Arc<StoreManager>) -> Self {
        Self { positions: DashMap::new(), store_manager }
    }

    fn entry(&self, tenant: &TenantId) -> Arc<TenantPosition> {
        self.positions.entry(tenant.clone()).or_insert_with(|| Arc::new(TenantPosition::new())).clone()
    }

    /// Record that `tenant` has applied through `position`. Called by the
    /// applier loop after each successful (or dead-lettered) record.
    pub fn advance(&self, tenant: &TenantId, position: Position) {
        self.entry(tenant).set(position);
    }

    /// The tenant's current applied position, if any record has been
    /// applied yet.
    pub fn current(&self, tenant: &TenantId) -> Option<Position> {
        self.positions.get(tenant).and_then(|p| p.get())
    }
}

#[async_trait::async_trait]
impl ApplyObserver for AppliedPositionTracker {
    async fn wait_for_applied(&self, tenant: &TenantId, position: Position, deadline: Duration) -> bool {
        let tracked = self.entry(tenant);
        let start = Instant::now();
        loop {
            if let Some(current) = tracked.get() {
                if current.partition == position.partition && current.offset >= position.offset {
                    return true;
                }
            }
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return false;
            }
            let remaining = deadline - elapsed;
            let notified = tracked.notify.notified();
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return false;
            }
        }
    }

    async fn lookup_conflicts(&self, tenant: &TenantId, idempotency_key: &str) -> Vec<Conflict> {
        let Ok(store) = self.store_manager.get(tenant).await else {
            return Vec::new();
        };
        store
            .applied_outcome(idempotency_key)
            .await
            .ok()
            .flatten()
            .map(|outcome| outcome.conflicts)
            .unwrap_or_default()
    }
}

/// Lets a single tracker be shared between the applier loop (which calls
/// `advance` directly) and a coordinator (which only sees it through the
/// `ApplyObserver` seam), as `entdb-cli` does when wiring both against
/// one in-process tracker.
#[async_trait::async_trait]
impl ApplyObserver for Arc<AppliedPositionTracker> {
    async fn wait_for_applied(&self, tenant: &TenantId, position: Position, deadline: Duration) -> bool {
        (**self).wait_for_applied(tenant, position, deadline).await
    }

    async fn lookup_conflicts(&self, tenant: &TenantId, idempotency_key: &str) -> Vec<Conflict> {
        (**self).lookup_conflicts(tenant, idempotency_key).await
    }
}
