//! [`entdb_coordinator::NodeLookup`] backed by a live [`StoreManager`],
//! wired into the coordinator the CLI constructs — the same seam
//! `entdb-applier::AppliedPositionTracker` fills for `ApplyObserver`.

use async_trait::async_trait;
use entdb_coordinator::NodeLookup;
use entdb_store::StoreManager;
use entdb_types::{NodeId, TenantId, TypeId};
use std::sync::Arc;

/// Reads node type/version straight out of a tenant's canonical store.
pub struct StoreNodeLookup {
    store_manager: Arc<StoreManager>,
}

impl StoreNodeLookup {
    /// Wrap `store_manager` as a [`NodeLookup`].
    pub fn new(store_manager: Arc<StoreManager>) -> Self {
        Self { store_manager }
    }
}

#[async_trait]
impl NodeLookup for StoreNodeLookup {
    async fn type_of(&self, tenant: &TenantId, node: NodeId) -> Option<TypeId> {
        let store = self.store_manager.get(tenant).await.ok()?;
        store.get_node(node).await.ok()?.map(|row| row.type_id)
    }

    async fn version_of(&self, tenant: &TenantId, node: NodeId) -> Option<u64> {
        let store = self.store_manager.get(tenant).await.ok()?;
        store.get_node(node).await.ok()?.map(|row| row.version)
    }
}
