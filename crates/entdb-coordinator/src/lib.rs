#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **entdb-coordinator** – Transaction coordinator for EntDB (spec.md §4.3).
//!
//! [`Coordinator::submit`] runs the eight-step pipeline spec.md §4.3 lays
//! out: idempotency check, schema validation, id assignment, reference
//! resolution, intra-transaction consistency, event framing, append,
//! receipt. This generalizes `toka_kernel::Kernel::submit`'s
//! validate-then-dispatch-then-publish shape from a single in-process
//! opcode dispatch to a durable, cross-process WAL append; the seams
//! `Kernel` takes as `Arc<dyn TokenValidator>`/`Arc<dyn EventBus>` become
//! [`NodeLookup`] and [`ApplyObserver`] here, so `entdb-coordinator` never
//! depends on `entdb-store` or `entdb-applier` directly.

use async_trait::async_trait;
use dashmap::DashMap;
use entdb_schema::FrozenSchema;
use entdb_types::{
    AliasRef, Conflict, EntError, ErrorCode, Event, FieldError, NodeId, NodeRef, Operation,
    Position, Receipt, TenantId, TxRequest, CURRENT_ENVELOPE_VERSION,
};
use entdb_wal_core::Wal;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Best-effort read seam into a tenant's store, used only for the
/// intra-transaction consistency pre-check (spec.md §4.3 step 5). A miss
/// here never fails a transaction outright — authoritative enforcement
/// (optimistic-concurrency conflicts, dangling edge endpoints) happens in
/// the applier against the real tenant store.
#[async_trait]
pub trait NodeLookup: Send + Sync {
    /// The node's `type_id`, if the lookup could confirm it exists.
    async fn type_of(&self, tenant: &TenantId, node: NodeId) -> Option<entdb_types::TypeId>;

    /// The node's current `version`, if the lookup could confirm it
    /// exists.
    async fn version_of(&self, tenant: &TenantId, node: NodeId) -> Option<u64>;
}

/// Seam into the applier's per-tenant "applied position" state, used to
/// implement `wait_for_applied` (spec.md §4.3 step 8) without this crate
/// depending on `entdb-applier`.
#[async_trait]
pub trait ApplyObserver: Send + Sync {
    /// Block until the tenant's applied position reaches `position`, or
    /// `deadline` elapses. Returns whether it was reached.
    async fn wait_for_applied(&self, tenant: &TenantId, position: Position, deadline: Duration) -> bool;

    /// Once applied, fetch the conflicts (if any) the applier recorded
    /// for this idempotency key.
    async fn lookup_conflicts(&self, tenant: &TenantId, idempotency_key: &str) -> Vec<Conflict>;
}

/// A no-op [`NodeLookup`]/[`ApplyObserver`] for callers that don't need
/// intra-transaction pre-checks or synchronous wait (e.g. fire-and-forget
/// ingestion).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

#[async_trait]
impl NodeLookup for NoopObserver {
    async fn type_of(&self, _tenant: &TenantId, _node: NodeId) -> Option<entdb_types::TypeId> {
        None
    }
    async fn version_of(&self, _tenant: &TenantId, _node: NodeId) -> Option<u64> {
        None
    }
}

#[async_trait]
impl ApplyObserver for NoopObserver {
    async fn wait_for_applied(&self, _tenant: &TenantId, _position: Position, _deadline: Duration) -> bool {
        false
    }
    async fn lookup_conflicts(&self, _tenant: &TenantId, _idempotency_key: &str) -> Vec<Conflict> {
        Vec::new()
    }
}

#[derive(Clone)]
struct InflightEntry {
    fingerprint: [u8; 32],
    receipt: Receipt,
}

/// Stateless, parallelizable transaction coordinator (spec.md §4.3:
/// "coordinator instances are stateless and parallel"). The only mutable
/// state is the soft, per-instance idempotency cache — losing it only
/// costs an extra durable append that `applied_events` will deduplicate.
pub struct Coordinator<L, O> {
    schema: Arc<FrozenSchema>,
    wal: Arc<dyn Wal>,
    node_lookup: L,
    apply_observer: O,
    inflight: DashMap<(TenantId, String), InflightEntry>,
    id_suffix: AtomicU32,
    default_deadline_ms: u64,
}

impl<L, O> Coordinator<L, O>
where
    L: NodeLookup,
    O: ApplyObserver,
{
    /// Build a coordinator bound to a frozen schema, a WAL backend, and
    /// the read/wait seams described above.
    pub fn new(schema: Arc<FrozenSchema>, wal: Arc<dyn Wal>, node_lookup: L, apply_observer: O, default_deadline_ms: u64) -> Self {
        Self {
            schema,
            wal,
            node_lookup,
            apply_observer,
            inflight: DashMap::new(),
            id_suffix: AtomicU32::new(0),
            default_deadline_ms,
        }
    }

    /// Run the full submit pipeline (spec.md §4.3).
    pub async fn submit(&self, req: TxRequest) -> Result<Receipt, EntError> {
        // 0. Schema fingerprint pin (spec.md §6: "if present, server
        // rejects on mismatch"), checked before anything durable happens.
        if let Some(expected) = req.schema_fingerprint {
            let live = self.schema.fingerprint();
            if expected != live {
                return Err(EntError::new(
                    ErrorCode::InvalidRequest,
                    format!(
                        "schema_fingerprint mismatch: request pinned {}, live schema is {}",
                        hex_encode(expected),
                        hex_encode(live)
                    ),
                ));
            }
        }

        let body_fingerprint = fingerprint_operations(&req.operations);

        // 1. Idempotency check.
        let cache_key = (req.tenant_id.clone(), req.idempotency_key.clone());
        if let Some(entry) = self.inflight.get(&cache_key) {
            if entry.fingerprint == body_fingerprint {
                return Ok(entry.receipt.clone());
            }
            return Err(EntError::new(
                ErrorCode::InvalidRequest,
                "idempotency key reused with a different request body",
            ));
        }

        // 2 & 3. Schema validation + id assignment, one pass over the
        // operations; aliases created along the way feed step 4.
        let mut alias_map: HashMap<String, NodeId> = HashMap::new();
        let mut resolved_ops = Vec::with_capacity(req.operations.len());
        for op in &req.operations {
            let (resolved, created_alias) = self.validate_and_assign(op)?;
            if let Some((alias, id)) = created_alias {
                if alias_map.insert(alias.clone(), id).is_some() {
                    return Err(EntError::validation(vec![FieldError {
                        field: "alias".to_string(),
                        message: format!("alias '{alias}' declared more than once in this transaction"),
                        suggestions: Vec::new(),
                    }]));
                }
            }
            resolved_ops.push(resolved);
        }

        // 4. Reference resolution.
        for op in &mut resolved_ops {
            resolve_refs(op, &alias_map)?;
        }

        // 5. Intra-transaction consistency (best-effort).
        self.check_consistency(&req.tenant_id, &resolved_ops, &alias_map).await?;

        // 6. Event framing.
        let event = Event {
            envelope_version: CURRENT_ENVELOPE_VERSION,
            event_id: Uuid::new_v4(),
            tenant_id: req.tenant_id.clone(),
            actor: req.actor.clone(),
            idempotency_key: req.idempotency_key.clone(),
            schema_fingerprint: self.schema.fingerprint(),
            created_at_ms: now_ms(),
            operations: resolved_ops,
        };
        let encoded = event.encode().map_err(|e| {
            EntError::new(ErrorCode::Internal, format!("failed to encode event: {e}"))
        })?;

        // 7. Append.
        let position = self
            .wal
            .append(req.tenant_id.as_str(), encoded)
            .await
            .map_err(|e| wal_error_to_ent_error(&e))?;

        // 8. Build + optionally wait for the receipt.
        let mut receipt = Receipt {
            receipt_id: Uuid::new_v4(),
            wal_position: position,
            applied: false,
            result_aliases: alias_map,
            conflicts: Vec::new(),
        };

        if req.wait_for_applied {
            let deadline = Duration::from_millis(req.deadline_ms.unwrap_or(self.default_deadline_ms));
            if self.apply_observer.wait_for_applied(&req.tenant_id, position, deadline).await {
                receipt.applied = true;
                receipt.conflicts = self
                    .apply_observer
                    .lookup_conflicts(&req.tenant_id, &req.idempotency_key)
                    .await;
            }
        }

        self.inflight.insert(cache_key, InflightEntry { fingerprint: body_fingerprint, receipt: receipt.clone() });
        Ok(receipt)
    }

    fn next_suffix(&self) -> u32 {
        self.id_suffix.fetch_add(1, Ordering::Relaxed)
    }

    /// Steps 2-3 for a single operation: schema-validate any payload,
    /// expanding defaults, and assign a fresh id for `create_node`.
    fn validate_and_assign(&self, op: &Operation) -> Result<(Operation, Option<(String, NodeId)>), EntError> {
        match op {
            Operation::CreateNode { type_id, payload, alias, principals, recipients, .. } => {
                let expanded = self
                    .schema
                    .validate(*type_id, payload)
                    .map_err(EntError::validation)?;
                let id = NodeId::generate(self.next_suffix());
                let created_alias = alias.as_ref().map(|a| (a.clone(), id));
                Ok((
                    Operation::CreateNode {
                        id,
                        type_id: *type_id,
                        payload: expanded,
                        alias: alias.clone(),
                        principals: principals.clone(),
                        recipients: recipients.clone(),
                    },
                    created_alias,
                ))
            }
            Operation::UpdateNode { node, patch_payload, expected_version } => {
                // Partial payload: only declared fields are checked, so we
                // validate against a schema-agnostic pass-through here and
                // let the applier re-validate against the live node's
                // concrete type (we don't know it without a store read).
                Ok((
                    Operation::UpdateNode {
                        node: node.clone(),
                        patch_payload: patch_payload.clone(),
                        expected_version: *expected_version,
                    },
                    None,
                ))
            }
            other => Ok((other.clone(), None)),
        }
    }

    async fn check_consistency(
        &self,
        tenant: &TenantId,
        ops: &[Operation],
        alias_map: &HashMap<String, NodeId>,
    ) -> Result<(), EntError> {
        let created_in_tx: std::collections::HashSet<NodeId> = alias_map.values().copied().collect();
        for op in ops {
            if let Operation::CreateEdge { edge_type_id, from, to, .. } = op {
                let edge_type = self.schema.get_edge_type(*edge_type_id).ok_or_else(|| {
                    EntError::validation(vec![FieldError {
                        field: "edge_type_id".to_string(),
                        message: format!("unknown edge_type_id {edge_type_id:?}"),
                        suggestions: Vec::new(),
                    }])
                })?;
                let NodeRef::Id(from_id) = from else {
                    unreachable!("reference resolution already replaced aliases")
                };
                let NodeRef::Id(to_id) = to else {
                    unreachable!("reference resolution already replaced aliases")
                };
                self.check_endpoint_type(tenant, *from_id, edge_type.from_type, &created_in_tx).await?;
                self.check_endpoint_type(tenant, *to_id, edge_type.to_type, &created_in_tx).await?;
            }
        }
        Ok(())
    }

    async fn check_endpoint_type(
        &self,
        tenant: &TenantId,
        node: NodeId,
        expected: entdb_types::TypeId,
        created_in_tx: &std::collections::HashSet<NodeId>,
    ) -> Result<(), EntError> {
        if created_in_tx.contains(&node) {
            // Already validated against the right create_node's type_id
            // by construction of this transaction's operation list.
            return Ok(());
        }
        match self.node_lookup.type_of(tenant, node).await {
            Some(actual) if actual != expected => Err(EntError::validation(vec![FieldError {
                field: "edge endpoint".to_string(),
                message: format!("node {node} has type {actual:?}, edge expects {expected:?}"),
                suggestions: Vec::new(),
            }])),
            // None: the lookup couldn't confirm either way (store miss,
            // not-yet-applied, or no lookup wired up) — best-effort, so we
            // let it through and leave the hard check to the applier.
            _ => Ok(()),
        }
    }
}

fn resolve_refs(op: &mut Operation, alias_map: &HashMap<String, NodeId>) -> Result<(), EntError> {
    match op {
        Operation::UpdateNode { node, .. }
        | Operation::DeleteNode { node }
        | Operation::SetVisibility { node, .. } => resolve_one(node, alias_map),
        Operation::CreateEdge { from, to, .. } => {
            resolve_one(from, alias_map)?;
            resolve_one(to, alias_map)
        }
        Operation::DeleteEdge { from, to, .. } => {
            resolve_one(from, alias_map)?;
            resolve_one(to, alias_map)
        }
        Operation::CreateNode { .. } => Ok(()),
    }
}

fn resolve_one(node: &mut NodeRef, alias_map: &HashMap<String, NodeId>) -> Result<(), EntError> {
    if let NodeRef::Alias(AliasRef { alias }) = node {
        let id = alias_map.get(alias).copied().ok_or_else(|| {
            EntError::validation(vec![FieldError {
                field: "alias".to_string(),
                message: format!("unresolved alias reference '${alias}.id'"),
                suggestions: Vec::new(),
            }])
        })?;
        *node = NodeRef::Id(id);
    }
    Ok(())
}

fn fingerprint_operations(ops: &[Operation]) -> [u8; 32] {
    let bytes = serde_json::to_vec(ops).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hasher.finalize().into()
}

fn wal_error_to_ent_error(e: &entdb_wal_core::WalError) -> EntError {
    use entdb_wal_core::WalError;
    match e {
        WalError::Transient(msg) => EntError::new(ErrorCode::Timeout, msg.clone()),
        WalError::Permanent(msg) => EntError::new(ErrorCode::InvalidRequest, msg.clone()),
        WalError::Unavailable(msg) => EntError::new(ErrorCode::ServiceUnavailable, msg.clone()),
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
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
    use entdb_types::{EdgeType, FieldDef, FieldKind, NodeType, Value};
    use entdb_wal_memory::MemoryWal;
    use std::collections::HashMap as Map;

    fn schema() -> Arc<FrozenSchema> {
        let mut reg = Registry::new();
        reg.register_node_type(NodeType {
            type_id: entdb_types::TypeId(1),
            name: "person".to_string(),
            fields: vec![FieldDef {
                field_id: entdb_types::FieldId(1),
                name: "email".to_string(),
                kind: FieldKind::String,
                required: true,
                default: None,
                enum_values: None,
                deprecated: false,
            }],
            deprecated: false,
            default_acl: Vec::new(),
        })
        .unwrap();
        reg.register_edge_type(EdgeType {
            edge_id: entdb_types::EdgeTypeId(1),
            name: "knows".to_string(),
            from_type: entdb_types::TypeId(1),
            to_type: entdb_types::TypeId(1),
            deprecated: false,
        })
        .unwrap();
        Arc::new(reg.freeze().unwrap())
    }

    fn coordinator() -> Coordinator<NoopObserver, NoopObserver> {
        let wal: Arc<dyn Wal> = Arc::new(MemoryWal::default());
        Coordinator::new(schema(), wal, NoopObserver, NoopObserver, 30_000)
    }

    fn create_person(alias: &str, email: &str) -> Operation {
        let mut payload = Map::new();
        payload.insert("email".to_string(), Value::Str(email.to_string()));
        Operation::CreateNode {
            id: NodeId::generate(0),
            type_id: entdb_types::TypeId(1),
            payload,
            alias: Some(alias.to_string()),
            principals: None,
            recipients: None,
        }
    }

    #[tokio::test]
    async fn submit_assigns_ids_and_resolves_aliases_within_one_transaction() {
        let c = coordinator();
        let req = TxRequest {
            tenant_id: TenantId::from("tenant-a"),
            actor: "actor-1".to_string(),
            idempotency_key: "key-1".to_string(),
            operations: vec![
                create_person("alice", "alice@example.com"),
                create_person("bob", "bob@example.com"),
                Operation::CreateEdge {
                    edge_type_id: entdb_types::EdgeTypeId(1),
                    from: NodeRef::Alias(AliasRef { alias: "alice".to_string() }),
                    to: NodeRef::Alias(AliasRef { alias: "bob".to_string() }),
                    props: None,
                },
            ],
            schema_fingerprint: None,
            wait_for_applied: false,
            deadline_ms: None,
        };
        let receipt = c.submit(req).await.unwrap();
        assert!(receipt.result_aliases.contains_key("alice"));
        assert!(receipt.result_aliases.contains_key("bob"));
        assert!(!receipt.applied);
    }

    #[tokio::test]
    async fn retrying_same_idempotency_key_with_same_body_returns_cached_receipt() {
        let c = coordinator();
        let req = TxRequest {
            tenant_id: TenantId::from("tenant-a"),
            actor: "actor-1".to_string(),
            idempotency_key: "key-1".to_string(),
            operations: vec![create_person("alice", "alice@example.com")],
            schema_fingerprint: None,
            wait_for_applied: false,
            deadline_ms: None,
        };
        let first = c.submit(req.clone()).await.unwrap();
        let second = c.submit(req).await.unwrap();
        assert_eq!(first.receipt_id, second.receipt_id);
        assert_eq!(first.wal_position, second.wal_position);
    }

    #[tokio::test]
    async fn same_key_different_body_is_rejected() {
        let c = coordinator();
        let tenant = TenantId::from("tenant-a");
        let req1 = TxRequest {
            tenant_id: tenant.clone(),
            actor: "actor-1".to_string(),
            idempotency_key: "key-1".to_string(),
            operations: vec![create_person("alice", "alice@example.com")],
            schema_fingerprint: None,
            wait_for_applied: false,
            deadline_ms: None,
        };
        c.submit(req1).await.unwrap();

        let req2 = TxRequest {
            tenant_id: tenant,
            actor: "actor-1".to_string(),
            idempotency_key: "key-1".to_string(),
            operations: vec![create_person("alice", "different@example.com")],
            schema_fingerprint: None,
            wait_for_applied: false,
            deadline_ms: None,
        };
        let err = c.submit(req2).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn unresolved_alias_is_rejected() {
        let c = coordinator();
        let req = TxRequest {
            tenant_id: TenantId::from("tenant-a"),
            actor: "actor-1".to_string(),
            idempotency_key: "key-1".to_string(),
            operations: vec![Operation::DeleteNode {
                node: NodeRef::Alias(AliasRef { alias: "nobody".to_string() }),
            }],
            schema_fingerprint: None,
            wait_for_applied: false,
            deadline_ms: None,
        };
        let err = c.submit(req).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn missing_required_field_fails_schema_validation() {
        let c = coordinator();
        let req = TxRequest {
            tenant_id: TenantId::from("tenant-a"),
            actor: "actor-1".to_string(),
            idempotency_key: "key-1".to_string(),
            operations: vec![Operation::CreateNode {
                id: NodeId::generate(0),
                type_id: entdb_types::TypeId(1),
                payload: Map::new(),
                alias: None,
                principals: None,
                recipients: None,
            }],
            schema_fingerprint: None,
            wait_for_applied: false,
            deadline_ms: None,
        };
        let err = c.submit(req).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn mismatched_schema_fingerprint_is_rejected_before_append() {
        let c = coordinator();
        let req = TxRequest {
            tenant_id: TenantId::from("tenant-a"),
            actor: "actor-1".to_string(),
            idempotency_key: "key-1".to_string(),
            operations: vec![create_person("alice", "alice@example.com")],
            schema_fingerprint: Some([0xAB; 32]),
            wait_for_applied: false,
            deadline_ms: None,
        };
        let err = c.submit(req).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn matching_schema_fingerprint_is_accepted() {
        let c = coordinator();
        let req = TxRequest {
            tenant_id: TenantId::from("tenant-a"),
            actor: "actor-1".to_string(),
            idempotency_key: "key-1".to_string(),
            operations: vec![create_person("alice", "alice@example.com")],
            schema_fingerprint: Some(schema().fingerprint()),
            wait_for_applied: false,
            deadline_ms: None,
        };
        assert!(c.submit(req).await.is_ok());
    }
}
