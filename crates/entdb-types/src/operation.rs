//! The six atomic operations a client may submit in a transaction
//! (spec.md §4.3), plus the alias-reference mechanism used to chain
//! newly-created nodes together within one transaction.

use crate::ids::{EdgeTypeId, FieldId, NodeId, TypeId};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reference to a node in any operation's id position: either a concrete,
/// already-assigned id, or an alias bound by a `create_node` earlier in the
/// *same* transaction (spec.md §9 open question: aliases are visible only
/// within the transaction that created them).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeRef {
    /// A concrete, previously assigned node id.
    Id(NodeId),
    /// A `"$alias.id"` reference to a node created earlier in this
    /// transaction.
    Alias(AliasRef),
}

/// Parsed `"$alias.id"` reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRef {
    /// The alias name bound by a `create_node` operation's `alias` field.
    pub alias: String,
}

impl AliasRef {
    /// Parse a `"$alias.id"` string into an `AliasRef`. Any other shape is
    /// rejected by the caller as `INVALID_REQUEST`.
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix('$')?;
        let alias = rest.strip_suffix(".id")?;
        if alias.is_empty() {
            return None;
        }
        Some(Self { alias: alias.to_string() })
    }
}

/// One of the six atomic operations a transaction may contain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Create a node of `type_id` with the given payload. The coordinator
    /// assigns `id` at submission time (spec.md §4.3 step 3), before the
    /// event is framed, so the applier never assigns ids itself. `alias`,
    /// if present, is carried along only for log/debugging traceability —
    /// by the time this operation reaches the applier, every `alias_ref`
    /// in the rest of the transaction has already been resolved to `id`.
    /// `recipients` names mailbox recipients for the side-effect mailbox
    /// items (spec.md §3, `MailboxItem`).
    CreateNode {
        /// Server-assigned node id.
        id: NodeId,
        /// Node type to instantiate.
        type_id: TypeId,
        /// Field values, prior to default expansion.
        payload: HashMap<String, Value>,
        /// Optional alias binding for later ops in this transaction.
        alias: Option<String>,
        /// Explicit ACL principals; falls back to the type's default ACL.
        principals: Option<Vec<String>>,
        /// Recipient user ids for mailbox fan-out.
        recipients: Option<Vec<String>>,
    },
    /// Patch an existing node's payload (shallow merge by field name).
    UpdateNode {
        /// Target node.
        node: NodeRef,
        /// Fields to merge into the existing payload.
        patch_payload: HashMap<String, Value>,
        /// Optimistic-concurrency guard: reject with CONFLICT if the
        /// node's current version differs.
        expected_version: Option<u64>,
    },
    /// Soft-delete a node: mark `deleted`, bump `version`.
    DeleteNode {
        /// Target node.
        node: NodeRef,
    },
    /// Create a directed edge between two nodes.
    CreateEdge {
        /// Edge type.
        edge_type_id: EdgeTypeId,
        /// Source endpoint.
        from: NodeRef,
        /// Destination endpoint.
        to: NodeRef,
        /// Edge properties.
        props: Option<HashMap<String, Value>>,
    },
    /// Delete a directed edge. A missing edge is a no-op (idempotent by
    /// construction).
    DeleteEdge {
        /// Edge type.
        edge_type_id: EdgeTypeId,
        /// Source endpoint.
        from: NodeRef,
        /// Destination endpoint.
        to: NodeRef,
    },
    /// Replace the ACL principal set for a node.
    SetVisibility {
        /// Target node.
        node: NodeRef,
        /// New principal set, e.g. `user:alice`, `role:admin`, `tenant:*`.
        principals: Vec<String>,
    },
}

impl Operation {
    /// Short tag used in logs and dead-letter records.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Operation::CreateNode { .. } => "create_node",
            Operation::UpdateNode { .. } => "update_node",
            Operation::DeleteNode { .. } => "delete_node",
            Operation::CreateEdge { .. } => "create_edge",
            Operation::DeleteEdge { .. } => "delete_edge",
            Operation::SetVisibility { .. } => "set_visibility",
        }
    }
}

/// Client-submitted atomic transaction request (spec.md §6, "Atomic
/// execute").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRequest {
    /// Tenant this transaction applies to.
    pub tenant_id: crate::ids::TenantId,
    /// Principal on whose behalf the request is made.
    pub actor: String,
    /// Client-chosen idempotency key, unique per logical transaction.
    pub idempotency_key: String,
    /// Ordered operation list, applied atomically.
    pub operations: Vec<Operation>,
    /// If set, the server rejects the request when it does not match the
    /// live schema fingerprint.
    pub schema_fingerprint: Option<[u8; 32]>,
    /// If true, `submit` blocks until the transaction's applied position
    /// has been reached by the applier, or the deadline elapses.
    pub wait_for_applied: bool,
    /// Request deadline, in milliseconds, relative to submission.
    pub deadline_ms: Option<u64>,
}
