//! Reader-side contract exposed to C3 (the edge-endpoint pre-check) and to
//! the service surface wrapping this crate (spec.md §4.4: `get_node`,
//! `query_nodes`, `edges_out`, `edges_in`, `mailbox`, `search`).
//!
//! Every method here runs its query on the pool directly, which sqlx
//! serializes against the writer through SQLite's own locking — the
//! "shared reader lock per transaction" spec.md §4.4 asks for, rather than
//! a hand-rolled MVCC layer.

use crate::{StoreError, TenantStore};
use entdb_types::{EdgeTypeId, NodeId, TypeId, Value};
use std::collections::HashMap;

/// A node as stored (spec.md §3 `Node`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct NodeRow {
    /// Node id.
    pub id: NodeId,
    /// Node type.
    pub type_id: TypeId,
    /// Expanded field payload.
    pub payload: HashMap<String, Value>,
    /// Principal that created the node.
    pub owner_actor: String,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Last update time, epoch milliseconds.
    pub updated_at: i64,
    /// Soft-delete marker.
    pub deleted: bool,
    /// Optimistic-concurrency version.
    pub version: u64,
}

/// A directed edge as stored (spec.md §3 `Edge`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct EdgeRow {
    /// Edge type.
    pub edge_type_id: EdgeTypeId,
    /// Source endpoint.
    pub from_id: NodeId,
    /// Destination endpoint.
    pub to_id: NodeId,
    /// Edge properties.
    pub props: HashMap<String, Value>,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
}

/// A mailbox item as stored (spec.md §3 `MailboxItem`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct MailboxItemRow {
    /// Item id, deterministic per `(event_id, node_id, recipient)`.
    pub item_id: String,
    /// Recipient user id.
    pub recipient_user_id: String,
    /// Id of the node this item references.
    pub ref_id: String,
    /// Type of the referenced node.
    pub source_type_id: TypeId,
    /// Id of the referenced node (duplicated with `ref_id` today; kept
    /// distinct since they diverge once mailbox items can reference
    /// non-node sources).
    pub source_node_id: NodeId,
    /// Conversation/thread grouping id.
    pub thread_id: String,
    /// Timestamp, epoch milliseconds.
    pub ts: i64,
    /// Opaque per-item state (read/unread, etc).
    pub state: serde_json::Value,
    /// Indexed snippet text.
    pub snippet: String,
}

impl TenantStore {
    /// Fetch one node by id, including soft-deleted ones (callers that
    /// care about `deleted` filter it themselves).
    pub async fn get_node(&self, id: NodeId) -> Result<Option<NodeRow>, StoreError> {
        let row: Option<(String, i64, String, String, i64, i64, i64, i64)> = sqlx::query_as(
            "SELECT id, type_id, payload_json, owner_actor, created_at, updated_at, deleted, version \
             FROM nodes WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.canonical)
        .await?;

        row.map(row_to_node).transpose()
    }

    /// List nodes of `type_id`, optionally filtered by exact-match
    /// payload fields, paginated by `limit`/`offset`. Filter keys must be
    /// `[A-Za-z0-9_]+`; anything else is rejected rather than risk
    /// building unsafe SQL from a caller-supplied field name.
    pub async fn query_nodes(
        &self,
        type_id: TypeId,
        filters: &HashMap<String, Value>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<NodeRow>, StoreError> {
        let mut sql = "SELECT id, type_id, payload_json, owner_actor, created_at, updated_at, deleted, version \
                       FROM nodes WHERE type_id = ? AND deleted = 0"
            .to_string();
        let mut json_filters = Vec::new();
        for (field, value) in filters {
            if !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(StoreError::Invariant(format!("invalid filter field name '{field}'")));
            }
            sql.push_str(&format!(" AND json_extract(payload_json, '$.{field}.value') = ?"));
            json_filters.push(value.clone());
        }
        sql.push_str(" ORDER BY created_at ASC LIMIT ? OFFSET ?");

        let mut query = sqlx::query_as::<_, (String, i64, String, String, i64, i64, i64, i64)>(&sql).bind(type_id.0 as i64);
        for value in &json_filters {
            query = query.bind(value_to_sql_text(value));
        }
        query = query.bind(limit as i64).bind(offset as i64);

        let rows = query.fetch_all(&self.canonical).await?;
        rows.into_iter().map(row_to_node).collect()
    }

    /// Outgoing edges from `node_id`, optionally restricted to
    /// `edge_type`.
    pub async fn edges_out(&self, node_id: NodeId, edge_type: Option<EdgeTypeId>) -> Result<Vec<EdgeRow>, StoreError> {
        self.edges_by_endpoint("from_id", node_id, edge_type).await
    }

    /// Incoming edges to `node_id`, optionally restricted to `edge_type`.
    pub async fn edges_in(&self, node_id: NodeId, edge_type: Option<EdgeTypeId>) -> Result<Vec<EdgeRow>, StoreError> {
        self.edges_by_endpoint("to_id", node_id, edge_type).await
    }

    async fn edges_by_endpoint(
        &self,
        column: &str,
        node_id: NodeId,
        edge_type: Option<EdgeTypeId>,
    ) -> Result<Vec<EdgeRow>, StoreError> {
        let mut sql = format!(
            "SELECT edge_type_id, from_id, to_id, props_json, created_at FROM edges WHERE {column} = ?"
        );
        if edge_type.is_some() {
            sql.push_str(" AND edge_type_id = ?");
        }
        let mut query = sqlx::query_as::<_, (i64, String, String, String, i64)>(&sql).bind(node_id.to_string());
        if let Some(et) = edge_type {
            query = query.bind(et.0 as i64);
        }
        let rows = query.fetch_all(&self.canonical).await?;
        rows.into_iter().map(row_to_edge).collect()
    }

    /// A recipient's mailbox, newest first, paginated.
    pub async fn mailbox(&self, user: &str, limit: u32, offset: u32) -> Result<Vec<MailboxItemRow>, StoreError> {
        let rows: Vec<(String, String, String, i64, String, String, i64, String, String)> = sqlx::query_as(
            "SELECT item_id, recipient_user_id, ref_id, source_type_id, source_node_id, thread_id, ts, state_json, snippet \
             FROM items WHERE recipient_user_id = ? ORDER BY ts DESC LIMIT ? OFFSET ?",
        )
        .bind(user)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.mailbox)
        .await?;
        rows.into_iter().map(row_to_item).collect()
    }

    /// Full-text search a recipient's mailbox snippets.
    pub async fn search(&self, user: &str, query: &str) -> Result<Vec<MailboxItemRow>, StoreError> {
        let rows: Vec<(String, String, String, i64, String, String, i64, String, String)> = sqlx::query_as(
            "SELECT i.item_id, i.recipient_user_id, i.ref_id, i.source_type_id, i.source_node_id, \
                    i.thread_id, i.ts, i.state_json, i.snippet \
             FROM items i JOIN items_fts f ON f.item_id = i.item_id \
             WHERE i.recipient_user_id = ? AND items_fts MATCH ? ORDER BY i.ts DESC",
        )
        .bind(user)
        .bind(query)
        .fetch_all(&self.mailbox)
        .await?;
        rows.into_iter().map(row_to_item).collect()
    }
}

fn value_to_sql_text(value: &Value) -> String {
    // Payload fields are stored tagged, e.g. {"kind":"Str","value":"a@x"},
    // and the filter now extracts `$.field.value` to reach past the tag
    // (see json_extract above), so this must compare against that same
    // nested `value` — never the whole tagged object. json_extract yields
    // scalars unquoted; non-scalars (lists, refs) come back as their
    // minified JSON text, which `serde_json` reproduces byte-for-byte.
    let tagged = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
    match tagged.get("value") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn row_to_node(row: (String, i64, String, String, i64, i64, i64, i64)) -> Result<NodeRow, StoreError> {
    let (id, type_id, payload_json, owner_actor, created_at, updated_at, deleted, version) = row;
    Ok(NodeRow {
        id: id.parse().map_err(|_| StoreError::Invariant(format!("corrupt node id '{id}'")))?,
        type_id: TypeId(type_id as u32),
        payload: serde_json::from_str(&payload_json)
            .map_err(|e| StoreError::Invariant(format!("corrupt node payload: {e}")))?,
        owner_actor,
        created_at,
        updated_at,
        deleted: deleted != 0,
        version: version as u64,
    })
}

fn row_to_edge(row: (i64, String, String, String, i64)) -> Result<EdgeRow, StoreError> {
    let (edge_type_id, from_id, to_id, props_json, created_at) = row;
    Ok(EdgeRow {
        edge_type_id: EdgeTypeId(edge_type_id as u32),
        from_id: from_id.parse().map_err(|_| StoreError::Invariant(format!("corrupt edge endpoint '{from_id}'")))?,
        to_id: to_id.parse().map_err(|_| StoreError::Invariant(format!("corrupt edge endpoint '{to_id}'")))?,
        props: serde_json::from_str(&props_json)
            .map_err(|e| StoreError::Invariant(format!("corrupt edge props: {e}")))?,
        created_at,
    })
}

fn row_to_item(
    row: (String, String, String, i64, String, String, i64, String, String),
) -> Result<MailboxItemRow, StoreError> {
    let (item_id, recipient_user_id, ref_id, source_type_id, source_node_id, thread_id, ts, state_json, snippet) = row;
    Ok(MailboxItemRow {
        item_id,
        recipient_user_id,
        ref_id,
        source_type_id: TypeId(source_type_id as u32),
        source_node_id: source_node_id
            .parse()
            .map_err(|_| StoreError::Invariant(format!("corrupt mailbox source node id '{source_node_id}'")))?,
        thread_id,
        ts,
        state: serde_json::from_str(&state_json).unwrap_or(serde_json::Value::Null),
        snippet,
    })
}
