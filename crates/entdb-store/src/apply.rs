//! `apply_transaction`: the single store-local transaction the applier
//! drives one event through (spec.md §4.4, §4.5).

use crate::snippets;
use crate::{StoreError, TenantStore};
use entdb_types::{Conflict, Event, NodeId, NodeRef, Operation, Position, TypeId, Value};
use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;
use std::collections::HashMap;

/// Result of successfully driving an event through `apply_transaction`.
/// A non-empty `conflicts` list does not mean the transaction failed —
/// per spec.md §4.5, an `expected_version` mismatch is recorded as a
/// marker, not an abort.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ApplyOutcome {
    /// Optimistic-concurrency conflicts observed while applying.
    pub conflicts: Vec<Conflict>,
}

impl TenantStore {
    /// Fetch the recorded outcome for an idempotency key, if the applier
    /// has already processed it. Used by the applier's own "already
    /// applied" fast path (spec.md §4.5) to avoid attempting a
    /// transaction it knows will be a no-op, and by the coordinator's
    /// `wait_for_applied` to recover conflicts once the wait succeeds.
    pub async fn applied_outcome(&self, idempotency_key: &str) -> Result<Option<ApplyOutcome>, StoreError> {
        let mut conn = self.canonical.acquire().await?;
        if !already_applied(&mut conn, idempotency_key).await? {
            return Ok(None);
        }
        read_applied_outcome(&mut conn, idempotency_key).await.map(Some)
    }

    /// Apply one framed event. Runs entirely inside one SQLite
    /// transaction on the canonical store (mailbox items are written to a
    /// second pool, best-effort — see note below): either every
    /// operation's effect and the `applied_events`/`tenant_meta` rows
    /// land together, or none of them do.
    ///
    /// Returns `Err(StoreError::Invariant)` for a genuine invariant
    /// violation (e.g. updating a node that does not exist) without any
    /// side effect — the applier dead-letters the record in that case.
    pub async fn apply_transaction(&self, position: Position, event: &Event) -> Result<ApplyOutcome, StoreError> {
        let mut tx = self.canonical.begin().await?;

        if already_applied(&mut tx, &event.idempotency_key).await? {
            let outcome = read_applied_outcome(&mut tx, &event.idempotency_key).await?;
            tx.commit().await?;
            return Ok(outcome);
        }

        let mut conflicts = Vec::new();
        for op in &event.operations {
            apply_one(&mut tx, &self.schema, op, &mut conflicts).await?;
        }

        let outcome = ApplyOutcome { conflicts };
        let result_json = serde_json::to_string(&outcome)
            .map_err(|e| StoreError::Invariant(format!("failed to serialize apply outcome: {e}")))?;

        sqlx::query(
            "INSERT INTO applied_events (idempotency_key, wal_partition, wal_offset, result_json, applied_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&event.idempotency_key)
        .bind(position.partition as i64)
        .bind(position.offset as i64)
        .bind(&result_json)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;

        let checkpoint_json = serde_json::to_string(&position)
            .map_err(|e| StoreError::Invariant(format!("failed to serialize checkpoint: {e}")))?;
        sqlx::query("INSERT OR REPLACE INTO tenant_meta (k, v) VALUES ('checkpoint', ?)")
            .bind(&checkpoint_json)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT OR REPLACE INTO tenant_meta (k, v) VALUES ('schema_fingerprint', ?)")
            .bind(hex::encode(event.schema_fingerprint))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        // Mailbox writes are best-effort and not part of the canonical
        // transaction's atomicity contract: a crash between the two commits
        // leaves the canonical graph state authoritative and merely drops a
        // notification, which is the same trade-off `toka-store-sqlite`
        // makes for its own non-transactional live broadcast.
        for op in &event.operations {
            if let Operation::CreateNode { id, type_id, payload, recipients: Some(recipients), .. } = op {
                for recipient in recipients {
                    if let Err(e) = self.insert_mailbox_item(event, *id, *type_id, payload, recipient).await {
                        tracing::warn!(error = %e, recipient, "failed to write mailbox item");
                    }
                }
            }
        }

        Ok(outcome)
    }

    async fn insert_mailbox_item(
        &self,
        event: &Event,
        node_id: NodeId,
        type_id: TypeId,
        payload: &HashMap<String, Value>,
        recipient: &str,
    ) -> Result<(), StoreError> {
        let item_id = derive_item_id(event.event_id, node_id, recipient);
        let snippet = snippets::extract(type_id, payload);
        let state_json = serde_json::to_string(&serde_json::json!({"state": "unread"}))
            .unwrap_or_else(|_| "{}".to_string());

        sqlx::query(
            "INSERT OR IGNORE INTO items \
             (item_id, recipient_user_id, ref_id, source_type_id, source_node_id, thread_id, ts, state_json, snippet) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item_id)
        .bind(recipient)
        .bind(node_id.to_string())
        .bind(type_id.0 as i64)
        .bind(node_id.to_string())
        .bind(event.event_id.to_string())
        .bind(event.created_at_ms)
        .bind(&state_json)
        .bind(&snippet)
        .execute(&self.mailbox)
        .await?;

        sqlx::query("INSERT INTO items_fts (item_id, snippet) VALUES (?, ?)")
            .bind(&item_id)
            .bind(&snippet)
            .execute(&self.mailbox)
            .await?;

        Ok(())
    }
}

fn derive_item_id(event_id: uuid::Uuid, node_id: NodeId, recipient: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event_id.as_bytes());
    hasher.update(node_id.0.to_le_bytes());
    hasher.update(recipient.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

async fn already_applied(tx: &mut SqliteConnection, idempotency_key: &str) -> Result<bool, StoreError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM applied_events WHERE idempotency_key = ?")
        .bind(idempotency_key)
        .fetch_optional(&mut *tx)
        .await?;
    Ok(row.is_some())
}

async fn read_applied_outcome(tx: &mut SqliteConnection, idempotency_key: &str) -> Result<ApplyOutcome, StoreError> {
    let row: (String,) = sqlx::query_as("SELECT result_json FROM applied_events WHERE idempotency_key = ?")
        .bind(idempotency_key)
        .fetch_one(&mut *tx)
        .await?;
    serde_json::from_str(&row.0).map_err(|e| StoreError::Invariant(format!("corrupt applied_events row: {e}")))
}

async fn apply_one(
    tx: &mut SqliteConnection,
    schema: &entdb_schema::FrozenSchema,
    op: &Operation,
    conflicts: &mut Vec<Conflict>,
) -> Result<(), StoreError> {
    match op {
        Operation::CreateNode { id, type_id, payload, principals, .. } => {
            let payload_json = serde_json::to_string(payload)
                .map_err(|e| StoreError::Invariant(format!("failed to serialize payload: {e}")))?;
            let now = chrono::Utc::now().timestamp_millis();
            sqlx::query(
                "INSERT INTO nodes (id, type_id, payload_json, owner_actor, created_at, updated_at, deleted, version) \
                 VALUES (?, ?, ?, ?, ?, ?, 0, 1)",
            )
            .bind(id.to_string())
            .bind(type_id.0 as i64)
            .bind(&payload_json)
            .bind("system")
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let acl = principals.clone().unwrap_or_else(|| {
                schema
                    .get_node_type(*type_id)
                    .map(|t| t.default_acl.clone())
                    .unwrap_or_default()
            });
            for principal in acl {
                sqlx::query("INSERT OR IGNORE INTO acl (node_id, principal) VALUES (?, ?)")
                    .bind(id.to_string())
                    .bind(principal)
                    .execute(&mut *tx)
                    .await?;
            }
            Ok(())
        }
        Operation::UpdateNode { node, patch_payload, expected_version } => {
            let NodeRef::Id(id) = node else {
                return Err(StoreError::Invariant("update_node reached the store with an unresolved alias".to_string()));
            };
            let row: Option<(String, i64)> = sqlx::query_as("SELECT payload_json, version FROM nodes WHERE id = ? AND deleted = 0")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
            let Some((payload_json, current_version)) = row else {
                return Err(StoreError::Invariant(format!("update_node target {id} does not exist")));
            };

            if let Some(expected) = expected_version {
                if *expected != current_version as u64 {
                    conflicts.push(Conflict {
                        node_id: *id,
                        expected_version: *expected,
                        observed_version: current_version as u64,
                    });
                    return Ok(());
                }
            }

            let mut current: HashMap<String, Value> =
                serde_json::from_str(&payload_json).unwrap_or_default();
            for (k, v) in patch_payload {
                current.insert(k.clone(), v.clone());
            }
            let new_payload_json = serde_json::to_string(&current)
                .map_err(|e| StoreError::Invariant(format!("failed to serialize patched payload: {e}")))?;

            sqlx::query("UPDATE nodes SET payload_json = ?, version = version + 1, updated_at = ? WHERE id = ?")
                .bind(&new_payload_json)
                .bind(chrono::Utc::now().timestamp_millis())
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
            Ok(())
        }
        Operation::DeleteNode { node } => {
            let NodeRef::Id(id) = node else {
                return Err(StoreError::Invariant("delete_node reached the store with an unresolved alias".to_string()));
            };
            let result = sqlx::query(
                "UPDATE nodes SET deleted = 1, version = version + 1, updated_at = ? WHERE id = ? AND deleted = 0",
            )
            .bind(chrono::Utc::now().timestamp_millis())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Invariant(format!("delete_node target {id} does not exist")));
            }
            sqlx::query("DELETE FROM acl WHERE node_id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
            Ok(())
        }
        Operation::CreateEdge { edge_type_id, from, to, props } => {
            let (NodeRef::Id(from_id), NodeRef::Id(to_id)) = (from, to) else {
                return Err(StoreError::Invariant("create_edge reached the store with an unresolved alias".to_string()));
            };
            let props_json = serde_json::to_string(&props.clone().unwrap_or_default())
                .map_err(|e| StoreError::Invariant(format!("failed to serialize edge props: {e}")))?;
            sqlx::query(
                "INSERT OR IGNORE INTO edges (edge_type_id, from_id, to_id, props_json, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(edge_type_id.0 as i64)
            .bind(from_id.to_string())
            .bind(to_id.to_string())
            .bind(&props_json)
            .bind(chrono::Utc::now().timestamp_millis())
            .execute(&mut *tx)
            .await?;
            Ok(())
        }
        Operation::DeleteEdge { edge_type_id, from, to } => {
            let (NodeRef::Id(from_id), NodeRef::Id(to_id)) = (from, to) else {
                return Err(StoreError::Invariant("delete_edge reached the store with an unresolved alias".to_string()));
            };
            sqlx::query("DELETE FROM edges WHERE edge_type_id = ? AND from_id = ? AND to_id = ?")
                .bind(edge_type_id.0 as i64)
                .bind(from_id.to_string())
                .bind(to_id.to_string())
                .execute(&mut *tx)
                .await?;
            Ok(())
        }
        Operation::SetVisibility { node, principals } => {
            let NodeRef::Id(id) = node else {
                return Err(StoreError::Invariant("set_visibility reached the store with an unresolved alias".to_string()));
            };
            sqlx::query("DELETE FROM acl WHERE node_id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
            for principal in principals {
                sqlx::query("INSERT OR IGNORE INTO acl (node_id, principal) VALUES (?, ?)")
                    .bind(id.to_string())
                    .bind(principal)
                    .execute(&mut *tx)
                    .await?;
            }
            Ok(())
        }
    }
}

/// Minimal hex encoding helper so this crate does not need a dependency
/// just for `Sha256` digest -> string formatting.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}
