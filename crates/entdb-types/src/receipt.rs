//! Coordinator reply types (spec.md §3, §6): `Receipt` and `Conflict`.

use crate::ids::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coordinator's reply to an atomic execute request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// Server-assigned receipt identifier.
    pub receipt_id: uuid::Uuid,
    /// WAL position the transaction's event was appended at.
    pub wal_position: crate::event_position::Position,
    /// Whether the applier has already applied this event. `false` unless
    /// the caller requested `wait_for_applied` and the applier caught up
    /// before the deadline.
    pub applied: bool,
    /// Alias -> assigned node id bindings produced by id assignment
    /// (spec.md §4.3 step 3).
    pub result_aliases: HashMap<String, NodeId>,
    /// Any optimistic-concurrency conflicts observed when this event was
    /// applied. Populated only once `applied` is `true`.
    pub conflicts: Vec<Conflict>,
}

/// A single optimistic-concurrency conflict surfaced from the applier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    /// Node whose `expected_version` did not match.
    pub node_id: NodeId,
    /// The version the caller expected.
    pub expected_version: u64,
    /// The version actually observed at apply time.
    pub observed_version: u64,
}
