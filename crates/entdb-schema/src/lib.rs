#![forbid(unsafe_code)]

//! **entdb-schema** – Schema registry for EntDB (spec.md §4.1).
//!
//! A [`Registry`] accumulates [`NodeType`](entdb_types::NodeType)s and
//! [`EdgeType`](entdb_types::EdgeType)s, is then [`Registry::freeze`]-d into
//! an immutable [`entdb_types::Schema`] plus a fingerprint, and is used for
//! the lifetime of the process from there on (spec.md §9: "process-wide
//! schema registry ... initialize once, freeze, and treat as immutable").
//! Reloading means starting a new process; `check_compatibility` is how a
//! rolling redeploy validates the new process's schema against what a
//! tenant's stored fingerprint expects.

pub mod builtin;
mod compatibility;
mod fingerprint;
mod levenshtein;
mod validate;

pub use compatibility::{check_compatibility, BreakingChange};
pub use fingerprint::fingerprint;
pub use validate::validate;

use entdb_types::{EdgeType, EdgeTypeId, FieldError, NodeType, Schema, TypeId};
use thiserror::Error;

/// Errors raised while building up a [`Registry`] before it is frozen.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// A `type_id` was registered more than once.
    #[error("duplicate type_id {0:?}")]
    DuplicateTypeId(TypeId),
    /// An `edge_id` was registered more than once.
    #[error("duplicate edge_id {0:?}")]
    DuplicateEdgeId(EdgeTypeId),
    /// Two fields within the same node type share a `field_id`.
    #[error("duplicate field_id {field_id:?} within type {type_id:?}")]
    DuplicateFieldId {
        /// Owning type.
        type_id: TypeId,
        /// Duplicated field id.
        field_id: entdb_types::FieldId,
    },
    /// `register` was called after `freeze`.
    #[error("registry is frozen")]
    AlreadyFrozen,
    /// `freeze` was called twice.
    #[error("registry already frozen")]
    DoubleFreeze,
}

/// Mutable schema builder; becomes an immutable [`FrozenSchema`] via
/// [`Registry::freeze`].
#[derive(Debug, Default)]
pub struct Registry {
    schema: Schema,
    frozen: bool,
}

/// An immutable, fingerprinted schema, as returned by [`Registry::freeze`].
/// This is the shape every other EntDB crate actually depends on; nothing
/// outside this crate holds a mutable `Registry`.
#[derive(Debug, Clone)]
pub struct FrozenSchema {
    schema: Schema,
    fingerprint: [u8; 32],
}

impl Registry {
    /// Create an empty, unfrozen registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type. Rejects a repeated `type_id` or a repeated
    /// `field_id` within the type (spec.md §3 invariants).
    pub fn register_node_type(&mut self, node_type: NodeType) -> Result<(), SchemaError> {
        if self.frozen {
            return Err(SchemaError::AlreadyFrozen);
        }
        if self.schema.node_type(node_type.type_id).is_some() {
            return Err(SchemaError::DuplicateTypeId(node_type.type_id));
        }
        let mut seen = std::collections::HashSet::new();
        for field in &node_type.fields {
            if !seen.insert(field.field_id) {
                return Err(SchemaError::DuplicateFieldId {
                    type_id: node_type.type_id,
                    field_id: field.field_id,
                });
            }
        }
        self.schema.node_types.push(node_type);
        Ok(())
    }

    /// Register an edge type. Rejects a repeated `edge_id`.
    pub fn register_edge_type(&mut self, edge_type: EdgeType) -> Result<(), SchemaError> {
        if self.frozen {
            return Err(SchemaError::AlreadyFrozen);
        }
        if self.schema.edge_type(edge_type.edge_id).is_some() {
            return Err(SchemaError::DuplicateEdgeId(edge_type.edge_id));
        }
        self.schema.edge_types.push(edge_type);
        Ok(())
    }

    /// Freeze the registry: no further registration is possible, and a
    /// fingerprint is computed once over the canonical serialization.
    pub fn freeze(mut self) -> Result<FrozenSchema, SchemaError> {
        if self.frozen {
            return Err(SchemaError::DoubleFreeze);
        }
        self.frozen = true;
        let fp = fingerprint(&self.schema);
        Ok(FrozenSchema { schema: self.schema, fingerprint: fp })
    }
}

impl FrozenSchema {
    /// Borrow the underlying frozen [`Schema`].
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Look up a node type by numeric id.
    pub fn get_node_type(&self, id: TypeId) -> Option<&NodeType> {
        self.schema.node_type(id)
    }

    /// Look up a node type by name.
    pub fn get_node_type_by_name(&self, name: &str) -> Option<&NodeType> {
        self.schema.node_type_by_name(name)
    }

    /// Look up an edge type by numeric id.
    pub fn get_edge_type(&self, id: EdgeTypeId) -> Option<&EdgeType> {
        self.schema.edge_type(id)
    }

    /// SHA-256 fingerprint over the canonical serialization (spec.md §3).
    pub fn fingerprint(&self) -> [u8; 32] {
        self.fingerprint
    }

    /// Validate a payload against one of this schema's node types. Beyond
    /// the per-kind checks `validate::validate` runs, this also resolves
    /// every `ref` field's `type_id` against the live registry (spec.md
    /// §4.1: "`ref` must be a `{type_id, id}` map whose `type_id`
    /// resolves") — a check that needs the registry in scope, so it can't
    /// live in the registry-agnostic pure function.
    pub fn validate(
        &self,
        type_id: TypeId,
        payload: &std::collections::HashMap<String, entdb_types::Value>,
    ) -> Result<std::collections::HashMap<String, entdb_types::Value>, Vec<FieldError>> {
        let node_type = match self.get_node_type(type_id) {
            Some(t) => t,
            None => {
                return Err(vec![FieldError {
                    field: String::new(),
                    message: format!("unknown type_id {:?}", type_id),
                    suggestions: Vec::new(),
                }])
            }
        };
        let expanded = validate(node_type, payload)?;

        let mut ref_errors = Vec::new();
        for (name, value) in &expanded {
            if let entdb_types::Value::Ref { type_id: ref_type, .. } = value {
                if self.get_node_type(*ref_type).is_none() {
                    ref_errors.push(FieldError {
                        field: name.clone(),
                        message: format!("ref field '{name}' points to unresolved type_id {ref_type:?}"),
                        suggestions: Vec::new(),
                    });
                }
            }
        }
        if ref_errors.is_empty() {
            Ok(expanded)
        } else {
            Err(ref_errors)
        }
    }

    /// Check whether `candidate` is a compatible evolution of `self`
    /// (spec.md §4.1).
    pub fn check_compatibility(&self, candidate: &FrozenSchema) -> Result<(), Vec<BreakingChange>> {
        check_compatibility(&self.schema, &candidate.schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entdb_types::{FieldDef, FieldId, FieldKind, NodeId, Value};
    use std::collections::HashMap;

    fn registry_with_person_and_task() -> FrozenSchema {
        let mut reg = Registry::new();
        reg.register_node_type(NodeType {
            type_id: TypeId(1),
            name: "person".to_string(),
            fields: vec![],
            deprecated: false,
            default_acl: Vec::new(),
        })
        .unwrap();
        reg.register_node_type(NodeType {
            type_id: TypeId(2),
            name: "task".to_string(),
            fields: vec![FieldDef {
                field_id: FieldId(1),
                name: "owner".to_string(),
                kind: FieldKind::Ref,
                required: true,
                default: None,
                enum_values: None,
                deprecated: false,
            }],
            deprecated: false,
            default_acl: Vec::new(),
        })
        .unwrap();
        reg.freeze().unwrap()
    }

    #[test]
    fn ref_field_with_resolvable_type_id_is_accepted() {
        let schema = registry_with_person_and_task();
        let mut payload = HashMap::new();
        payload.insert(
            "owner".to_string(),
            Value::Ref { type_id: TypeId(1), id: NodeId(1) },
        );
        assert!(schema.validate(TypeId(2), &payload).is_ok());
    }

    #[test]
    fn ref_field_with_unknown_type_id_is_rejected() {
        let schema = registry_with_person_and_task();
        let mut payload = HashMap::new();
        payload.insert(
            "owner".to_string(),
            Value::Ref { type_id: TypeId(99), id: NodeId(1) },
        );
        let errors = schema.validate(TypeId(2), &payload).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "owner"));
    }
}
