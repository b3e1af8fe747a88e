//! Schema data model (spec.md §3): `NodeType`, `EdgeType`, `Schema`, and
//! their fields. The registry logic that builds, validates against, and
//! fingerprints a `Schema` lives in the `entdb-schema` crate; this module
//! only defines the shapes it operates on, so that `entdb-types` stays free
//! of any validation behaviour and every downstream crate can share one
//! definition of "what a schema is".

use crate::ids::{EdgeTypeId, FieldId, TypeId};
use serde::{Deserialize, Serialize};

/// The kind of value a field holds. One-to-one with [`crate::value::Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// UTF-8 string.
    String,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit float.
    Float64,
    /// Boolean.
    Bool,
    /// Milliseconds since the Unix epoch.
    TimestampMs,
    /// Enum, constrained to `FieldDef::enum_values`.
    Enum,
    /// List of strings.
    ListString,
    /// List of 64-bit integers.
    ListInt64,
    /// Reference to another node.
    Ref,
}

/// A single field definition within a [`NodeType`].
///
/// `(type_id, field_id)` is permanent once used: never removed, never
/// reassigned (spec.md §3). Compatibility rules in `entdb-schema` enforce
/// this across schema versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Permanent numeric field identifier.
    pub field_id: FieldId,
    /// Field name, renamable (same id) across schema evolution.
    pub name: String,
    /// The value kind. Never changes once assigned to a `field_id`.
    pub kind: FieldKind,
    /// Whether a create/update payload must supply this field (absent a
    /// default).
    pub required: bool,
    /// Default value substituted for a missing field on `create_node`.
    pub default: Option<crate::value::Value>,
    /// Allowed values, only meaningful when `kind == FieldKind::Enum`.
    /// Grows monotonically across schema evolution; values are never
    /// removed.
    pub enum_values: Option<Vec<String>>,
    /// Deprecated fields are still validated and readable but should not be
    /// written by new clients.
    pub deprecated: bool,
}

/// A node type: the schema for one class of node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeType {
    /// Permanent numeric type identifier.
    pub type_id: TypeId,
    /// Type name.
    pub name: String,
    /// Ordered field list (order is part of the canonical fingerprint
    /// serialization, though validation itself is order-independent).
    pub fields: Vec<FieldDef>,
    /// Deprecated types may still be read but should not be created.
    pub deprecated: bool,
    /// ACL principals applied to a node of this type when none are
    /// supplied explicitly at creation.
    pub default_acl: Vec<String>,
}

impl NodeType {
    /// Find a field definition by name.
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Find a field definition by its permanent numeric id.
    pub fn field_by_id(&self, id: FieldId) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.field_id == id)
    }
}

/// An edge type: `(edge_id, name, from_type, to_type, deprecated)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeType {
    /// Permanent numeric edge type identifier.
    pub edge_id: EdgeTypeId,
    /// Edge type name.
    pub name: String,
    /// Required type of the edge's `from` endpoint.
    pub from_type: TypeId,
    /// Required type of the edge's `to` endpoint.
    pub to_type: TypeId,
    /// Deprecated edge types may still be read but should not be created.
    pub deprecated: bool,
}

/// A frozen, fingerprinted set of node and edge types.
///
/// `Schema` itself carries no validation logic — see `entdb_schema::Registry`
/// for `register`/`freeze`/`validate`/`fingerprint`/`check_compatibility`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    /// Registered node types, keyed by `type_id` for lookup convenience.
    pub node_types: Vec<NodeType>,
    /// Registered edge types, keyed by `edge_id`.
    pub edge_types: Vec<EdgeType>,
}

impl Schema {
    /// Look up a node type by its numeric id.
    pub fn node_type(&self, id: TypeId) -> Option<&NodeType> {
        self.node_types.iter().find(|t| t.type_id == id)
    }

    /// Look up a node type by name.
    pub fn node_type_by_name(&self, name: &str) -> Option<&NodeType> {
        self.node_types.iter().find(|t| t.name == name)
    }

    /// Look up an edge type by its numeric id.
    pub fn edge_type(&self, id: EdgeTypeId) -> Option<&EdgeType> {
        self.edge_types.iter().find(|t| t.edge_id == id)
    }
}
