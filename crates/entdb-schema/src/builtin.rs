//! Compiled-in demo schema, loaded by `entdb-cli` regardless of the
//! `registry.schema_module` config value (spec.md §9: "process-wide
//! schema registry ... initialize once, freeze"). A real deployment would
//! resolve `schema_module` to one of several compiled-in schema
//! definitions; this implementation ships exactly one, covering a small
//! social-graph domain (`person`, `org` nodes; `knows`, `member_of`
//! edges) so the CLI has something to submit transactions against out of
//! the box.

use entdb_types::{EdgeType, EdgeTypeId, FieldDef, FieldId, FieldKind, NodeType, TypeId};

use crate::{FrozenSchema, Registry, SchemaError};

/// Type id assigned to the `person` node type.
pub const PERSON_TYPE: TypeId = TypeId(1);
/// Type id assigned to the `org` node type.
pub const ORG_TYPE: TypeId = TypeId(2);
/// Edge id assigned to the `knows` edge type.
pub const KNOWS_EDGE: EdgeTypeId = EdgeTypeId(1);
/// Edge id assigned to the `member_of` edge type.
pub const MEMBER_OF_EDGE: EdgeTypeId = EdgeTypeId(2);

/// Build and freeze the built-in demo schema.
pub fn load() -> Result<FrozenSchema, SchemaError> {
    let mut registry = Registry::new();

    registry.register_node_type(NodeType {
        type_id: PERSON_TYPE,
        name: "person".to_string(),
        fields: vec![
            FieldDef {
                field_id: FieldId(1),
                name: "name".to_string(),
                kind: FieldKind::String,
                required: true,
                default: None,
                enum_values: None,
                deprecated: false,
            },
            FieldDef {
                field_id: FieldId(2),
                name: "email".to_string(),
                kind: FieldKind::String,
                required: false,
                default: None,
                enum_values: None,
                deprecated: false,
            },
        ],
        deprecated: false,
        default_acl: vec!["tenant:*".to_string()],
    })?;

    registry.register_node_type(NodeType {
        type_id: ORG_TYPE,
        name: "org".to_string(),
        fields: vec![FieldDef {
            field_id: FieldId(1),
            name: "name".to_string(),
            kind: FieldKind::String,
            required: true,
            default: None,
            enum_values: None,
            deprecated: false,
        }],
        deprecated: false,
        default_acl: vec!["tenant:*".to_string()],
    })?;

    registry.register_edge_type(EdgeType {
        edge_id: KNOWS_EDGE,
        name: "knows".to_string(),
        from_type: PERSON_TYPE,
        to_type: PERSON_TYPE,
        deprecated: false,
    })?;

    registry.register_edge_type(EdgeType {
        edge_id: MEMBER_OF_EDGE,
        name: "member_of".to_string(),
        from_type: PERSON_TYPE,
        to_type: ORG_TYPE,
        deprecated: false,
    })?;

    registry.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_schema_freezes_and_resolves_every_type_by_name() {
        let schema = load().unwrap();
        assert!(schema.get_node_type_by_name("person").is_some());
        assert!(schema.get_node_type_by_name("org").is_some());
        assert!(schema.get_edge_type(KNOWS_EDGE).is_some());
        assert!(schema.get_edge_type(MEMBER_OF_EDGE).is_some());
    }
}
