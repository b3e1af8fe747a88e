//! Schema fingerprint: SHA-256 over a canonical serialization with
//! `type_id` ascending, `field_id` ascending within each type, and
//! `enum_values` sorted (spec.md §3). Deterministic regardless of
//! registration order, so two processes that register the same types in a
//! different order still agree on the fingerprint.

use entdb_types::Schema;
use sha2::{Digest, Sha256};

/// Compute the schema fingerprint.
pub fn fingerprint(schema: &Schema) -> [u8; 32] {
    let mut hasher = Sha256::new();

    let mut node_types = schema.node_types.clone();
    node_types.sort_by_key(|t| t.type_id.0);
    for node_type in &node_types {
        hasher.update(b"NODE_TYPE");
        hasher.update(node_type.type_id.0.to_be_bytes());
        hasher.update(node_type.name.as_bytes());
        hasher.update([node_type.deprecated as u8]);

        let mut fields = node_type.fields.clone();
        fields.sort_by_key(|f| f.field_id.0);
        for field in &fields {
            hasher.update(b"FIELD");
            hasher.update(field.field_id.0.to_be_bytes());
            hasher.update(field.name.as_bytes());
            hasher.update([kind_tag(field.kind)]);
            hasher.update([field.required as u8]);
            hasher.update([field.deprecated as u8]);
            if let Some(values) = &field.enum_values {
                let mut sorted = values.clone();
                sorted.sort();
                for v in sorted {
                    hasher.update(b"ENUM_VALUE");
                    hasher.update(v.as_bytes());
                }
            }
        }
    }

    let mut edge_types = schema.edge_types.clone();
    edge_types.sort_by_key(|e| e.edge_id.0);
    for edge_type in &edge_types {
        hasher.update(b"EDGE_TYPE");
        hasher.update(edge_type.edge_id.0.to_be_bytes());
        hasher.update(edge_type.name.as_bytes());
        hasher.update(edge_type.from_type.0.to_be_bytes());
        hasher.update(edge_type.to_type.0.to_be_bytes());
        hasher.update([edge_type.deprecated as u8]);
    }

    hasher.finalize().into()
}

fn kind_tag(kind: entdb_types::FieldKind) -> u8 {
    use entdb_types::FieldKind::*;
    match kind {
        String => 0,
        Int64 => 1,
        Float64 => 2,
        Bool => 3,
        TimestampMs => 4,
        Enum => 5,
        ListString => 6,
        ListInt64 => 7,
        Ref => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entdb_types::{EdgeType, EdgeTypeId, FieldDef, FieldId, FieldKind, NodeType, TypeId};

    fn sample_schema() -> Schema {
        Schema {
            node_types: vec![NodeType {
                type_id: TypeId(1),
                name: "Person".to_string(),
                fields: vec![FieldDef {
                    field_id: FieldId(1),
                    name: "email".to_string(),
                    kind: FieldKind::String,
                    required: true,
                    default: None,
                    enum_values: None,
                    deprecated: false,
                }],
                deprecated: false,
                default_acl: Vec::new(),
            }],
            edge_types: vec![EdgeType {
                edge_id: EdgeTypeId(100),
                name: "owns".to_string(),
                from_type: TypeId(1),
                to_type: TypeId(1),
                deprecated: false,
            }],
        }
    }

    #[test]
    fn fingerprint_is_deterministic_regardless_of_registration_order() {
        let mut reordered = sample_schema();
        reordered.node_types.reverse();
        reordered.edge_types.reverse();

        assert_eq!(fingerprint(&sample_schema()), fingerprint(&reordered));
    }

    #[test]
    fn fingerprint_changes_when_a_field_is_added() {
        let mut modified = sample_schema();
        modified.node_types[0].fields.push(FieldDef {
            field_id: FieldId(2),
            name: "name".to_string(),
            kind: FieldKind::String,
            required: false,
            default: None,
            enum_values: None,
            deprecated: false,
        });

        assert_ne!(fingerprint(&sample_schema()), fingerprint(&modified));
    }
}
