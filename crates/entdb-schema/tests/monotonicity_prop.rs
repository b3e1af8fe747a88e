use entdb_schema::check_compatibility;
use entdb_types::{FieldDef, FieldKind, NodeType, Schema, TypeId, Value};
use proptest::prelude::*;
use std::collections::HashMap;

fn schema_with_one_required_string_field() -> Schema {
    Schema {
        node_types: vec![NodeType {
            type_id: TypeId(1),
            name: "Person".to_string(),
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
        }],
        edge_types: Vec::new(),
    }
}

proptest! {
    /// spec.md §8 property 5: `check_compatibility(S, S')` returns ok only
    /// if every payload `S` accepts is also accepted by `S'`. We test the
    /// contrapositive-friendly direction: any payload valid under the
    /// baseline email field remains valid once a new optional field is
    /// added (the one evolution this suite exercises structurally).
    #[test]
    fn adding_an_optional_field_never_invalidates_old_payloads(email in ".*") {
        let baseline = schema_with_one_required_string_field();
        let mut candidate = baseline.clone();
        candidate.node_types[0].fields.push(FieldDef {
            field_id: entdb_types::FieldId(2),
            name: "nickname".to_string(),
            kind: FieldKind::String,
            required: false,
            default: None,
            enum_values: None,
            deprecated: false,
        });

        prop_assert!(check_compatibility(&baseline, &candidate).is_ok());

        let mut payload = HashMap::new();
        payload.insert("email".to_string(), Value::Str(email));

        let old_type = baseline.node_type(TypeId(1)).unwrap();
        let new_type = candidate.node_type(TypeId(1)).unwrap();

        prop_assert!(entdb_schema::validate(old_type, &payload).is_ok());
        prop_assert!(entdb_schema::validate(new_type, &payload).is_ok());
    }
}
