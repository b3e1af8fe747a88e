use entdb_types::{EdgeTypeId, NodeId, NodeRef, Operation, TypeId, Value};
use std::collections::HashMap;

#[test]
fn create_node_operation_roundtrips_through_json() {
    let mut payload = HashMap::new();
    payload.insert("email".to_string(), Value::Str("a@x".to_string()));
    payload.insert("age".to_string(), Value::Int(41));

    let original = Operation::CreateNode {
        id: NodeId::generate(0),
        type_id: TypeId(1),
        payload,
        alias: Some("u".to_string()),
        principals: None,
        recipients: Some(vec!["bob".to_string()]),
    };

    let json = serde_json::to_string(&original).expect("serialization failed");
    let decoded: Operation = serde_json::from_str(&json).expect("deserialization failed");

    assert_eq!(original, decoded);
}

#[test]
fn create_edge_operation_roundtrips_through_msgpack() {
    let original = Operation::CreateEdge {
        edge_type_id: EdgeTypeId(100),
        from: NodeRef::Id(NodeId(42)),
        to: NodeRef::Alias(entdb_types::AliasRef { alias: "u".to_string() }),
        props: None,
    };

    let bytes = rmp_serde::to_vec_named(&original).unwrap();
    let decoded: Operation = rmp_serde::from_slice(&bytes).unwrap();

    assert_eq!(original, decoded);
}

#[test]
fn value_kind_names_match_spec_kinds() {
    assert_eq!(Value::Str("x".into()).kind_name(), "string");
    assert_eq!(Value::Int(1).kind_name(), "int64");
    assert_eq!(Value::Float(1.0).kind_name(), "float64");
    assert_eq!(Value::Bool(true).kind_name(), "bool");
    assert_eq!(Value::TsMs(0).kind_name(), "timestamp_ms");
    assert_eq!(Value::Enum("a".into()).kind_name(), "enum");
    assert_eq!(Value::ListStr(vec![]).kind_name(), "list<string>");
    assert_eq!(Value::ListInt(vec![]).kind_name(), "list<int64>");
    assert_eq!(
        Value::Ref { type_id: TypeId(1), id: NodeId(1) }.kind_name(),
        "ref"
    );
}
