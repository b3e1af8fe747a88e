use entdb_schema::Registry;
use entdb_store::TenantStore;
use entdb_types::{
    EdgeType, EdgeTypeId, Event, FieldDef, FieldId, FieldKind, NodeId, NodeRef, NodeType,
    Operation, Position, TenantId, TypeId, Value, CURRENT_ENVELOPE_VERSION,
};
use std::collections::HashMap;
use std::sync::Arc;

fn schema() -> Arc<entdb_schema::FrozenSchema> {
    let mut reg = Registry::new();
    reg.register_node_type(NodeType {
        type_id: TypeId(1),
        name: "person".to_string(),
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
        default_acl: vec!["role:admin".to_string()],
    })
    .unwrap();
    reg.register_edge_type(EdgeType {
        edge_id: EdgeTypeId(1),
        name: "knows".to_string(),
        from_type: TypeId(1),
        to_type: TypeId(1),
        deprecated: false,
    })
    .unwrap();
    Arc::new(reg.freeze().unwrap())
}

fn event(operations: Vec<Operation>, idempotency_key: &str) -> Event {
    Event {
        envelope_version: CURRENT_ENVELOPE_VERSION,
        event_id: uuid::Uuid::new_v4(),
        tenant_id: TenantId::from("tenant-a"),
        actor: "user:alice".to_string(),
        idempotency_key: idempotency_key.to_string(),
        schema_fingerprint: schema().fingerprint(),
        created_at_ms: 1_700_000_000_000,
        operations,
    }
}

#[tokio::test]
async fn create_node_is_readable_after_apply() {
    let store = TenantStore::in_memory(TenantId::from("tenant-a"), schema()).await.unwrap();
    let id = NodeId::generate(0);
    let mut payload = HashMap::new();
    payload.insert("email".to_string(), Value::Str("alice@example.com".to_string()));

    let e = event(
        vec![Operation::CreateNode { id, type_id: TypeId(1), payload, alias: None, principals: None, recipients: None }],
        "key-1",
    );
    let outcome = store.apply_transaction(Position::new(0, 0), &e).await.unwrap();
    assert!(outcome.conflicts.is_empty());

    let node = store.get_node(id).await.unwrap().unwrap();
    assert_eq!(node.payload.get("email"), Some(&Value::Str("alice@example.com".to_string())));
    assert!(!node.deleted);
    assert_eq!(node.version, 1);
}

#[tokio::test]
async fn replaying_the_same_idempotency_key_is_a_no_op() {
    let store = TenantStore::in_memory(TenantId::from("tenant-a"), schema()).await.unwrap();
    let id = NodeId::generate(0);
    let mut payload = HashMap::new();
    payload.insert("email".to_string(), Value::Str("alice@example.com".to_string()));
    let e = event(
        vec![Operation::CreateNode { id, type_id: TypeId(1), payload, alias: None, principals: None, recipients: None }],
        "key-1",
    );

    store.apply_transaction(Position::new(0, 0), &e).await.unwrap();
    let second = store.apply_transaction(Position::new(0, 1), &e).await.unwrap();
    assert!(second.conflicts.is_empty());

    let node = store.get_node(id).await.unwrap().unwrap();
    assert_eq!(node.version, 1, "replay must not bump version a second time");
}

#[tokio::test]
async fn update_with_stale_expected_version_is_reported_as_a_conflict() {
    let store = TenantStore::in_memory(TenantId::from("tenant-a"), schema()).await.unwrap();
    let id = NodeId::generate(0);
    let mut payload = HashMap::new();
    payload.insert("email".to_string(), Value::Str("alice@example.com".to_string()));
    let create = event(
        vec![Operation::CreateNode { id, type_id: TypeId(1), payload, alias: None, principals: None, recipients: None }],
        "key-create",
    );
    store.apply_transaction(Position::new(0, 0), &create).await.unwrap();

    let mut patch = HashMap::new();
    patch.insert("email".to_string(), Value::Str("new@example.com".to_string()));
    let update = event(
        vec![Operation::UpdateNode { node: NodeRef::Id(id), patch_payload: patch, expected_version: Some(99) }],
        "key-update",
    );
    let outcome = store.apply_transaction(Position::new(0, 1), &update).await.unwrap();
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].expected_version, 99);
    assert_eq!(outcome.conflicts[0].observed_version, 1);

    let node = store.get_node(id).await.unwrap().unwrap();
    assert_eq!(node.version, 1, "a conflicting update must not apply its patch");
}

#[tokio::test]
async fn updating_a_nonexistent_node_is_an_invariant_violation() {
    let store = TenantStore::in_memory(TenantId::from("tenant-a"), schema()).await.unwrap();
    let update = event(
        vec![Operation::UpdateNode {
            node: NodeRef::Id(NodeId::generate(0)),
            patch_payload: HashMap::new(),
            expected_version: None,
        }],
        "key-1",
    );
    let err = store.apply_transaction(Position::new(0, 0), &update).await.unwrap_err();
    assert!(matches!(err, entdb_store::StoreError::Invariant(_)));
}

#[tokio::test]
async fn create_edge_is_idempotent_and_traversable_both_directions() {
    let store = TenantStore::in_memory(TenantId::from("tenant-a"), schema()).await.unwrap();
    let (a, b) = (NodeId::generate(0), NodeId::generate(1));
    let mut payload_a = HashMap::new();
    payload_a.insert("email".to_string(), Value::Str("a@example.com".to_string()));
    let mut payload_b = HashMap::new();
    payload_b.insert("email".to_string(), Value::Str("b@example.com".to_string()));

    let create = event(
        vec![
            Operation::CreateNode { id: a, type_id: TypeId(1), payload: payload_a, alias: None, principals: None, recipients: None },
            Operation::CreateNode { id: b, type_id: TypeId(1), payload: payload_b, alias: None, principals: None, recipients: None },
            Operation::CreateEdge { edge_type_id: EdgeTypeId(1), from: NodeRef::Id(a), to: NodeRef::Id(b), props: None },
        ],
        "key-1",
    );
    store.apply_transaction(Position::new(0, 0), &create).await.unwrap();

    let edge_again = event(
        vec![Operation::CreateEdge { edge_type_id: EdgeTypeId(1), from: NodeRef::Id(a), to: NodeRef::Id(b), props: None }],
        "key-2",
    );
    store.apply_transaction(Position::new(0, 1), &edge_again).await.unwrap();

    let out = store.edges_out(a, None).await.unwrap();
    assert_eq!(out.len(), 1, "duplicate create_edge must not produce two rows");
    let into = store.edges_in(b, None).await.unwrap();
    assert_eq!(into.len(), 1);
}

#[tokio::test]
async fn default_acl_is_applied_when_no_principals_given() {
    let store = TenantStore::in_memory(TenantId::from("tenant-a"), schema()).await.unwrap();
    let id = NodeId::generate(0);
    let mut payload = HashMap::new();
    payload.insert("email".to_string(), Value::Str("alice@example.com".to_string()));
    let create = event(
        vec![Operation::CreateNode { id, type_id: TypeId(1), payload, alias: None, principals: None, recipients: None }],
        "key-1",
    );
    store.apply_transaction(Position::new(0, 0), &create).await.unwrap();

    let checkpoint = store.checkpoint().await.unwrap().unwrap();
    assert_eq!(checkpoint, Position::new(0, 0));
}
