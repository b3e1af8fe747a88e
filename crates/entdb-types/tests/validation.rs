use entdb_types::AliasRef;
use entdb_types::event::Event;
use entdb_types::{CURRENT_ENVELOPE_VERSION, Operation, TenantId, TypeId};
use std::collections::HashMap;

#[test]
fn alias_ref_parses_dollar_dot_id_syntax() {
    assert_eq!(
        AliasRef::parse("$u.id"),
        Some(AliasRef { alias: "u".to_string() })
    );
    assert_eq!(AliasRef::parse("u.id"), None);
    assert_eq!(AliasRef::parse("$.id"), None);
    assert_eq!(AliasRef::parse("$u"), None);
}

#[test]
fn event_encode_decode_roundtrips() {
    let event = Event {
        envelope_version: CURRENT_ENVELOPE_VERSION,
        event_id: uuid::Uuid::new_v4(),
        tenant_id: TenantId::from("t1"),
        actor: "user:alice".to_string(),
        idempotency_key: "e2e-1".to_string(),
        schema_fingerprint: [7u8; 32],
        created_at_ms: 1_700_000_000_000,
        operations: vec![Operation::CreateNode {
            id: entdb_types::NodeId::generate(0),
            type_id: TypeId(1),
            payload: HashMap::new(),
            alias: Some("u".to_string()),
            principals: None,
            recipients: None,
        }],
    };

    let encoded = event.encode().unwrap();
    let (decoded, consumed) = Event::decode(&encoded).unwrap();
    assert_eq!(consumed, encoded.len());
    assert_eq!(decoded.event_id, event.event_id);
    assert_eq!(decoded.tenant_id, event.tenant_id);
    assert_eq!(decoded.operations.len(), 1);
}

#[test]
fn event_decode_rejects_truncated_frame() {
    let err = Event::decode(&[1, 0, 0]).unwrap_err();
    assert!(matches!(err, entdb_types::event::EventDecodeError::Truncated));
}
