//! Payload validation (spec.md §4.1): unknown fields, missing required
//! fields, kind mismatches, and out-of-set enum values. A pure function
//! over `(NodeType, payload)`, per the re-architecture note in spec.md
//! §9 — it only confirms a `ref` field holds the right *shape*
//! (`{type_id, id}`); resolving the `type_id` against the registry needs
//! the registry, so that check lives in `FrozenSchema::validate`.

use crate::levenshtein::best_suggestions;
use entdb_types::{FieldError, FieldKind, NodeType, Value};
use std::collections::HashMap;

/// Validate `payload` against `node_type`, expanding defaults for any
/// missing optional field that declares one. Returns the expanded payload
/// on success, or the full list of field errors found (not just the
/// first).
pub fn validate(
    node_type: &NodeType,
    payload: &HashMap<String, Value>,
) -> Result<HashMap<String, Value>, Vec<FieldError>> {
    let mut errors = Vec::new();
    let mut expanded = HashMap::new();
    let known_names: Vec<&str> = node_type.fields.iter().map(|f| f.name.as_str()).collect();

    for (name, value) in payload {
        match node_type.field_by_name(name) {
            None => errors.push(FieldError {
                field: name.clone(),
                message: format!("unknown field '{}'", name),
                suggestions: best_suggestions(name, &known_names, 3),
            }),
            Some(field) => {
                if let Err(msg) = check_kind(field.kind, &field.enum_values, value) {
                    errors.push(FieldError {
                        field: name.clone(),
                        message: msg,
                        suggestions: Vec::new(),
                    });
                } else {
                    expanded.insert(name.clone(), value.clone());
                }
            }
        }
    }

    for field in &node_type.fields {
        if expanded.contains_key(&field.name) {
            continue;
        }
        match &field.default {
            Some(default) => {
                expanded.insert(field.name.clone(), default.clone());
            }
            None => {
                if field.required {
                    errors.push(FieldError {
                        field: field.name.clone(),
                        message: format!("missing required field '{}'", field.name),
                        suggestions: Vec::new(),
                    });
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(expanded)
    } else {
        Err(errors)
    }
}

fn check_kind(
    kind: FieldKind,
    enum_values: &Option<Vec<String>>,
    value: &Value,
) -> Result<(), String> {
    match (kind, value) {
        (FieldKind::String, Value::Str(_)) => Ok(()),
        (FieldKind::Int64, Value::Int(_)) => Ok(()),
        (FieldKind::Float64, Value::Float(_)) => Ok(()),
        (FieldKind::Bool, Value::Bool(_)) => Ok(()),
        (FieldKind::TimestampMs, Value::TsMs(_)) => Ok(()),
        (FieldKind::ListString, Value::ListStr(_)) => Ok(()),
        (FieldKind::ListInt64, Value::ListInt(_)) => Ok(()),
        (FieldKind::Ref, Value::Ref { .. }) => Ok(()),
        (FieldKind::Enum, Value::Enum(v)) => {
            let allowed = enum_values.as_deref().unwrap_or(&[]);
            if allowed.iter().any(|a| a == v) {
                Ok(())
            } else {
                Err(format!(
                    "enum value '{}' not in allowed set {:?}",
                    v, allowed
                ))
            }
        }
        (expected, actual) => Err(format!(
            "kind mismatch: expected {:?}, got {}",
            expected,
            actual.kind_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entdb_types::{FieldDef, FieldId, TypeId};

    fn person_type() -> NodeType {
        NodeType {
            type_id: TypeId(1),
            name: "Person".to_string(),
            fields: vec![
                FieldDef {
                    field_id: FieldId(1),
                    name: "email".to_string(),
                    kind: FieldKind::String,
                    required: true,
                    default: None,
                    enum_values: None,
                    deprecated: false,
                },
                FieldDef {
                    field_id: FieldId(2),
                    name: "status".to_string(),
                    kind: FieldKind::Enum,
                    required: false,
                    default: Some(Value::Enum("active".to_string())),
                    enum_values: Some(vec!["active".to_string(), "inactive".to_string()]),
                    deprecated: false,
                },
            ],
            deprecated: false,
            default_acl: Vec::new(),
        }
    }

    #[test]
    fn unknown_field_suggests_nearest_name() {
        let mut payload = HashMap::new();
        payload.insert("emial".to_string(), Value::Str("a@x".to_string()));
        let errors = validate(&person_type(), &payload).unwrap_err();
        assert_eq!(errors.len(), 2); // unknown 'emial' + missing required 'email'
        let unknown = errors.iter().find(|e| e.field == "emial").unwrap();
        assert!(unknown.suggestions.contains(&"email".to_string()));
    }

    #[test]
    fn missing_required_field_is_reported() {
        let payload = HashMap::new();
        let errors = validate(&person_type(), &payload).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "email");
    }

    #[test]
    fn default_is_expanded_when_field_absent() {
        let mut payload = HashMap::new();
        payload.insert("email".to_string(), Value::Str("a@x".to_string()));
        let expanded = validate(&person_type(), &payload).unwrap();
        assert_eq!(expanded.get("status"), Some(&Value::Enum("active".to_string())));
    }

    #[test]
    fn enum_value_outside_set_is_rejected() {
        let mut payload = HashMap::new();
        payload.insert("email".to_string(), Value::Str("a@x".to_string()));
        payload.insert("status".to_string(), Value::Enum("deleted".to_string()));
        let errors = validate(&person_type(), &payload).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "status");
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let mut payload = HashMap::new();
        payload.insert("email".to_string(), Value::Int(5));
        let errors = validate(&person_type(), &payload).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "email"));
    }
}
