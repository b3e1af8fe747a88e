//! Schema compatibility checking (spec.md §4.1).
//!
//! Allowed relative to baseline: add type, add field, add enum value,
//! rename (same id), mark deprecated, drop `required` on an
//! optional-compatible field. Forbidden: remove type, remove field, change
//! field kind, remove enum value, reuse any id, make a previously optional
//! field required.
//!
//! Note on id reuse: this function only ever sees two schemas at a time.
//! Reusing an id therefore can only happen by first *removing* the type or
//! field that held it and then registering a new one under the same id —
//! and removal is already forbidden below. Detecting reuse across a longer
//! history (more than one schema hop) would require comparing against
//! every schema version ever frozen, not just the immediate baseline; that
//! is a job for the deployment process (compare against the fingerprint
//! recorded in each tenant's `tenant_meta`), not this pairwise check.

use entdb_types::{EdgeTypeId, FieldId, Schema, TypeId};

/// A single compatibility violation found in a candidate schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakingChange {
    /// A node type present in the baseline is absent from the candidate.
    TypeRemoved(TypeId),
    /// An edge type present in the baseline is absent from the candidate.
    EdgeTypeRemoved(EdgeTypeId),
    /// A field present in the baseline is absent from the candidate's
    /// version of the same type.
    FieldRemoved {
        /// Owning type.
        type_id: TypeId,
        /// Removed field.
        field_id: FieldId,
    },
    /// A field's kind changed between baseline and candidate.
    FieldKindChanged {
        /// Owning type.
        type_id: TypeId,
        /// Affected field.
        field_id: FieldId,
    },
    /// An enum value present in the baseline is absent from the
    /// candidate's allowed set for the same field.
    EnumValueRemoved {
        /// Owning type.
        type_id: TypeId,
        /// Affected field.
        field_id: FieldId,
        /// The value that disappeared.
        value: String,
    },
    /// A field that was optional in the baseline became required in the
    /// candidate.
    FieldBecameRequired {
        /// Owning type.
        type_id: TypeId,
        /// Affected field.
        field_id: FieldId,
    },
}

/// Check whether `candidate` is a compatible evolution of `baseline`.
pub fn check_compatibility(baseline: &Schema, candidate: &Schema) -> Result<(), Vec<BreakingChange>> {
    let mut violations = Vec::new();

    for base_type in &baseline.node_types {
        let Some(cand_type) = candidate.node_type(base_type.type_id) else {
            violations.push(BreakingChange::TypeRemoved(base_type.type_id));
            continue;
        };

        for base_field in &base_type.fields {
            let Some(cand_field) = cand_type.field_by_id(base_field.field_id) else {
                violations.push(BreakingChange::FieldRemoved {
                    type_id: base_type.type_id,
                    field_id: base_field.field_id,
                });
                continue;
            };

            if cand_field.kind != base_field.kind {
                violations.push(BreakingChange::FieldKindChanged {
                    type_id: base_type.type_id,
                    field_id: base_field.field_id,
                });
            }

            if let Some(base_values) = &base_field.enum_values {
                let cand_values = cand_field.enum_values.as_deref().unwrap_or(&[]);
                for v in base_values {
                    if !cand_values.contains(v) {
                        violations.push(BreakingChange::EnumValueRemoved {
                            type_id: base_type.type_id,
                            field_id: base_field.field_id,
                            value: v.clone(),
                        });
                    }
                }
            }

            if !base_field.required && cand_field.required {
                violations.push(BreakingChange::FieldBecameRequired {
                    type_id: base_type.type_id,
                    field_id: base_field.field_id,
                });
            }
        }
    }

    for base_edge in &baseline.edge_types {
        if candidate.edge_type(base_edge.edge_id).is_none() {
            violations.push(BreakingChange::EdgeTypeRemoved(base_edge.edge_id));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entdb_types::{FieldDef, FieldKind, NodeType};

    fn base() -> Schema {
        Schema {
            node_types: vec![NodeType {
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
                        default: None,
                        enum_values: Some(vec!["active".to_string()]),
                        deprecated: false,
                    },
                ],
                deprecated: false,
                default_acl: Vec::new(),
            }],
            edge_types: Vec::new(),
        }
    }

    #[test]
    fn adding_a_field_is_compatible() {
        let mut candidate = base();
        candidate.node_types[0].fields.push(FieldDef {
            field_id: FieldId(3),
            name: "name".to_string(),
            kind: FieldKind::String,
            required: false,
            default: None,
            enum_values: None,
            deprecated: false,
        });
        assert!(check_compatibility(&base(), &candidate).is_ok());
    }

    #[test]
    fn adding_an_enum_value_is_compatible() {
        let mut candidate = base();
        candidate.node_types[0].fields[1].enum_values =
            Some(vec!["active".to_string(), "inactive".to_string()]);
        assert!(check_compatibility(&base(), &candidate).is_ok());
    }

    #[test]
    fn renaming_a_field_by_id_is_compatible() {
        let mut candidate = base();
        candidate.node_types[0].fields[0].name = "email_address".to_string();
        assert!(check_compatibility(&base(), &candidate).is_ok());
    }

    #[test]
    fn removing_a_field_is_rejected() {
        let mut candidate = base();
        candidate.node_types[0].fields.remove(1);
        let errs = check_compatibility(&base(), &candidate).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, BreakingChange::FieldRemoved { .. })));
    }

    #[test]
    fn changing_a_field_kind_is_rejected() {
        let mut candidate = base();
        candidate.node_types[0].fields[0].kind = FieldKind::Int64;
        let errs = check_compatibility(&base(), &candidate).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, BreakingChange::FieldKindChanged { .. })));
    }

    #[test]
    fn removing_an_enum_value_is_rejected() {
        let mut candidate = base();
        candidate.node_types[0].fields[1].enum_values = Some(vec![]);
        let errs = check_compatibility(&base(), &candidate).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, BreakingChange::EnumValueRemoved { .. })));
    }

    #[test]
    fn making_an_optional_field_required_is_rejected() {
        let mut candidate = base();
        candidate.node_types[0].fields[1].required = true;
        let errs = check_compatibility(&base(), &candidate).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, BreakingChange::FieldBecameRequired { .. })));
    }

    #[test]
    fn removing_a_type_is_rejected() {
        let candidate = Schema::default();
        let errs = check_compatibility(&base(), &candidate).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, BreakingChange::TypeRemoved(_))));
    }
}
