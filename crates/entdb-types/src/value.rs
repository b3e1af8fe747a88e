//! Tagged payload value, per the re-architecture note in spec.md §9
//! ("Dynamic payloads and late binding"): every field value is one of a
//! fixed, closed set of kinds with a single canonical encoding, rather than
//! a dynamically typed object graph.

use crate::ids::{NodeId, TypeId};
use serde::{Deserialize, Serialize};

/// A single field value. Mirrors [`crate::schema::FieldKind`] one-to-one —
/// every `FieldKind` has exactly one matching `Value` variant, which is what
/// makes schema validation a pure function over `(NodeType, payload)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Value {
    /// UTF-8 string.
    Str(String),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Milliseconds since the Unix epoch.
    TsMs(i64),
    /// Enum value, validated against the field's `enum_values` at schema
    /// validation time.
    Enum(String),
    /// List of strings.
    ListStr(Vec<String>),
    /// List of 64-bit integers.
    ListInt(Vec<i64>),
    /// Reference to another node. `type_id` must resolve in the live
    /// schema; existence of `id` is checked only best-effort at
    /// coordination time (spec.md §4.3 step 5) and authoritatively at
    /// apply time (spec.md §3 invariant 2).
    Ref {
        /// Referenced node's declared type.
        type_id: TypeId,
        /// Referenced node id.
        id: NodeId,
    },
}

impl Value {
    /// Name of this value's kind, used in validation error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "int64",
            Value::Float(_) => "float64",
            Value::Bool(_) => "bool",
            Value::TsMs(_) => "timestamp_ms",
            Value::Enum(_) => "enum",
            Value::ListStr(_) => "list<string>",
            Value::ListInt(_) => "list<int64>",
            Value::Ref { .. } => "ref",
        }
    }
}
