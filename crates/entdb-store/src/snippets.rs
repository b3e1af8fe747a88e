//! Registered snippet extractors for mailbox items (spec.md §4.5:
//! "`snippet` extracted via a registered snippet extractor for the type").
//!
//! Generalizes `toka_kernel::registry`'s global, lazily-initialized
//! `RwLock<HashMap<_>>` pattern from opcode handlers to per-type snippet
//! functions; the default extractor applies to any type with no
//! registered override.

use entdb_types::{TypeId, Value};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A snippet extractor: given a node's expanded payload, produce the text
/// stored in `items.snippet` and indexed by `items_fts`.
pub type SnippetExtractor = Arc<dyn Fn(&HashMap<String, Value>) -> String + Send + Sync>;

static REGISTRY: Lazy<RwLock<HashMap<TypeId, SnippetExtractor>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a snippet extractor for `type_id`, overriding any previous
/// registration.
pub fn register(type_id: TypeId, extractor: SnippetExtractor) {
    REGISTRY
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .insert(type_id, extractor);
}

/// Extract a snippet for `type_id`'s `payload`, falling back to the
/// default best-effort first-string-field extractor if nothing is
/// registered.
pub fn extract(type_id: TypeId, payload: &HashMap<String, Value>) -> String {
    let registry = REGISTRY.read().unwrap_or_else(|e| e.into_inner());
    match registry.get(&type_id) {
        Some(f) => f(payload),
        None => default_extractor(payload),
    }
}

/// Default snippet extractor: the first string-valued field in iteration
/// order, or an empty string if the payload has none.
fn default_extractor(payload: &HashMap<String, Value>) -> String {
    payload
        .values()
        .find_map(|v| match v {
            Value::Str(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_extractor_picks_first_string_field() {
        let mut payload = HashMap::new();
        payload.insert("age".to_string(), Value::Int(30));
        payload.insert("name".to_string(), Value::Str("Ada".to_string()));
        let snippet = extract(TypeId(999), &payload);
        assert_eq!(snippet, "Ada");
    }

    #[test]
    fn registered_extractor_overrides_default() {
        let type_id = TypeId(42);
        register(
            type_id,
            Arc::new(|payload: &HashMap<String, Value>| {
                payload
                    .get("title")
                    .map(|v| format!("custom:{v:?}"))
                    .unwrap_or_default()
            }),
        );
        let mut payload = HashMap::new();
        payload.insert("title".to_string(), Value::Str("hello".to_string()));
        let snippet = extract(type_id, &payload);
        assert!(snippet.starts_with("custom:"));
    }
}
