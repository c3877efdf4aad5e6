//! Common test fixtures and helpers
//!
//! Usage in test files:
//! ```ignore
//! mod common;
//! use common::record;
//! ```

use fuzzylink::Store;
use serde_json::{json, Map, Value};

/// Build a single-field record `{id_col: id, "value": value}`.
pub fn value_record(id_col: &str, id: &str, value: &str) -> Map<String, Value> {
    json!({ id_col: id, "value": value })
        .as_object()
        .unwrap()
        .clone()
}

/// Build a `{uid, first_name, surname}` record, skipping a field when its
/// value is `None`.
pub fn person(uid: &str, first_name: Option<&str>, surname: Option<&str>) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("uid".to_string(), Value::String(uid.to_string()));
    if let Some(v) = first_name {
        fields.insert("first_name".to_string(), Value::String(v.to_string()));
    }
    if let Some(v) = surname {
        fields.insert("surname".to_string(), Value::String(v.to_string()));
    }
    fields
}

/// An in-memory store, freshly created, for tests that don't need to
/// reopen a file-backed handle.
pub fn in_memory_store() -> Store {
    Store::open_or_create(None, vec![], None).expect("failed to create in-memory store")
}
