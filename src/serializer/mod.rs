//! Canonical tagged-JSON encoding for arbitrary user-defined records, without
//! code generation. A `TypeRegistry` plays the role reflection plays in a
//! dynamically-typed source: each record type registers its own decoder once
//! (at construction time) instead of the serializer discovering fields at
//! runtime.

mod registry;

pub use registry::{FieldMapper, TypeRegistry};

use crate::error::{DrftError, Result};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// The `.type` tag under which every encoded record is keyed.
pub const TYPE_FIELD: &str = ".type";

/// A record that knows how to turn itself into canonical fields.
///
/// Implementors provide `type_tag` (the string recorded under `.type`) and
/// `encode_fields` (one entry per non-private instance field, values already
/// recursively encoded to `Value`). Decoding is supplied separately to the
/// registry at registration time, since Rust has no generic "default
/// constructor taking field names" to call into at runtime.
pub trait Record: Any + Send + Sync + Debug {
    fn type_tag(&self) -> &'static str;
    fn encode_fields(&self) -> Result<Map<String, Value>>;
    fn as_any(&self) -> &dyn Any;
}

/// Encode a record to its canonical tagged-JSON form using a fresh cycle
/// guard. Use [`TypeRegistry::encode_nested`] from inside a `Record` impl
/// that itself holds nested records, so the guard is shared across the
/// whole graph.
pub fn encode(registry: &TypeRegistry, record: &Arc<dyn Record>) -> Result<Value> {
    registry.encode(record)
}

pub fn decode(
    registry: &TypeRegistry,
    value: &Value,
    mapper: Option<&FieldMapper>,
) -> Result<Arc<dyn Record>> {
    registry.decode(value, mapper)
}

/// Read a required string field, surfacing the offending field name on
/// failure per §4.A's error contract.
pub fn require_str<'a>(fields: &'a Map<String, Value>, name: &str) -> Result<&'a str> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| DrftError::Validation(format!("field '{name}' missing or not a string")))
}

pub fn require_array<'a>(fields: &'a Map<String, Value>, name: &str) -> Result<&'a Vec<Value>> {
    fields
        .get(name)
        .and_then(Value::as_array)
        .ok_or_else(|| DrftError::Validation(format!("field '{name}' missing or not an array")))
}

/// Decode a `dependencies` field (an array of id strings) into owned strings.
/// This is the un-mapped form; callers that need live resource references
/// apply a [`FieldMapper`] instead (see `planner`/`executor`).
pub fn decode_ids(fields: &Map<String, Value>, name: &str) -> Result<Vec<String>> {
    let arr = fields.get(name).and_then(Value::as_array).cloned().unwrap_or_default();
    arr.into_iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| DrftError::Validation(format!("field '{name}' must be an array of strings")))
        })
        .collect()
}
