//! Persistence layer for the stack's actual state: a single JSON blob plus
//! advisory file locking (§4.B).

mod lock;
mod store;

pub use lock::FileLock;
pub use store::FileStateStore;

use crate::error::{DrftError, Result};
use crate::resource::ResourceState;
use crate::serializer::{FieldMapper, TypeRegistry};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const STATE_VERSION: &str = "1.0";

/// The persisted State (§3/§6): a format-version tag, the stack name, and
/// an id-keyed mapping with no preserved ordering.
#[derive(Debug, Clone)]
pub struct State {
    pub version: String,
    pub stack: String,
    pub resources: HashMap<String, ResourceState>,
    pub metadata: Map<String, Value>,
}

impl State {
    pub fn empty(stack: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            stack: stack.into(),
            resources: HashMap::new(),
            metadata: Map::new(),
        }
    }

    pub fn encode(&self) -> Result<Value> {
        let mut resources = Map::new();
        for (id, state) in &self.resources {
            resources.insert(id.clone(), state.encode()?);
        }
        let mut obj = Map::new();
        obj.insert("version".to_string(), Value::String(self.version.clone()));
        obj.insert("stack".to_string(), Value::String(self.stack.clone()));
        obj.insert("resources".to_string(), Value::Object(resources));
        obj.insert("metadata".to_string(), Value::Object(self.metadata.clone()));
        Ok(Value::Object(obj))
    }

    pub fn decode(value: &Value, registry: &TypeRegistry, mapper: Option<&FieldMapper>) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| DrftError::state("malformed state file: expected a JSON object"))?;
        let version = obj
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or(STATE_VERSION)
            .to_string();
        let stack = obj
            .get("stack")
            .and_then(Value::as_str)
            .ok_or_else(|| DrftError::state("malformed state file: missing 'stack'"))?
            .to_string();
        let mut resources = HashMap::new();
        if let Some(Value::Object(map)) = obj.get("resources") {
            for (id, rv) in map {
                let state = ResourceState::decode(rv, registry, mapper)
                    .map_err(|e| DrftError::state(format!("malformed state for resource '{id}': {e}")))?;
                resources.insert(id.clone(), state);
            }
        }
        let metadata = obj
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Ok(State {
            version,
            stack,
            resources,
            metadata,
        })
    }
}
