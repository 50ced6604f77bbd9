//! The data model: `Resource`, `ResourceState`, `DependentResource`, and the
//! `Stack` they compose into. See §3.

use crate::error::{DrftError, Result};
use crate::serializer::{decode_ids, require_str, FieldMapper, Record, TypeRegistry};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An immutable record keyed by a user-supplied id, carrying a list of
/// direct dependency ids and a boxed attribute record. Equality for
/// planning purposes is structural on the record alone — `id` and
/// `dependencies` are metadata, not attributes (§3).
#[derive(Clone)]
pub struct Resource {
    pub id: String,
    pub dependencies: Vec<String>,
    pub read_only: bool,
    pub record: Arc<dyn Record>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("read_only", &self.read_only)
            .field("type", &self.record.type_tag())
            .finish()
    }
}

impl Resource {
    pub fn new(id: impl Into<String>, dependencies: Vec<String>, record: Arc<dyn Record>) -> Self {
        Self {
            id: id.into(),
            dependencies,
            read_only: false,
            record,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Structural equality on attribute fields only, per §3: same concrete
    /// type and equal attribute fields. Used by the planner's diff (§4.D)
    /// and by invariant 6 (round-trip serialization).
    pub fn attributes_eq(&self, other: &Resource) -> Result<bool> {
        if self.record.type_tag() != other.record.type_tag() {
            return Ok(false);
        }
        Ok(self.record.encode_fields()? == other.record.encode_fields()?)
    }

    /// Encode to the canonical Resource JSON: `.type`, `id`, `dependencies`,
    /// plus one entry per user-declared attribute (§6).
    pub fn encode(&self) -> Result<Value> {
        let mut fields = self.record.encode_fields()?;
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        fields.insert(
            "dependencies".to_string(),
            Value::Array(self.dependencies.iter().cloned().map(Value::String).collect()),
        );
        fields.insert(
            ".type".to_string(),
            Value::String(self.record.type_tag().to_string()),
        );
        Ok(Value::Object(fields))
    }

    /// Decode a Resource JSON value. `read_only` is never persisted (it is
    /// a property of how the desired stack was authored, not of realized
    /// state), so decoded resources are never read-only.
    pub fn decode(value: &Value, registry: &TypeRegistry, mapper: Option<&FieldMapper>) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| DrftError::Validation("expected a Resource JSON object".into()))?;
        let id = require_str(obj, "id")?.to_string();
        let dependencies = decode_ids(obj, "dependencies")?;
        let record = registry.decode(value, mapper)?;
        Ok(Resource {
            id,
            dependencies,
            read_only: false,
            record,
        })
    }
}

/// A pure builder over dependency states, per §3/§9's `LateBound` encoding
/// of `Either<Concrete, LateBound>`.
pub type Builder =
    Arc<dyn Fn(&HashMap<String, ResourceState>) -> anyhow::Result<Resource> + Send + Sync>;

/// A resource whose final form depends on outputs of its dependencies.
/// Never executed directly: the planner and executor materialize it into
/// a concrete `Resource` once dependency states are known (§3).
#[derive(Clone)]
pub struct LateBound {
    pub id: String,
    pub dependencies: Vec<String>,
    pub read_only: bool,
    pub builder: Builder,
}

impl fmt::Debug for LateBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LateBound")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

impl LateBound {
    pub fn new(
        id: impl Into<String>,
        dependencies: Vec<String>,
        builder: impl Fn(&HashMap<String, ResourceState>) -> anyhow::Result<Resource> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            dependencies,
            read_only: false,
            builder: Arc::new(builder),
        }
    }

    /// Attempt to build the concrete resource from already-realized states.
    /// Builder failure is not fatal at plan time — the wrapper is kept and
    /// binding deferred to execution (§4.D "Late-binding equality").
    pub fn build(&self, states: &HashMap<String, ResourceState>) -> anyhow::Result<Resource> {
        (self.builder)(states)
    }
}

/// Either a fully-specified resource or one awaiting dependency outputs.
/// This is the `Either<Concrete, LateBound>` sum named in §9.
#[derive(Clone, Debug)]
pub enum ResourceNode {
    Concrete(Resource),
    Late(LateBound),
}

impl ResourceNode {
    pub fn id(&self) -> &str {
        match self {
            ResourceNode::Concrete(r) => &r.id,
            ResourceNode::Late(l) => &l.id,
        }
    }

    pub fn dependencies(&self) -> &[String] {
        match self {
            ResourceNode::Concrete(r) => &r.dependencies,
            ResourceNode::Late(l) => &l.dependencies,
        }
    }

    pub fn is_read_only(&self) -> bool {
        match self {
            ResourceNode::Concrete(r) => r.read_only,
            ResourceNode::Late(l) => l.read_only,
        }
    }

    /// All dependencies already present among `states` — the condition
    /// under which the planner synthesizes a `Late` node immediately
    /// rather than deferring to execution (§4.D step 2).
    pub fn dependencies_ready(&self, states: &HashMap<String, ResourceState>) -> bool {
        self.dependencies().iter().all(|d| states.contains_key(d))
    }
}

/// The record produced by a provider for a realized resource: the resource
/// as actually realized, plus optional read-only outputs (§3). This is the
/// sole surface downstream `LateBound` builders may read.
#[derive(Clone, Debug)]
pub struct ResourceState {
    /// The concrete state-record type tag, or `None` when this is the
    /// fallback base shape (§4.A "Fallback").
    pub state_type: Option<String>,
    pub resource: Resource,
    pub outputs: Map<String, Value>,
}

impl ResourceState {
    pub fn new(resource: Resource) -> Self {
        Self {
            state_type: None,
            resource,
            outputs: Map::new(),
        }
    }

    pub fn with_outputs(resource: Resource, state_type: impl Into<String>, outputs: Map<String, Value>) -> Self {
        Self {
            state_type: Some(state_type.into()),
            resource,
            outputs,
        }
    }

    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key)
    }

    /// Encode per §6: `.type`, `resource` (the fully tagged Resource JSON),
    /// and any additional fields as read-only outputs.
    pub fn encode(&self) -> Result<Value> {
        let mut obj = self.outputs.clone();
        obj.insert("resource".to_string(), self.resource.encode()?);
        obj.insert(
            ".type".to_string(),
            Value::String(
                self.state_type
                    .clone()
                    .unwrap_or_else(|| "drft.ResourceState".to_string()),
            ),
        );
        Ok(Value::Object(obj))
    }

    /// Decode per §4.A's fallback contract: if `.type` isn't recognized by
    /// the registry, still construct the base shape by pulling out
    /// `resource` and treating everything else as opaque outputs.
    pub fn decode(value: &Value, registry: &TypeRegistry, mapper: Option<&FieldMapper>) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| DrftError::Validation("expected a ResourceState JSON object".into()))?;
        let resource_json = obj
            .get("resource")
            .ok_or_else(|| DrftError::Validation("field 'resource' missing".into()))?;
        let resource = Resource::decode(resource_json, registry, mapper)?;

        let tag = obj.get(".type").and_then(Value::as_str);
        let state_type = match tag {
            Some(t) if registry.knows_tag(t) => Some(t.to_string()),
            Some(t) => {
                tracing::warn!(tag = t, "unresolvable state type tag, falling back to base shape");
                None
            }
            None => None,
        };

        let mut outputs = obj.clone();
        outputs.remove("resource");
        outputs.remove(".type");

        Ok(ResourceState {
            state_type,
            resource,
            outputs,
        })
    }
}
