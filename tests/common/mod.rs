use async_trait::async_trait;
use drft::error::{DrftError, Result};
use drft::provider::Provider;
use drft::resource::{Resource, ResourceState};
use drft::serializer::{Record, TypeRegistry};
use serde_json::{json, Map, Value};
use std::any::Any;
use std::collections::HashSet;
use std::sync::Mutex;

pub const WIDGET_TYPE: &str = "fixtures.Widget";

#[derive(Debug, Clone)]
pub struct Widget {
    pub name: String,
}

impl Record for Widget {
    fn type_tag(&self) -> &'static str {
        WIDGET_TYPE
    }
    fn encode_fields(&self) -> Result<Map<String, Value>> {
        let mut m = Map::new();
        m.insert("name".to_string(), json!(self.name));
        Ok(m)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn registry() -> TypeRegistry {
    let mut r = TypeRegistry::new();
    r.register::<Widget, _>(WIDGET_TYPE, |fields, _reg, _mapper| {
        let name = drft::serializer::require_str(fields, "name")?.to_string();
        Ok(Widget { name })
    });
    r
}

/// An in-memory provider whose per-id failures are configurable, used to
/// exercise the executor's all-or-nothing commit behavior.
#[derive(Default)]
pub struct FakeProvider {
    pub fail_on: Mutex<HashSet<String>>,
    pub existing_externally: Mutex<HashSet<String>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, id: &str) {
        self.fail_on.lock().unwrap().insert(id.to_string());
    }

    pub fn seed_external(&self, id: &str) {
        self.existing_externally.lock().unwrap().insert(id.to_string());
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }
    fn version(&self) -> &str {
        "1.0"
    }
    fn can_handle(&self, resource: &Resource) -> bool {
        resource.record.type_tag() == WIDGET_TYPE
    }
    async fn create(&self, resource: &Resource) -> Result<ResourceState> {
        if self.fail_on.lock().unwrap().contains(&resource.id) {
            return Err(DrftError::provider(&resource.id, anyhow::anyhow!("injected failure")));
        }
        Ok(ResourceState::new(resource.clone()))
    }
    async fn read(&self, resource: &Resource) -> Result<ResourceState> {
        if !self.existing_externally.lock().unwrap().contains(&resource.id) {
            return Err(DrftError::ResourceNotFound(resource.id.clone()));
        }
        Ok(ResourceState::new(resource.clone()))
    }
    async fn update(&self, _current: &ResourceState, desired: &Resource) -> Result<ResourceState> {
        if self.fail_on.lock().unwrap().contains(&desired.id) {
            return Err(DrftError::provider(&desired.id, anyhow::anyhow!("injected failure")));
        }
        Ok(ResourceState::new(desired.clone()))
    }
    async fn delete(&self, current: &ResourceState) -> Result<()> {
        if self.fail_on.lock().unwrap().contains(&current.resource.id) {
            return Err(DrftError::provider(&current.resource.id, anyhow::anyhow!("injected failure")));
        }
        Ok(())
    }
}
