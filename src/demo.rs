//! A minimal filesystem-backed provider and manifest format used only by
//! the CLI binary, so the engine is verifiably drivable end-to-end without
//! a real external system wired in (concrete providers are out of scope
//! for the library itself, §1).

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use drft::error::{DrftError, Result};
use drft::provider::Provider;
use drft::resource::{Resource, ResourceNode, ResourceState};
use drft::serializer::{Record, TypeRegistry};
use serde_json::{Map, Value};
use std::any::Any;
use std::fs;
use std::path::PathBuf;

pub const KV_TYPE: &str = "drft.Kv";

/// A generic key-value resource record: its attributes are exactly the
/// manifest-declared fields, with no fixed schema.
#[derive(Debug, Clone)]
pub struct Kv {
    pub attributes: Map<String, Value>,
}

impl Record for Kv {
    fn type_tag(&self) -> &'static str {
        KV_TYPE
    }

    fn encode_fields(&self) -> Result<Map<String, Value>> {
        Ok(self.attributes.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn register(registry: &mut TypeRegistry) {
    registry.register::<Kv, _>(KV_TYPE, |fields, _registry, _mapper| {
        let mut attributes = fields.clone();
        attributes.remove(".type");
        attributes.remove("id");
        attributes.remove("dependencies");
        Ok(Kv { attributes })
    });
}

/// Stores each resource's attributes as a JSON file under
/// `<root>/objects/<id>.json`, standing in for a real external system.
pub struct FileProvider {
    root: PathBuf,
}

impl FileProvider {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, id: &str) -> PathBuf {
        self.root.join("objects").join(format!("{id}.json"))
    }
}

#[async_trait]
impl Provider for FileProvider {
    fn name(&self) -> &str {
        "file"
    }

    fn version(&self) -> &str {
        "1.0"
    }

    fn can_handle(&self, resource: &Resource) -> bool {
        resource.record.type_tag() == KV_TYPE
    }

    async fn create(&self, resource: &Resource) -> Result<ResourceState> {
        self.write(resource).await
    }

    async fn read(&self, resource: &Resource) -> Result<ResourceState> {
        let path = self.object_path(&resource.id);
        if !path.exists() {
            return Err(DrftError::ResourceNotFound(resource.id.clone()));
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| DrftError::provider(&resource.id, anyhow::Error::new(e)))?;
        let attributes: Map<String, Value> = serde_json::from_str(&raw)
            .map_err(|e| DrftError::provider(&resource.id, anyhow::Error::new(e)))?;
        let realized = Resource::new(resource.id.clone(), resource.dependencies.clone(), std::sync::Arc::new(Kv { attributes }));
        Ok(ResourceState::with_outputs(realized, KV_TYPE, Map::new()))
    }

    async fn update(&self, _current: &ResourceState, desired: &Resource) -> Result<ResourceState> {
        self.write(desired).await
    }

    async fn delete(&self, current: &ResourceState) -> Result<()> {
        let path = self.object_path(&current.resource.id);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| DrftError::provider(&current.resource.id, anyhow::Error::new(e)))?;
        }
        Ok(())
    }
}

impl FileProvider {
    async fn write(&self, resource: &Resource) -> Result<ResourceState> {
        let path = self.object_path(&resource.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| DrftError::provider(&resource.id, anyhow::Error::new(e)))?;
        }
        let fields = resource.record.encode_fields()?;
        let pretty = serde_json::to_string_pretty(&fields)
            .map_err(|e| DrftError::provider(&resource.id, anyhow::Error::new(e)))?;
        fs::write(&path, pretty).map_err(|e| DrftError::provider(&resource.id, anyhow::Error::new(e)))?;
        Ok(ResourceState::with_outputs(resource.clone(), KV_TYPE, Map::new()))
    }
}

/// A manifest resource declaration — the JSON shape the CLI reads from the
/// stack definition file.
#[derive(Debug, serde::Deserialize)]
struct ManifestResource {
    id: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    read_only: bool,
    #[serde(default)]
    attributes: Map<String, Value>,
}

#[derive(Debug, serde::Deserialize)]
struct Manifest {
    #[serde(default = "default_stack_name")]
    stack: String,
    #[serde(default)]
    resources: Vec<ManifestResource>,
}

fn default_stack_name() -> String {
    "default".to_string()
}

pub struct LoadedManifest {
    pub stack_name: String,
    pub resources: Vec<ResourceNode>,
}

pub fn load_manifest(path: &std::path::Path) -> AnyResult<LoadedManifest> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest at {}", path.display()))?;
    let manifest: Manifest = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse manifest at {}", path.display()))?;

    let resources = manifest
        .resources
        .into_iter()
        .map(|r| {
            let mut resource = Resource::new(r.id, r.dependencies, std::sync::Arc::new(Kv { attributes: r.attributes }));
            if r.read_only {
                resource = resource.read_only();
            }
            ResourceNode::Concrete(resource)
        })
        .collect();

    Ok(LoadedManifest {
        stack_name: manifest.stack,
        resources,
    })
}
