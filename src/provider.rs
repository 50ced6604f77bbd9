//! The provider contract (§4.F): adapters implementing CRUD for a family
//! of resource types against some external system. Concrete providers for
//! real external systems are out of scope for this crate (§1); only the
//! trait is specified here.

use crate::error::Result;
use crate::resource::{Resource, ResourceState};
use async_trait::async_trait;

/// Adapter implementing CRUD for a family of resource types. A provider
/// encodes its own per-type routing internally — one provider can handle
/// several concrete resource types by switching on the record inside each
/// method.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;

    /// Default routing is by static resource type; providers that need
    /// finer matching (e.g. by attribute value) can override this.
    fn can_handle(&self, resource: &Resource) -> bool;

    /// Providers are shared across concurrent callers via `Arc<dyn
    /// Provider>`, so lifecycle hooks take `&self`; implementations that
    /// need mutable internal state manage it behind their own interior
    /// mutability (`Mutex`, `OnceCell`, etc.), the way the engine's own
    /// `FileStateStore` guards its lock.
    async fn configure(&self, _settings: &serde_json::Map<String, serde_json::Value>) -> Result<()> {
        Ok(())
    }

    /// Idempotent: called once per provider at the start of a refresh;
    /// providers used during apply initialize lazily on first use (§5).
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }

    async fn create(&self, resource: &Resource) -> Result<ResourceState>;

    /// Fails with `ResourceNotFound` if the external object does not
    /// exist.
    async fn read(&self, resource: &Resource) -> Result<ResourceState>;

    async fn update(&self, current: &ResourceState, desired: &Resource) -> Result<ResourceState>;

    async fn delete(&self, current: &ResourceState) -> Result<()>;
}
