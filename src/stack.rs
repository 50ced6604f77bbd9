//! `Stack`: the top-level unit a user assembles — name, providers, desired
//! resources, and a bound state store (§3).

use crate::error::Result;
use crate::executor::{self, ExecutionReport};
use crate::planner::{self, Plan};
use crate::provider::Provider;
use crate::resource::ResourceNode;
use crate::serializer::{FieldMapper, TypeRegistry};
use crate::state::{FileStateStore, State};
use std::sync::Arc;

pub struct Stack {
    pub name: String,
    pub providers: Vec<Arc<dyn Provider>>,
    pub resources: Vec<ResourceNode>,
    pub store: FileStateStore,
}

impl Stack {
    pub fn new(name: impl Into<String>, store: FileStateStore) -> Self {
        Self {
            name: name.into(),
            providers: Vec::new(),
            resources: Vec::new(),
            store,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_resource(mut self, resource: ResourceNode) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn plan(
        &self,
        registry: &TypeRegistry,
        mapper: Option<&FieldMapper>,
        verbose: bool,
    ) -> Result<Plan> {
        let actual = self.store.load(registry, mapper)?;
        planner::build_plan(&self.resources, &actual.resources, verbose)
    }

    pub async fn apply(
        &self,
        plan: &Plan,
        registry: &TypeRegistry,
        mapper: Option<&FieldMapper<'_>>,
    ) -> Result<ExecutionReport> {
        executor::execute(&self.name, &self.resources, plan, &self.providers, &self.store, registry, mapper).await
    }

    /// Re-read every resource currently in state from its provider and
    /// persist the refreshed shape. Does not mutate external systems and
    /// never issues create/update/delete (§4.F non-goals).
    pub async fn refresh(&self, registry: &TypeRegistry, mapper: Option<&FieldMapper<'_>>) -> Result<State> {
        for provider in &self.providers {
            provider.initialize().await?;
        }

        let current = self.store.load(registry, mapper)?;
        let mut refreshed = current.clone();
        let result = self.refresh_inner(&current, &mut refreshed).await;

        // Guaranteed-release pattern: dispose runs even when reads fail.
        for provider in &self.providers {
            let _ = provider.dispose().await;
        }

        result?;
        self.store.save(&refreshed)?;
        Ok(refreshed)
    }

    async fn refresh_inner(&self, current: &State, refreshed: &mut State) -> Result<()> {
        for (id, state) in &current.resources {
            let provider = self
                .providers
                .iter()
                .find(|p| p.can_handle(&state.resource))
                .ok_or_else(|| crate::error::DrftError::ProviderNotFound(id.clone()))?;
            let fresh = provider.read(&state.resource).await?;
            refreshed.resources.insert(id.clone(), fresh);
        }
        Ok(())
    }
}
