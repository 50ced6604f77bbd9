//! Drive a plan through providers, handling late binding at execution
//! time and producing a new state (§4.E).

use crate::error::{DrftError, Result};
use crate::planner::{OperationKind, Plan, READ_ONLY_MARKER};
use crate::provider::Provider;
use crate::resource::{Resource, ResourceNode, ResourceState};
use crate::state::{FileStateStore, State};
use crate::serializer::{FieldMapper, TypeRegistry};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct OperationResult {
    pub kind: OperationKind,
    pub id: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub results: Vec<OperationResult>,
    /// Whether the working state was persisted. False whenever any
    /// operation failed — the all-or-nothing commit rule (§4.E step 5).
    pub committed: bool,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

fn find_provider<'a>(providers: &'a [Arc<dyn Provider>], resource: &Resource) -> Result<&'a Arc<dyn Provider>> {
    providers
        .iter()
        .find(|p| p.can_handle(resource))
        .ok_or_else(|| DrftError::ProviderNotFound(resource.id.clone()))
}

/// Execute `plan` against `providers`, persisting the result through
/// `store` under its advisory lock. `desired` supplies the read-only
/// resources the prepass must observe, and `stack_name` is recorded in
/// the persisted state.
pub async fn execute(
    stack_name: &str,
    desired: &[ResourceNode],
    plan: &Plan,
    providers: &[Arc<dyn Provider>],
    store: &FileStateStore,
    registry: &TypeRegistry,
    mapper: Option<&FieldMapper<'_>>,
) -> Result<ExecutionReport> {
    let lock = store.lock()?;
    let outcome = run(stack_name, desired, plan, providers, store, registry, mapper).await;
    lock.release();
    outcome
}

async fn run(
    stack_name: &str,
    desired: &[ResourceNode],
    plan: &Plan,
    providers: &[Arc<dyn Provider>],
    store: &FileStateStore,
    registry: &TypeRegistry,
    mapper: Option<&FieldMapper<'_>>,
) -> Result<ExecutionReport> {
    let current = store.load(registry, mapper)?;
    let mut working = current.resources;

    read_only_prepass(desired, providers, &mut working).await?;

    let mut results = Vec::with_capacity(plan.operations.len());
    let mut any_failed = false;
    let mut deleted: HashSet<String> = HashSet::new();

    for op in &plan.operations {
        match op.kind {
            OperationKind::Create | OperationKind::Update => {
                let node = op
                    .node
                    .as_ref()
                    .expect("planner always attaches a node to create/update operations");
                let resource = match node {
                    ResourceNode::Concrete(r) => r.clone(),
                    ResourceNode::Late(late) => late.build(&working).map_err(|e| {
                        DrftError::Validation(format!(
                            "failed to materialize dependent resource '{}': {e}",
                            op.id
                        ))
                    })?,
                };
                let provider = find_provider(providers, &resource)?;

                let call = if op.kind == OperationKind::Create {
                    provider.create(&resource).await
                } else {
                    let prior = working
                        .get(&op.id)
                        .cloned()
                        .expect("DAG invariant: update target already present in working map");
                    provider.update(&prior, &resource).await
                };

                match call {
                    Ok(new_state) => {
                        working.insert(op.id.clone(), new_state);
                        results.push(OperationResult {
                            kind: op.kind,
                            id: op.id.clone(),
                            success: true,
                            error: None,
                        });
                    }
                    // A fatal error kind (§7's propagation table) aborts the
                    // whole run immediately rather than being recorded as a
                    // single failed operation among others that still run.
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        any_failed = true;
                        results.push(OperationResult {
                            kind: op.kind,
                            id: op.id.clone(),
                            success: false,
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
            OperationKind::Delete => {
                let current_state = working
                    .get(&op.id)
                    .cloned()
                    .expect("DAG invariant: delete target already present in working map");
                let provider = find_provider(providers, &current_state.resource)?;
                match provider.delete(&current_state).await {
                    Ok(()) => {
                        deleted.insert(op.id.clone());
                        results.push(OperationResult {
                            kind: op.kind,
                            id: op.id.clone(),
                            success: true,
                            error: None,
                        });
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        any_failed = true;
                        results.push(OperationResult {
                            kind: op.kind,
                            id: op.id.clone(),
                            success: false,
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
        }
    }

    if any_failed {
        tracing::warn!(stack = stack_name, "apply failed, discarding working state");
        return Ok(ExecutionReport {
            results,
            committed: false,
        });
    }

    for id in &deleted {
        working.remove(id);
    }
    let new_state = State {
        version: crate::state::STATE_VERSION.to_string(),
        stack: stack_name.to_string(),
        resources: working,
        metadata: current.metadata,
    };
    store.save(&new_state)?;
    Ok(ExecutionReport {
        results,
        committed: true,
    })
}

async fn read_only_prepass(
    desired: &[ResourceNode],
    providers: &[Arc<dyn Provider>],
    working: &mut std::collections::HashMap<String, ResourceState>,
) -> Result<()> {
    for node in desired {
        if !node.is_read_only() || working.contains_key(node.id()) {
            continue;
        }
        let ResourceNode::Concrete(resource) = node else {
            continue;
        };
        let provider = find_provider(providers, resource)?;
        let mut state = provider.read(resource).await.map_err(|e| {
            DrftError::Validation(format!("read-only resource '{}' not found: {e}", resource.id))
        })?;
        state.outputs.insert(READ_ONLY_MARKER.to_string(), Value::Bool(true));
        working.insert(resource.id.clone(), state);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::build_plan;
    use crate::resource::LateBound;
    use crate::serializer::Record;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::any::Any;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Debug, Clone)]
    struct Bundle {
        name: String,
    }
    impl Record for Bundle {
        fn type_tag(&self) -> &'static str {
            "test.Bundle"
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

    #[derive(Debug, Clone)]
    struct Profile {
        bundle_id: String,
    }
    impl Record for Profile {
        fn type_tag(&self) -> &'static str {
            "test.Profile"
        }
        fn encode_fields(&self) -> Result<Map<String, Value>> {
            let mut m = Map::new();
            m.insert("bundle_id".to_string(), json!(self.bundle_id));
            Ok(m)
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct MockProvider {
        created: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }
        fn version(&self) -> &str {
            "1.0"
        }
        fn can_handle(&self, resource: &Resource) -> bool {
            resource.record.type_tag() == "test.Bundle" || resource.record.type_tag() == "test.Profile"
        }
        async fn create(&self, resource: &Resource) -> Result<ResourceState> {
            self.created.lock().unwrap().push(resource.id.clone());
            let mut outputs = Map::new();
            if resource.record.type_tag() == "test.Bundle" {
                outputs.insert("bundle_id".to_string(), json!(format!("com.example.{}", resource.id)));
            }
            Ok(ResourceState::with_outputs(resource.clone(), resource.record.type_tag(), outputs))
        }
        async fn read(&self, resource: &Resource) -> Result<ResourceState> {
            Ok(ResourceState::new(resource.clone()))
        }
        async fn update(&self, _current: &ResourceState, desired: &Resource) -> Result<ResourceState> {
            Ok(ResourceState::new(desired.clone()))
        }
        async fn delete(&self, _current: &ResourceState) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn s5_dependent_resource_materialization() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path(), "state.json");
        let registry = TypeRegistry::new();
        let provider: Arc<dyn Provider> = Arc::new(MockProvider { created: Mutex::new(vec![]) });

        let bundle = ResourceNode::Concrete(Resource::new(
            "bundle",
            vec![],
            Arc::new(Bundle { name: "x".into() }),
        ));
        let profile = ResourceNode::Late(LateBound::new("profile", vec!["bundle".to_string()], |states: &HashMap<String, ResourceState>| {
            let bundle_state = states.get("bundle").expect("dependency ready");
            let bundle_id = bundle_state
                .output("bundle_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(Resource::new("profile", vec!["bundle".to_string()], Arc::new(Profile { bundle_id })))
        }));

        let desired = vec![bundle, profile];
        let plan = build_plan(&desired, &HashMap::new(), false).unwrap();
        assert_eq!(plan.operations.len(), 2);

        let providers = vec![provider];
        let report = execute("demo", &desired, &plan, &providers, &store, &registry, None)
            .await
            .unwrap();
        assert!(report.committed);
        assert_eq!(report.succeeded(), 2);

        let state = store.load(&registry, None).unwrap();
        let profile_state = &state.resources["profile"];
        assert_eq!(
            profile_state.resource.record.as_any().downcast_ref::<Profile>().unwrap().bundle_id,
            "com.example.bundle"
        );
    }

    struct FatalOnCreateProvider;

    #[async_trait]
    impl Provider for FatalOnCreateProvider {
        fn name(&self) -> &str {
            "fatal"
        }
        fn version(&self) -> &str {
            "1.0"
        }
        fn can_handle(&self, resource: &Resource) -> bool {
            resource.record.type_tag() == "test.Bundle"
        }
        async fn create(&self, resource: &Resource) -> Result<ResourceState> {
            if resource.id == "bad" {
                return Err(DrftError::Validation("rejected by provider".into()));
            }
            Ok(ResourceState::new(resource.clone()))
        }
        async fn read(&self, resource: &Resource) -> Result<ResourceState> {
            Ok(ResourceState::new(resource.clone()))
        }
        async fn update(&self, _current: &ResourceState, desired: &Resource) -> Result<ResourceState> {
            Ok(ResourceState::new(desired.clone()))
        }
        async fn delete(&self, _current: &ResourceState) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn fatal_error_kind_aborts_the_run_instead_of_being_recorded() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path(), "state.json");
        let registry = TypeRegistry::new();
        let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(FatalOnCreateProvider)];

        let desired = vec![ResourceNode::Concrete(Resource::new(
            "bad",
            vec![],
            Arc::new(Bundle { name: "x".into() }),
        ))];
        let plan = build_plan(&desired, &HashMap::new(), false).unwrap();

        let err = execute("demo", &desired, &plan, &providers, &store, &registry, None)
            .await
            .unwrap_err();
        assert!(err.is_fatal());

        let state = store.load(&registry, None).unwrap();
        assert!(state.resources.is_empty(), "a fatal error must not persist partial state");
    }
}
