use super::{FieldDiff, Operation, OperationKind, Plan, PlanDiagnostics};
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::resource::{Resource, ResourceNode, ResourceState};
use std::collections::HashMap;

/// Reserved output key used to remember, across a state round-trip, that a
/// resource is read-only — so it is never mistakenly offered up for
/// deletion once it drops out of the desired set (invariant 5). The JSON
/// wire format doesn't otherwise carry this flag (§6 only specifies
/// `.type` + `resource` + provider outputs), so this is a narrow addition
/// the executor's read-only prepass is responsible for setting.
pub const READ_ONLY_MARKER: &str = "__read_only";

fn is_persisted_read_only(state: &ResourceState) -> bool {
    matches!(state.outputs.get(READ_ONLY_MARKER), Some(serde_json::Value::Bool(true)))
}

pub fn build_plan(
    desired: &[ResourceNode],
    actual: &HashMap<String, ResourceState>,
    verbose: bool,
) -> Result<Plan> {
    // Step 1: build and validate the desired dependency graph.
    let mut desired_graph = DependencyGraph::new();
    for node in desired {
        desired_graph.add(node.id(), node.dependencies());
    }
    desired_graph.validate()?;
    let desired_order = desired_graph.topological_order()?;

    let desired_by_id: HashMap<&str, &ResourceNode> = desired.iter().map(|n| (n.id(), n)).collect();

    let mut diagnostics = PlanDiagnostics::default();
    let mut creates: Vec<Operation> = Vec::new();
    let mut updates: Vec<Operation> = Vec::new();

    // Steps 2-3: desired resources, split on presence in actual state.
    for node in desired {
        match actual.get(node.id()) {
            None => {
                if node.is_read_only() {
                    continue;
                }
                match node {
                    ResourceNode::Concrete(_) => {
                        creates.push(Operation {
                            id: node.id().to_string(),
                            kind: OperationKind::Create,
                            node: Some(node.clone()),
                        });
                    }
                    ResourceNode::Late(late) => {
                        if node.dependencies_ready(actual) {
                            match late.build(actual) {
                                Ok(built) => creates.push(Operation {
                                    id: node.id().to_string(),
                                    kind: OperationKind::Create,
                                    node: Some(ResourceNode::Concrete(built)),
                                }),
                                Err(_) => creates.push(Operation {
                                    id: node.id().to_string(),
                                    kind: OperationKind::Create,
                                    node: Some(node.clone()),
                                }),
                            }
                        } else {
                            creates.push(Operation {
                                id: node.id().to_string(),
                                kind: OperationKind::Create,
                                node: Some(node.clone()),
                            });
                        }
                    }
                }
            }
            Some(current) => {
                if node.is_read_only() {
                    if verbose {
                        diagnostics.unchanged.push(node.id().to_string());
                    }
                    continue;
                }

                let resolved: Option<Resource> = match node {
                    ResourceNode::Concrete(r) => Some(r.clone()),
                    ResourceNode::Late(late) => {
                        if !node.dependencies_ready(actual) {
                            None
                        } else {
                            late.build(actual).ok()
                        }
                    }
                };

                let Some(resolved) = resolved else {
                    // Dependencies not yet materialized (or builder still
                    // failing): rechecked once dependencies exist.
                    continue;
                };

                if resolved.attributes_eq(&current.resource)? {
                    if verbose {
                        diagnostics.unchanged.push(node.id().to_string());
                    }
                    continue;
                }

                if verbose {
                    diagnostics
                        .field_diffs
                        .insert(node.id().to_string(), field_diffs(&current.resource, &resolved)?);
                }

                updates.push(Operation {
                    id: node.id().to_string(),
                    kind: OperationKind::Update,
                    node: Some(ResourceNode::Concrete(resolved)),
                });
            }
        }
    }

    // Step 4: actual resources no longer desired, excluding read-only ones.
    let mut deletes: Vec<Operation> = Vec::new();
    let mut actual_graph = DependencyGraph::new();
    for (id, state) in actual {
        actual_graph.add(id, &state.resource.dependencies);
    }
    let actual_reverse_order = actual_graph.reverse_topological_order()?;

    for id in &actual_reverse_order {
        if desired_by_id.contains_key(id.as_str()) {
            continue;
        }
        let state = &actual[id];
        if is_persisted_read_only(state) {
            continue;
        }
        deletes.push(Operation {
            id: id.clone(),
            kind: OperationKind::Delete,
            node: None,
        });
    }

    // Step 5: order creates/updates by desired topological order, deletes
    // already follow actual reverse-topological order.
    let rank: HashMap<&str, usize> = desired_order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    creates.sort_by_key(|op| rank.get(op.id.as_str()).copied().unwrap_or(usize::MAX));
    updates.sort_by_key(|op| rank.get(op.id.as_str()).copied().unwrap_or(usize::MAX));

    let mut operations = Vec::with_capacity(creates.len() + updates.len() + deletes.len());
    operations.extend(creates);
    operations.extend(updates);
    operations.extend(deletes);

    Ok(Plan {
        operations,
        diagnostics: verbose.then_some(diagnostics),
    })
}

fn field_diffs(current: &Resource, desired: &Resource) -> Result<Vec<FieldDiff>> {
    let current_fields = current.record.encode_fields()?;
    let desired_fields = desired.record.encode_fields()?;
    let mut diffs = Vec::new();
    let mut keys: Vec<&String> = current_fields.keys().chain(desired_fields.keys()).collect();
    keys.sort();
    keys.dedup();
    for key in keys {
        let c = current_fields.get(key).cloned().unwrap_or(serde_json::Value::Null);
        let d = desired_fields.get(key).cloned().unwrap_or(serde_json::Value::Null);
        if c != d {
            diffs.push(FieldDiff {
                field: key.clone(),
                current: c,
                desired: d,
            });
        }
    }
    Ok(diffs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::Record;
    use serde_json::{json, Map, Value};
    use std::any::Any;

    #[derive(Debug, Clone)]
    struct Res {
        name: String,
    }

    impl Record for Res {
        fn type_tag(&self) -> &'static str {
            "test.Res"
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

    fn resource(id: &str, deps: &[&str], name: &str) -> Resource {
        Resource::new(
            id,
            deps.iter().map(|s| s.to_string()).collect(),
            std::sync::Arc::new(Res { name: name.to_string() }),
        )
    }

    #[test]
    fn s1_create_with_dependencies() {
        let db = ResourceNode::Concrete(resource("db", &[], "db"));
        let web1 = ResourceNode::Concrete(resource("web1", &["db"], "web1"));
        let web2 = ResourceNode::Concrete(resource("web2", &["db"], "web2"));
        let lb = ResourceNode::Concrete(resource("lb", &["web1", "web2"], "lb"));
        let desired = vec![db, web1, web2, lb];
        let plan = build_plan(&desired, &HashMap::new(), false).unwrap();
        assert_eq!(plan.operations.len(), 4);
        let ids: Vec<&str> = plan.operations.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids[0], "db");
        assert_eq!(ids[3], "lb");
        assert!(ids[1..3].contains(&"web1"));
        assert!(ids[1..3].contains(&"web2"));
    }

    #[test]
    fn s2_update_detection_with_field_diff() {
        let mut actual = HashMap::new();
        actual.insert("r".to_string(), ResourceState::new(resource("r", &[], "old")));
        let desired = vec![ResourceNode::Concrete(resource("r", &[], "new"))];
        let plan = build_plan(&desired, &actual, true).unwrap();
        assert_eq!(plan.operations.len(), 1);
        assert_eq!(plan.operations[0].kind, OperationKind::Update);
        let diffs = &plan.diagnostics.unwrap().field_diffs["r"];
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].field, "name");
        assert_eq!(diffs[0].current, json!("old"));
        assert_eq!(diffs[0].desired, json!("new"));
    }

    #[test]
    fn s3_delete_in_reverse_order() {
        let mut actual = HashMap::new();
        actual.insert("a".to_string(), ResourceState::new(resource("a", &[], "a")));
        actual.insert("b".to_string(), ResourceState::new(resource("b", &["a"], "b")));
        let plan = build_plan(&[], &actual, false).unwrap();
        let ids: Vec<&str> = plan.operations.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn s4_missing_dependency_is_fatal() {
        let desired = vec![ResourceNode::Concrete(resource("r", &["missing"], "r"))];
        let err = build_plan(&desired, &HashMap::new(), false).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains('r'));
        assert!(msg.contains("missing"));
    }

    #[test]
    fn idempotent_on_equal_state() {
        let mut actual = HashMap::new();
        actual.insert("r".to_string(), ResourceState::new(resource("r", &[], "same")));
        let desired = vec![ResourceNode::Concrete(resource("r", &[], "same"))];
        let plan = build_plan(&desired, &actual, false).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn invariant5_read_only_resource_not_in_actual_produces_no_create() {
        let desired = vec![ResourceNode::Concrete(resource("ro", &[], "x").read_only())];
        let plan = build_plan(&desired, &HashMap::new(), false).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn invariant5_persisted_read_only_resource_dropped_from_desired_is_not_deleted() {
        let mut state = ResourceState::new(resource("ro", &[], "x"));
        state.outputs.insert(READ_ONLY_MARKER.to_string(), Value::Bool(true));
        let mut actual = HashMap::new();
        actual.insert("ro".to_string(), state);

        // "ro" no longer appears in desired at all.
        let plan = build_plan(&[], &actual, false).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn non_read_only_resource_dropped_from_desired_is_still_deleted() {
        let mut state = ResourceState::new(resource("r", &[], "x"));
        state.outputs.insert(READ_ONLY_MARKER.to_string(), Value::Bool(false));
        let mut actual = HashMap::new();
        actual.insert("r".to_string(), state);

        let plan = build_plan(&[], &actual, false).unwrap();
        assert_eq!(plan.operations.len(), 1);
        assert_eq!(plan.operations[0].kind, OperationKind::Delete);
    }
}
