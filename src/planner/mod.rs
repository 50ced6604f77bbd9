//! Diff desired vs. actual state, materialize late-bound resources where
//! possible, and order the resulting operations (§4.D).

mod diff;

pub use diff::{build_plan, READ_ONLY_MARKER};

use crate::resource::ResourceNode;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// One planned change. `node` carries the resource to create/update
/// (possibly still a `Late` wrapper awaiting execution-time binding);
/// deletes only need the id, since the provider call uses the stored
/// `ResourceState` looked up from actual state at execution time.
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: String,
    pub kind: OperationKind,
    pub node: Option<ResourceNode>,
}

/// A single field-level difference, recorded in verbose mode (§4.D step 3).
#[derive(Debug, Clone)]
pub struct FieldDiff {
    pub field: String,
    pub current: Value,
    pub desired: Value,
}

#[derive(Debug, Clone, Default)]
pub struct PlanDiagnostics {
    pub unchanged: Vec<String>,
    pub field_diffs: HashMap<String, Vec<FieldDiff>>,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub operations: Vec<Operation>,
    pub diagnostics: Option<PlanDiagnostics>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn creates(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|o| o.kind == OperationKind::Create)
    }

    pub fn updates(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|o| o.kind == OperationKind::Update)
    }

    pub fn deletes(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|o| o.kind == OperationKind::Delete)
    }
}
