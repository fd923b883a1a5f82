//! Diff engine for comparing desired vs applied state.
//!
//! Each desired resource is resolved against the applied outputs of its
//! dependencies and compared, attribute by attribute, with its last applied
//! form. The schema registry decides whether a change can be applied in
//! place or forces a replacement.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::config::ConfigHasher;
use crate::error::GraphError;
use crate::graph::{DependencyResolver, Reference, ResourceGraph, ResourceNode, resolve_value};
use crate::schema::SchemaRegistry;
use crate::state::{AppliedResource, AppliedState, DeposedInstance};

/// Engine for computing diffs between desired and applied state.
#[derive(Debug, Default)]
pub struct DiffEngine {
    schemas: SchemaRegistry,
    hasher: ConfigHasher,
}

/// Classification of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Applied form already matches.
    NoOp,
    /// Not applied yet.
    Create,
    /// Changed attributes are all mutable in place.
    Update,
    /// At least one change needs a new instance.
    Replace,
    /// Applied but no longer desired.
    Delete,
}

/// Change of a single attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
    /// Attribute name.
    pub attribute: String,
    /// Last applied value.
    pub old_value: Option<Value>,
    /// Desired value. `None` if removed or not known until apply.
    pub new_value: Option<Value>,
    /// False when the value depends on a resource that is still changing.
    pub known: bool,
    /// Whether this change alone forces a replacement.
    pub forces_replace: bool,
}

/// Difference for a single resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDiff {
    /// Logical name.
    pub name: String,
    /// Desired type, or the applied type for deletes.
    pub resource_type: String,
    /// Classification.
    pub action: ActionType,
    /// Why the resource was classified this way.
    pub reason: String,
    /// Attribute-level changes.
    pub changes: Vec<AttributeChange>,
    /// Resolved desired attributes, if every reference is known.
    pub resolved: Option<BTreeMap<String, Value>>,
    /// Hash of the resolved attributes, if known.
    pub new_hash: Option<String>,
    /// Last applied record.
    pub prior: Option<AppliedResource>,
    /// Leftover instance of an interrupted replacement.
    pub deposed: Option<DeposedInstance>,
}

/// Complete diff result.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    /// All resource diffs, sorted by name.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update in place.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a diff engine with the given schemas.
    #[must_use]
    pub fn new(schemas: SchemaRegistry) -> Self {
        Self {
            schemas,
            hasher: ConfigHasher::new(),
        }
    }

    /// Classifies every desired and every applied resource.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] if the graph cannot be ordered.
    pub fn compute(
        &self,
        graph: &ResourceGraph,
        applied: &AppliedState,
    ) -> Result<DiffResult, GraphError> {
        let order = DependencyResolver::new().resolve(graph)?;
        let mut actions: HashMap<String, ActionType> = HashMap::new();
        let mut diffs = Vec::with_capacity(order.len());

        // Dependencies are classified before their dependents
        for name in &order {
            let Some(node) = graph.node(name) else {
                continue;
            };
            let diff = self.diff_resource(node, applied, &actions);
            debug!(resource = %name, action = %diff.action, "Classified resource");
            actions.insert(name.clone(), diff.action);
            diffs.push(diff);
        }

        for (name, prior) in &applied.resources {
            if graph.contains(name) {
                continue;
            }
            debug!(resource = %name, "Resource no longer desired");
            diffs.push(ResourceDiff {
                name: name.clone(),
                resource_type: prior.resource_type.clone(),
                action: ActionType::Delete,
                reason: String::from("Removed from desired state"),
                changes: Vec::new(),
                resolved: None,
                new_hash: None,
                prior: Some(prior.clone()),
                deposed: prior.deposed.clone(),
            });
        }

        diffs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(DiffResult::from_diffs(diffs))
    }

    fn diff_resource(
        &self,
        node: &ResourceNode,
        applied: &AppliedState,
        actions: &HashMap<String, ActionType>,
    ) -> ResourceDiff {
        let resolved = resolve_known(node, applied, actions);
        let complete: Option<BTreeMap<String, Value>> = resolved
            .iter()
            .map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
            .collect();
        let new_hash = complete.as_ref().map(|a| self.hasher.hash_attributes(a));

        let mut diff = ResourceDiff {
            name: node.name().to_string(),
            resource_type: node.resource_type().to_string(),
            action: ActionType::Create,
            reason: String::from("Not yet applied"),
            changes: Vec::new(),
            resolved: complete,
            new_hash,
            prior: None,
            deposed: None,
        };

        let Some(prior) = applied.get(node.name()) else {
            diff.changes = resolved
                .into_iter()
                .map(|(attribute, value)| AttributeChange {
                    attribute,
                    old_value: None,
                    known: value.is_some(),
                    new_value: value,
                    forces_replace: false,
                })
                .collect();
            return diff;
        };

        diff.prior = Some(prior.clone());
        diff.deposed.clone_from(&prior.deposed);

        let type_changed = prior.resource_type != node.resource_type();
        diff.changes = self.attribute_changes(node.resource_type(), &resolved, &prior.attributes);

        (diff.action, diff.reason) = if type_changed {
            (
                ActionType::Replace,
                format!("Type changed from {} to {}", prior.resource_type, node.resource_type()),
            )
        } else if diff.changes.is_empty() {
            (ActionType::NoOp, String::from("Up to date"))
        } else if self.schemas.requires_replace(
            node.resource_type(),
            diff.changes.iter().map(|c| c.attribute.as_str()),
        ) {
            let forcing: Vec<&str> = diff
                .changes
                .iter()
                .filter(|c| c.forces_replace)
                .map(|c| c.attribute.as_str())
                .collect();
            (ActionType::Replace, format!("Immutable attributes changed: {}", forcing.join(", ")))
        } else {
            let changed: Vec<&str> = diff.changes.iter().map(|c| c.attribute.as_str()).collect();
            (ActionType::Update, format!("Attributes changed: {}", changed.join(", ")))
        };

        diff
    }

    fn attribute_changes(
        &self,
        resource_type: &str,
        desired: &BTreeMap<String, Option<Value>>,
        applied: &BTreeMap<String, Value>,
    ) -> Vec<AttributeChange> {
        let keys: BTreeSet<&String> = desired.keys().chain(applied.keys()).collect();
        let mut changes = Vec::new();

        for key in keys {
            let old_value = applied.get(key);
            let (new_value, known) = match desired.get(key) {
                Some(Some(value)) => (Some(value), true),
                Some(None) => (None, false),
                None => (None, true),
            };

            if known && new_value == old_value {
                continue;
            }

            changes.push(AttributeChange {
                attribute: key.clone(),
                old_value: old_value.cloned(),
                new_value: new_value.cloned(),
                known,
                forces_replace: !self.schemas.is_mutable(resource_type, key),
            });
        }

        changes
    }
}

/// Resolves every attribute of `node`, leaving `None` where a referenced
/// dependency is about to change or has not been applied.
fn resolve_known(
    node: &ResourceNode,
    applied: &AppliedState,
    actions: &HashMap<String, ActionType>,
) -> BTreeMap<String, Option<Value>> {
    let mut lookup = |reference: &Reference| -> Option<Value> {
        if actions.get(&reference.name) != Some(&ActionType::NoOp) {
            return None;
        }
        applied
            .get(&reference.name)
            .filter(|r| r.resource_type == reference.resource_type)
            .and_then(|r| r.output(&reference.attribute))
    };

    node.attributes()
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, &mut lookup)))
        .collect()
}

impl DiffResult {
    fn from_diffs(diffs: Vec<ResourceDiff>) -> Self {
        let count = |action: ActionType| diffs.iter().filter(|d| d.action == action).count();
        Self {
            creates: count(ActionType::Create),
            updates: count(ActionType::Update),
            replaces: count(ActionType::Replace),
            deletes: count(ActionType::Delete),
            unchanged: count(ActionType::NoOp),
            diffs,
        }
    }

    /// Returns true if anything needs to change.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.creates + self.updates + self.replaces + self.deletes > 0
            || self.diffs.iter().any(|d| d.deposed.is_some())
    }

    /// Gets the diff for a resource.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceDiff> {
        self.diffs.iter().find(|d| d.name == name)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoOp => "no-op",
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl ActionType {
    /// Returns the symbol used in plan output.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::NoOp => " ",
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "-/+",
            Self::Delete => "-",
        }
    }
}
