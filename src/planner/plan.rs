//! Plan types and construction.
//!
//! A plan holds one action per resource, in a dependency-respecting
//! sequence. Creates, updates and replaces follow the desired graph. A
//! delete runs after every action whose resource was still bound to it.
//! The old instance of a create-before-destroy replace is removed by a
//! separate cleanup action once the dependents have moved to the new one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::PlanError;
use crate::graph::{ResourceGraph, ResourceNode, kahn_order};
use crate::state::{AppliedResource, DeposedInstance};

use super::diff::{ActionType, AttributeChange, DiffResult, ResourceDiff};

/// Ordering key suffix for deposed cleanup actions. Never valid in a name.
const CLEANUP_SUFFIX: &str = "/deposed";

fn cleanup_key(name: &str) -> String {
    format!("{name}{CLEANUP_SUFFIX}")
}

/// An ordered set of actions.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Hash of the desired-state document.
    pub config_hash: String,
    /// Actions in sequence order.
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    /// Position in the plan.
    pub index: usize,
    /// Logical name.
    pub name: String,
    /// Resource type.
    pub resource_type: String,
    /// Action type.
    pub action_type: ActionType,
    /// Reason for this action.
    pub reason: String,
    /// Attribute-level changes.
    pub changes: Vec<AttributeChange>,
    /// Replace by creating the new instance first.
    pub create_before_destroy: bool,
    /// Indices of actions that must finish first.
    pub dependencies: Vec<usize>,
    /// Desired node, absent for deletes.
    #[serde(skip)]
    pub node: Option<ResourceNode>,
    /// Applied record the action starts from.
    #[serde(skip)]
    pub prior: Option<AppliedResource>,
    /// Leftover instance to clean up first.
    pub deposed: Option<DeposedInstance>,
    /// Hash of the resolved attributes, if known at plan time.
    pub new_hash: Option<String>,
    /// Only removes the `deposed` instance, after every dependent moved off it.
    pub cleanup: bool,
}

/// Action counts of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// Resources to create.
    pub create: usize,
    /// Resources to update in place.
    pub update: usize,
    /// Resources to replace.
    pub replace: usize,
    /// Resources to delete.
    pub delete: usize,
    /// Unchanged resources.
    pub unchanged: usize,
}

impl Plan {
    /// Builds a plan from a diff and the desired graph.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::OrderingFailed`] if the actions cannot be ordered.
    pub fn build(
        diff: DiffResult,
        graph: &ResourceGraph,
        config_hash: &str,
    ) -> Result<Self, PlanError> {
        let by_name: BTreeMap<String, ResourceDiff> = diff
            .diffs
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        let cbd = |name: &str| {
            graph
                .node(name)
                .is_some_and(|n| n.lifecycle().create_before_destroy)
        };

        let mut edges: BTreeSet<(String, String)> = graph.edges();
        for (name, d) in &by_name {
            let Some(prior) = &d.prior else {
                continue;
            };
            for dep in &prior.dependencies {
                let Some(target) = by_name.get(dep) else {
                    continue;
                };
                let releases_first = match target.action {
                    ActionType::Delete => true,
                    ActionType::Replace => d.action == ActionType::Delete && !cbd(dep.as_str()),
                    _ => false,
                };
                if releases_first {
                    edges.insert((name.clone(), dep.clone()));
                }
            }
        }

        let mut entries: BTreeMap<String, PlannedAction> = BTreeMap::new();
        for (name, mut d) in by_name.clone() {
            let cleanup = match d.action {
                ActionType::Replace if cbd(name.as_str()) => d.prior.as_ref().map(|prior| DeposedInstance {
                    provider_id: prior.provider_id.clone(),
                    resource_type: prior.resource_type.clone(),
                    deposed_at: Utc::now(),
                }),
                ActionType::NoOp | ActionType::Update => d.deposed.take(),
                _ => None,
            };

            if let Some(deposed) = cleanup {
                let key = cleanup_key(&name);
                edges.insert((name.clone(), key.clone()));
                for (before, after) in graph.edges() {
                    if before == name {
                        edges.insert((after, key.clone()));
                    }
                }
                for (other, o) in &by_name {
                    if o.prior.as_ref().is_some_and(|p| p.dependencies.contains(&name)) {
                        edges.insert((other.clone(), key.clone()));
                    }
                }
                entries.insert(key, PlannedAction::cleanup(&name, deposed));
            }

            let node = graph.node(&name).cloned();
            let create_before_destroy = node
                .as_ref()
                .is_some_and(|n| n.lifecycle().create_before_destroy);
            entries.insert(
                name,
                PlannedAction {
                    index: 0,
                    name: d.name,
                    resource_type: d.resource_type,
                    action_type: d.action,
                    reason: d.reason,
                    changes: d.changes,
                    create_before_destroy,
                    dependencies: Vec::new(),
                    node,
                    prior: d.prior,
                    deposed: d.deposed,
                    new_hash: d.new_hash,
                    cleanup: false,
                },
            );
        }

        let keys: BTreeSet<String> = entries.keys().cloned().collect();
        let order = kahn_order(&keys, &edges).map_err(|cycle| PlanError::OrderingFailed {
            message: format!(
                "cycle among {}",
                cycle.into_iter().collect::<Vec<_>>().join(", ")
            ),
        })?;
        let position: BTreeMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, key)| (key.as_str(), i))
            .collect();

        let mut actions = Vec::with_capacity(order.len());
        for (index, key) in order.iter().enumerate() {
            let Some(mut action) = entries.remove(key) else {
                continue;
            };
            action.index = index;
            action.dependencies = edges
                .iter()
                .filter(|(_, after)| after == key)
                .filter_map(|(before, _)| position.get(before.as_str()).copied())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            actions.push(action);
        }

        Ok(Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions,
        })
    }

    /// Creates an empty plan (no changes needed).
    #[must_use]
    pub fn empty(config_hash: &str) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions: vec![],
        }
    }

    /// Returns true if no action changes anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_changes()
    }

    /// Returns true if at least one action changes something.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(PlannedAction::has_work)
    }

    /// Returns the action for a resource.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&PlannedAction> {
        self.actions.iter().find(|a| a.name == name && !a.cleanup)
    }

    /// Returns the deposed cleanup action for a resource.
    #[must_use]
    pub fn cleanup_for(&self, name: &str) -> Option<&PlannedAction> {
        self.actions.iter().find(|a| a.name == name && a.cleanup)
    }

    /// Returns the action counts.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in self.actions.iter().filter(|a| !a.cleanup) {
            match action.action_type {
                ActionType::NoOp => summary.unchanged += 1,
                ActionType::Create => summary.create += 1,
                ActionType::Update => summary.update += 1,
                ActionType::Replace => summary.replace += 1,
                ActionType::Delete => summary.delete += 1,
            }
        }
        summary
    }

    /// Counts groups of actions with work that share no dependency path.
    ///
    /// Weakly connected components of the action graph, ignoring actions
    /// with nothing to do.
    #[must_use]
    pub fn independent_subgraphs(&self) -> usize {
        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }

        let mut parent: Vec<usize> = (0..self.actions.len()).collect();

        for action in self.actions.iter().filter(|a| a.has_work()) {
            for &dep in &action.dependencies {
                if self.actions.get(dep).is_some_and(PlannedAction::has_work) {
                    let a = find(&mut parent, action.index);
                    let b = find(&mut parent, dep);
                    parent[a] = b;
                }
            }
        }

        let roots: BTreeSet<usize> = self
            .actions
            .iter()
            .filter(|a| a.has_work())
            .map(|a| find(&mut parent, a.index))
            .collect();
        roots.len()
    }

    /// Returns the resource names in sequence order.
    #[must_use]
    pub fn order(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name.as_str()).collect()
    }
}

impl PlannedAction {
    fn cleanup(name: &str, deposed: DeposedInstance) -> Self {
        Self {
            index: 0,
            name: name.to_string(),
            resource_type: deposed.resource_type.clone(),
            action_type: ActionType::NoOp,
            reason: format!("Remove deposed instance {}", deposed.provider_id),
            changes: Vec::new(),
            create_before_destroy: false,
            dependencies: Vec::new(),
            node: None,
            prior: None,
            deposed: Some(deposed),
            new_hash: None,
            cleanup: true,
        }
    }

    /// Returns true if executing the action can touch the provider.
    #[must_use]
    pub fn has_work(&self) -> bool {
        self.action_type != ActionType::NoOp || self.deposed.is_some()
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.unchanged
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConfig;
    use crate::graph::GraphBuilder;
    use crate::planner::DiffEngine;
    use crate::schema::SchemaRegistry;
    use crate::state::AppliedState;
    use serde_json::{Value, json};

    fn attrs(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).expect("attribute map")
    }

    fn plan_for(resources: Vec<(&str, ResourceConfig)>, state: &AppliedState) -> Plan {
        let map = resources
            .into_iter()
            .map(|(name, config)| (name.to_string(), config))
            .collect();
        let graph = GraphBuilder::new().build(&map).expect("graph");
        let diff = DiffEngine::new(SchemaRegistry::new())
            .compute(&graph, state)
            .expect("diff");
        Plan::build(diff, &graph, "hash").expect("plan")
    }

    fn record(name: &str, resource_type: &str, deps: &[&str]) -> AppliedResource {
        let mut r = AppliedResource::new(name, resource_type, &format!("id-{name}"));
        r.dependencies = deps.iter().map(|d| (*d).to_string()).collect();
        r
    }

    #[test]
    fn test_example_plan_order() {
        let plan = plan_for(
            vec![
                ("a", ResourceConfig::new("x", attrs(json!({"n": 1})))),
                ("b", ResourceConfig::new("y", attrs(json!({"ref": "${x.a.out}"})))),
            ],
            &AppliedState::new("p", "dev"),
        );

        assert_eq!(plan.order(), vec!["a", "b"]);
        assert!(plan.actions.iter().all(|a| a.action_type == ActionType::Create));
        assert_eq!(plan.actions[1].dependencies, vec![0]);
        assert_eq!(plan.independent_subgraphs(), 1);
    }

    #[test]
    fn test_dependency_precedes_dependent() {
        let plan = plan_for(
            vec![
                ("gateway", ResourceConfig::new("gw", attrs(json!({"cfg": "${cfg.config.id}"})))),
                ("config", ResourceConfig::new("cfg", attrs(json!({"api": "${api.api.id}"})))),
                ("api", ResourceConfig::new("api", attrs(json!({"name": "orders"})))),
                ("bucket", ResourceConfig::new("bucket", attrs(json!({})))),
            ],
            &AppliedState::new("p", "dev"),
        );

        for action in &plan.actions {
            for &dep in &action.dependencies {
                assert!(dep < action.index);
            }
        }
        assert_eq!(plan.order(), vec!["api", "bucket", "config", "gateway"]);
        assert_eq!(plan.independent_subgraphs(), 2);
    }

    #[test]
    fn test_deletes_run_dependents_first() {
        let mut state = AppliedState::new("p", "dev");
        state.upsert(record("api", "api", &[]), None).expect("api");
        state.upsert(record("config", "cfg", &["api"]), None).expect("config");
        state.upsert(record("gateway", "gw", &["config"]), None).expect("gateway");

        let plan = plan_for(vec![], &state);
        assert_eq!(plan.order(), vec!["gateway", "config", "api"]);
        assert_eq!(plan.summary().delete, 3);
        assert_eq!(plan.action("api").map(|a| a.dependencies.clone()), Some(vec![1]));
    }

    #[test]
    fn test_rebound_dependent_runs_before_delete() {
        let mut state = AppliedState::new("p", "dev");
        state.upsert(record("cfg_v1", "cfg", &[]), None).expect("cfg_v1");
        state.upsert(record("gateway", "gw", &["cfg_v1"]), None).expect("gateway");

        let plan = plan_for(
            vec![
                ("cfg_v2", ResourceConfig::new("cfg", attrs(json!({"n": 2})))),
                ("gateway", ResourceConfig::new("gw", attrs(json!({"cfg": "${cfg.cfg_v2.id}"})))),
            ],
            &state,
        );

        let gateway = plan.action("gateway").expect("gateway");
        let delete = plan.action("cfg_v1").expect("cfg_v1");
        assert_eq!(delete.action_type, ActionType::Delete);
        assert!(gateway.index < delete.index);
        assert!(delete.dependencies.contains(&gateway.index));
        assert_eq!(plan.order(), vec!["cfg_v2", "gateway", "cfg_v1"]);
    }

    #[test]
    fn test_deposed_cleanup_waits_for_dependents() {
        let mut state = AppliedState::new("p", "dev");
        let mut config = record("config", "cfg", &[]);
        config.attributes = attrs(json!({"n": 1}));
        state.upsert(config, None).expect("config");
        let mut gateway = record("gateway", "gw", &["config"]);
        gateway.attributes = attrs(json!({"cfg": "id-config"}));
        state.upsert(gateway, None).expect("gateway");

        let plan = plan_for(
            vec![
                (
                    "config",
                    ResourceConfig::new("cfg", attrs(json!({"n": 2}))).create_before_destroy(true),
                ),
                ("gateway", ResourceConfig::new("gw", attrs(json!({"cfg": "${cfg.config.id}"})))),
            ],
            &state,
        );

        let replace = plan.action("config").expect("config");
        let gateway = plan.action("gateway").expect("gateway");
        let cleanup = plan.cleanup_for("config").expect("cleanup");
        assert_eq!(replace.action_type, ActionType::Replace);
        assert!(replace.deposed.is_none());
        assert_eq!(cleanup.deposed.as_ref().map(|d| d.provider_id.as_str()), Some("id-config"));
        assert_eq!(cleanup.dependencies, vec![replace.index, gateway.index]);
        assert_eq!(cleanup.index, 2);
        assert_eq!(plan.summary().replace, 2);
        assert_eq!(plan.summary().unchanged, 0);
    }

    #[test]
    fn test_noop_plan_has_no_changes() {
        let mut state = AppliedState::new("p", "dev");
        let mut a = record("a", "x", &[]);
        a.attributes = attrs(json!({"n": 1}));
        state.upsert(a, None).expect("a");

        let plan = plan_for(vec![("a", ResourceConfig::new("x", attrs(json!({"n": 1}))))], &state);
        assert!(plan.is_empty());
        assert_eq!(plan.independent_subgraphs(), 0);
        assert_eq!(plan.summary().unchanged, 1);
    }
}
