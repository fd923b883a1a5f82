//! Resource graph construction.
//!
//! The builder turns declared resources into an immutable DAG whose edges
//! point from a dependent to its dependency. Unknown references and cycles
//! are rejected here, before anything is planned.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

use crate::config::{InfraConfig, ResourceConfig};
use crate::error::GraphError;

use super::node::{ResourceId, ResourceNode};
use super::reference::{Reference, extract_references};
use super::resolver::DependencyResolver;

/// Immutable resource dependency graph.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    /// Nodes by logical name.
    nodes: BTreeMap<String, ResourceNode>,
    /// Reverse edges: dependency name to the names depending on it.
    dependents: BTreeMap<String, BTreeSet<String>>,
}

/// Builder for [`ResourceGraph`].
#[derive(Debug, Default)]
pub struct GraphBuilder;

impl GraphBuilder {
    /// Creates a new graph builder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Builds the graph for every resource in a desired-state document.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownReference`] or [`GraphError::Cycle`].
    pub fn from_config(&self, config: &InfraConfig) -> Result<ResourceGraph, GraphError> {
        self.build(&config.resources)
    }

    /// Builds the graph from a logical-name to resource mapping.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownReference`] when a reference or explicit
    /// dependency names an undeclared resource (or the wrong type), and
    /// [`GraphError::Cycle`] when the dependencies form a cycle.
    pub fn build(
        &self,
        resources: &BTreeMap<String, ResourceConfig>,
    ) -> Result<ResourceGraph, GraphError> {
        let mut nodes = BTreeMap::new();

        for (name, resource) in resources {
            let node = Self::build_node(name, resource, resources)?;
            nodes.insert(name.clone(), node);
        }

        let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for node in nodes.values() {
            dependents.entry(node.name().to_string()).or_default();
            for dep in node.dependencies() {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(node.name().to_string());
            }
        }

        let graph = ResourceGraph { nodes, dependents };

        if let Some(cycle) = graph.find_cycle() {
            return Err(GraphError::Cycle { cycle });
        }

        debug!("Built resource graph with {} nodes", graph.len());
        Ok(graph)
    }

    /// Extracts references from one resource and checks their targets.
    fn build_node(
        name: &str,
        resource: &ResourceConfig,
        resources: &BTreeMap<String, ResourceConfig>,
    ) -> Result<ResourceNode, GraphError> {
        let mut references: BTreeMap<String, BTreeSet<Reference>> = BTreeMap::new();

        for (attribute, value) in &resource.attributes {
            let found = extract_references(value);
            for reference in &found {
                match resources.get(&reference.name) {
                    Some(target) if target.resource_type == reference.resource_type => {}
                    _ => {
                        return Err(GraphError::UnknownReference {
                            from: name.to_string(),
                            reference: reference.to_string(),
                        });
                    }
                }
            }
            if !found.is_empty() {
                references.insert(attribute.clone(), found);
            }
        }

        let mut explicit = BTreeSet::new();
        for dep in &resource.depends_on {
            if !resources.contains_key(dep) {
                return Err(GraphError::UnknownReference {
                    from: name.to_string(),
                    reference: dep.clone(),
                });
            }
            explicit.insert(dep.clone());
        }

        Ok(ResourceNode::new(
            ResourceId::new(&resource.resource_type, name),
            resource.attributes.clone(),
            references,
            explicit,
            resource.lifecycle.into(),
        ))
    }
}

impl ResourceGraph {
    /// Returns the node with the given logical name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&ResourceNode> {
        self.nodes.get(name)
    }

    /// Returns all nodes in ascending name order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// Returns all logical names in ascending order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Returns true if the graph declares the logical name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the direct dependencies of a node.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> BTreeSet<String> {
        self.nodes
            .get(name)
            .map(|n| n.dependencies().clone())
            .unwrap_or_default()
    }

    /// Returns the direct dependents of a node.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> BTreeSet<String> {
        self.dependents.get(name).cloned().unwrap_or_default()
    }

    /// Returns every node that depends on `name`, directly or transitively.
    #[must_use]
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            for dependent in self.dependents_of(&current) {
                if seen.insert(dependent.clone()) {
                    stack.push(dependent);
                }
            }
        }
        seen
    }

    /// Returns every edge as a (dependency, dependent) pair.
    #[must_use]
    pub fn edges(&self) -> BTreeSet<(String, String)> {
        self.nodes
            .values()
            .flat_map(|node| {
                node.dependencies()
                    .iter()
                    .map(|dep| (dep.clone(), node.name().to_string()))
            })
            .collect()
    }

    /// Returns the application order (dependencies first).
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] if the graph is not acyclic.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        DependencyResolver::new().resolve(self)
    }

    /// Depth-first search with a recursion stack. Returns the first cycle
    /// found, as a path that starts and ends on the same node.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited: HashSet<&str> = HashSet::new();

        for start in self.nodes.keys() {
            if visited.contains(start.as_str()) {
                continue;
            }

            let mut path: Vec<&str> = Vec::new();
            let mut on_stack: HashSet<&str> = HashSet::new();
            if let Some(cycle) = self.visit(start, &mut visited, &mut path, &mut on_stack) {
                return Some(cycle);
            }
        }

        None
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        visited: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
        on_stack: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(name);
        path.push(name);
        on_stack.insert(name);

        if let Some(node) = self.nodes.get(name) {
            for dep in node.dependencies() {
                if on_stack.contains(dep.as_str()) {
                    let start = path.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|n| (*n).to_string()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                if !visited.contains(dep.as_str())
                    && let Some(cycle) = self.visit(dep, visited, path, on_stack)
                {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        on_stack.remove(name);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource(resource_type: &str, attributes: serde_json::Value) -> ResourceConfig {
        let attributes = attributes
            .as_object()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        ResourceConfig::new(resource_type, attributes)
    }

    fn gateway_resources() -> BTreeMap<String, ResourceConfig> {
        let mut resources = BTreeMap::new();
        resources.insert(
            String::from("api"),
            resource("api_gateway_api", json!({"api_id": "orders"})),
        );
        resources.insert(
            String::from("api_config"),
            resource(
                "api_gateway_api_config",
                json!({"api": "${api_gateway_api.api.id}", "openapi": "spec.yaml"}),
            )
            .create_before_destroy(true),
        );
        resources.insert(
            String::from("gateway"),
            resource(
                "api_gateway_gateway",
                json!({"api_config": "${api_gateway_api_config.api_config.id}"}),
            ),
        );
        resources
    }

    #[test]
    fn test_build_infers_edges_from_references() {
        let graph = GraphBuilder::new()
            .build(&gateway_resources())
            .expect("graph builds");

        assert_eq!(graph.len(), 3);
        assert_eq!(
            graph.dependencies_of("gateway"),
            BTreeSet::from([String::from("api_config")])
        );
        assert_eq!(
            graph.dependents_of("api"),
            BTreeSet::from([String::from("api_config")])
        );
        assert_eq!(
            graph.transitive_dependents("api"),
            BTreeSet::from([String::from("api_config"), String::from("gateway")])
        );
        let node = graph.node("api_config").expect("node exists");
        assert!(node.lifecycle().create_before_destroy);
        assert!(node.attribute_has_references("api"));
        assert!(!node.attribute_has_references("openapi"));
    }

    #[test]
    fn test_explicit_dependencies_add_edges() {
        let mut resources = gateway_resources();
        resources.insert(
            String::from("dns"),
            resource("dns_record", json!({"name": "api"})).depends_on("gateway"),
        );
        let graph = GraphBuilder::new().build(&resources).expect("graph builds");
        assert!(graph.edges().contains(&(String::from("gateway"), String::from("dns"))));
        assert!(graph
            .node("dns")
            .expect("node exists")
            .explicit_dependencies()
            .contains("gateway"));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let mut resources = BTreeMap::new();
        resources.insert(
            String::from("gateway"),
            resource("api_gateway_gateway", json!({"api_config": "${api_gateway_api_config.missing.id}"})),
        );
        let err = GraphBuilder::new().build(&resources).expect_err("must fail");
        assert!(matches!(
            err,
            GraphError::UnknownReference { ref from, ref reference }
                if from == "gateway" && reference == "api_gateway_api_config.missing.id"
        ));
    }

    #[test]
    fn test_reference_with_wrong_type_rejected() {
        let mut resources = gateway_resources();
        resources.insert(
            String::from("bad"),
            resource("dns_record", json!({"target": "${bucket.api.id}"})),
        );
        let err = GraphBuilder::new().build(&resources).expect_err("must fail");
        assert!(matches!(err, GraphError::UnknownReference { .. }));
    }

    #[test]
    fn test_unknown_explicit_dependency_rejected() {
        let mut resources = BTreeMap::new();
        resources.insert(
            String::from("a"),
            resource("x", json!({"n": 1})).depends_on("ghost"),
        );
        let err = GraphBuilder::new().build(&resources).expect_err("must fail");
        assert!(matches!(err, GraphError::UnknownReference { ref reference, .. } if reference == "ghost"));
    }

    #[test]
    fn test_cycle_rejected_with_full_path() {
        let mut resources = BTreeMap::new();
        resources.insert(String::from("a"), resource("x", json!({"v": "${x.c.out}"})));
        resources.insert(String::from("b"), resource("x", json!({"v": "${x.a.out}"})));
        resources.insert(String::from("c"), resource("x", json!({"v": "${x.b.out}"})));
        resources.insert(String::from("d"), resource("x", json!({"v": "${x.a.out}"})));

        let err = GraphBuilder::new().build(&resources).expect_err("must fail");
        let GraphError::Cycle { cycle } = err else {
            panic!("expected cycle error, got {err:?}");
        };
        assert_eq!(cycle.first(), cycle.last());
        let members: BTreeSet<&str> = cycle.iter().map(String::as_str).collect();
        assert_eq!(members, BTreeSet::from(["a", "b", "c"]));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut resources = BTreeMap::new();
        resources.insert(String::from("a"), resource("x", json!({"v": "${x.a.out}"})));
        let err = GraphBuilder::new().build(&resources).expect_err("must fail");
        assert!(matches!(err, GraphError::Cycle { ref cycle } if cycle == &vec![String::from("a"), String::from("a")]));
    }
}
