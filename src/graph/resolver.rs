//! Dependency resolution with Kahn's algorithm.
//!
//! Ready nodes are kept in an ordered set so ties are always broken by
//! ascending logical name, which makes plans reproducible run to run.

use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

use crate::error::GraphError;

use super::builder::ResourceGraph;

/// Computes a deterministic topological order.
#[derive(Debug, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// Creates a new resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Orders the graph so every dependency precedes its dependents.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] naming every node on a cycle. The
    /// builder already rejects cycles; this re-checks the graph it is given.
    pub fn resolve(&self, graph: &ResourceGraph) -> Result<Vec<String>, GraphError> {
        let nodes: BTreeSet<String> = graph.names().map(String::from).collect();
        kahn_order(&nodes, &graph.edges()).map_err(|cycle| GraphError::Cycle {
            cycle: cycle.into_iter().collect(),
        })
    }
}

/// Orders `nodes` so that for every `(before, after)` edge, `before` comes
/// first. Ties are broken by ascending name.
///
/// On failure returns the nodes that sit on a cycle: what is left after
/// removing everything reachable only from acyclic parts in either
/// direction.
///
/// # Errors
///
/// Returns the cyclic node set when no complete order exists.
pub fn kahn_order(
    nodes: &BTreeSet<String>,
    edges: &BTreeSet<(String, String)>,
) -> Result<Vec<String>, BTreeSet<String>> {
    let mut in_degree: BTreeMap<&str, usize> = nodes.iter().map(|n| (n.as_str(), 0)).collect();
    let mut successors: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (before, after) in edges {
        if !nodes.contains(before) || !nodes.contains(after) {
            continue;
        }
        successors.entry(before.as_str()).or_default().push(after.as_str());
        if let Some(degree) = in_degree.get_mut(after.as_str()) {
            *degree += 1;
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(next) = ready.pop_first() {
        trace!("Resolved {next}");
        order.push(next.to_string());
        for succ in successors.get(next).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(succ) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*succ);
                }
            }
        }
    }

    if order.len() == nodes.len() {
        return Ok(order);
    }

    let placed: BTreeSet<&str> = order.iter().map(String::as_str).collect();
    Err(cyclic_core(nodes, edges, &placed))
}

/// Strips nodes that only hang off a cycle (no remaining successor) until
/// only nodes on cycles are left.
fn cyclic_core(
    nodes: &BTreeSet<String>,
    edges: &BTreeSet<(String, String)>,
    placed: &BTreeSet<&str>,
) -> BTreeSet<String> {
    let mut remaining: BTreeSet<&str> = nodes
        .iter()
        .map(String::as_str)
        .filter(|n| !placed.contains(n))
        .collect();

    loop {
        let sinks: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|n| {
                !edges
                    .iter()
                    .any(|(b, a)| b == n && remaining.contains(a.as_str()))
            })
            .collect();
        if sinks.is_empty() {
            break;
        }
        for sink in sinks {
            remaining.remove(sink);
        }
    }

    remaining.into_iter().map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConfig;
    use crate::graph::GraphBuilder;
    use serde_json::json;
    use std::collections::HashMap;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn edges(items: &[(&str, &str)]) -> BTreeSet<(String, String)> {
        items
            .iter()
            .map(|(b, a)| ((*b).to_string(), (*a).to_string()))
            .collect()
    }

    #[test]
    fn test_ties_broken_by_name() {
        let order = kahn_order(&set(&["c", "a", "b"]), &BTreeSet::new()).expect("acyclic");
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_dependencies_first() {
        let order = kahn_order(
            &set(&["a", "b", "z"]),
            &edges(&[("z", "a"), ("b", "a")]),
        )
        .expect("acyclic");
        assert_eq!(order, vec!["b", "z", "a"]);
    }

    #[test]
    fn test_cycle_core_excludes_downstream_nodes() {
        let err = kahn_order(
            &set(&["a", "b", "c", "d", "e"]),
            &edges(&[("a", "b"), ("b", "c"), ("c", "a"), ("c", "d"), ("e", "a")]),
        )
        .expect_err("cyclic");
        assert_eq!(err, set(&["a", "b", "c"]));
    }

    /// Linear congruential generator for repeatable random graphs.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            self.0 >> 33
        }
    }

    #[test]
    fn test_every_dependency_precedes_dependent_on_random_dags() {
        let mut rng = Lcg(0x5eed);
        for _ in 0..50 {
            let size = usize::try_from(rng.next() % 12).unwrap_or(0) + 1;
            let names: Vec<String> = (0..size).map(|i| format!("r{i:02}")).collect();
            let mut resources = std::collections::BTreeMap::new();

            // Edges only point to lower indices, so the graph is acyclic
            for (i, name) in names.iter().enumerate() {
                let mut attributes = std::collections::BTreeMap::new();
                for (j, dep) in names.iter().enumerate().take(i) {
                    if rng.next() % 3 == 0 {
                        attributes.insert(format!("ref_{j}"), json!(format!("${{node.{dep}.out}}")));
                    }
                }
                attributes.insert(String::from("n"), json!(i));
                resources.insert(name.clone(), ResourceConfig::new("node", attributes));
            }

            let graph = GraphBuilder::new().build(&resources).expect("acyclic graph builds");
            let order = DependencyResolver::new().resolve(&graph).expect("resolves");
            let position: HashMap<&str, usize> = order
                .iter()
                .enumerate()
                .map(|(i, n)| (n.as_str(), i))
                .collect();

            assert_eq!(order.len(), graph.len());
            for (dep, dependent) in graph.edges() {
                assert!(position[dep.as_str()] < position[dependent.as_str()]);
            }
        }
    }
}
