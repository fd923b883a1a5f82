//! Resource nodes of the desired-state graph.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::LifecycleConfig;

use super::reference::Reference;

/// Identity of a resource: its type and logical name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource type.
    pub resource_type: String,
    /// Logical name, unique within a project.
    pub name: String,
}

/// Lifecycle policy of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Lifecycle {
    /// Create the replacement before destroying the old instance.
    pub create_before_destroy: bool,
}

/// A declared resource with its references extracted.
///
/// Nodes are immutable once the graph is built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceNode {
    id: ResourceId,
    attributes: BTreeMap<String, serde_json::Value>,
    references: BTreeMap<String, BTreeSet<Reference>>,
    explicit_dependencies: BTreeSet<String>,
    dependencies: BTreeSet<String>,
    lifecycle: Lifecycle,
}

impl ResourceId {
    /// Creates a new resource identity.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

impl From<LifecycleConfig> for Lifecycle {
    fn from(config: LifecycleConfig) -> Self {
        Self {
            create_before_destroy: config.create_before_destroy,
        }
    }
}

impl ResourceNode {
    /// Assembles a node. Called by the graph builder after validation.
    pub(crate) fn new(
        id: ResourceId,
        attributes: BTreeMap<String, serde_json::Value>,
        references: BTreeMap<String, BTreeSet<Reference>>,
        explicit_dependencies: BTreeSet<String>,
        lifecycle: Lifecycle,
    ) -> Self {
        let dependencies = references
            .values()
            .flatten()
            .map(|r| r.name.clone())
            .chain(explicit_dependencies.iter().cloned())
            .collect();

        Self {
            id,
            attributes,
            references,
            explicit_dependencies,
            dependencies,
            lifecycle,
        }
    }

    /// Returns the resource identity.
    #[must_use]
    pub const fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Returns the logical name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Returns the resource type.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.id.resource_type
    }

    /// Returns the raw (unresolved) attributes.
    #[must_use]
    pub const fn attributes(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.attributes
    }

    /// Returns the references held by each attribute.
    #[must_use]
    pub const fn references(&self) -> &BTreeMap<String, BTreeSet<Reference>> {
        &self.references
    }

    /// Returns every reference across all attributes.
    pub fn all_references(&self) -> impl Iterator<Item = &Reference> {
        self.references.values().flatten()
    }

    /// Returns true if the attribute holds at least one reference.
    #[must_use]
    pub fn attribute_has_references(&self, attribute: &str) -> bool {
        self.references.get(attribute).is_some_and(|r| !r.is_empty())
    }

    /// Returns dependencies declared with `depends_on`.
    #[must_use]
    pub const fn explicit_dependencies(&self) -> &BTreeSet<String> {
        &self.explicit_dependencies
    }

    /// Returns explicit and inferred dependencies, by logical name.
    #[must_use]
    pub const fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    /// Returns the lifecycle policy.
    #[must_use]
    pub const fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }
}
