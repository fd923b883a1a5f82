//! Per-type schema descriptors.
//!
//! A schema tells the diff engine which attributes of a resource type can be
//! changed in place. Anything else forces a replacement. Types without a
//! descriptor are treated as fully immutable.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::SchemaConfig;

/// Descriptor for one resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSchema {
    resource_type: String,
    mutable: BTreeSet<String>,
}

/// Lookup of schema descriptors by resource type.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, ResourceSchema>,
}

impl ResourceSchema {
    /// Creates a schema with no mutable attributes.
    #[must_use]
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            mutable: BTreeSet::new(),
        }
    }

    /// Marks attributes as changeable in place.
    #[must_use]
    pub fn with_mutable<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mutable.extend(attributes.into_iter().map(Into::into));
        self
    }

    /// Returns the resource type.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns true if the attribute can change without a replacement.
    #[must_use]
    pub fn is_mutable(&self, attribute: &str) -> bool {
        self.mutable.contains(attribute)
    }

    /// Returns true if changing these attributes needs a replacement.
    #[must_use]
    pub fn requires_replace<'a>(&self, changed: impl IntoIterator<Item = &'a str>) -> bool {
        changed.into_iter().any(|a| !self.is_mutable(a))
    }
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from the `schemas` section of the document.
    #[must_use]
    pub fn from_config(schemas: &BTreeMap<String, SchemaConfig>) -> Self {
        let mut registry = Self::new();
        for (resource_type, schema) in schemas {
            registry.register(
                ResourceSchema::new(resource_type).with_mutable(schema.mutable.iter().cloned()),
            );
        }
        registry
    }

    /// Adds or replaces a descriptor.
    pub fn register(&mut self, schema: ResourceSchema) {
        self.schemas.insert(schema.resource_type.clone(), schema);
    }

    /// Returns the descriptor for a type.
    #[must_use]
    pub fn get(&self, resource_type: &str) -> Option<&ResourceSchema> {
        self.schemas.get(resource_type)
    }

    /// Returns true if the attribute of the type can change in place.
    #[must_use]
    pub fn is_mutable(&self, resource_type: &str, attribute: &str) -> bool {
        self.get(resource_type)
            .is_some_and(|schema| schema.is_mutable(attribute))
    }

    /// Returns true if changing these attributes of the type needs a replacement.
    #[must_use]
    pub fn requires_replace<'a>(
        &self,
        resource_type: &str,
        changed: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        self.get(resource_type)
            .is_none_or(|schema| schema.requires_replace(changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutable_attributes_update_in_place() {
        let schema = ResourceSchema::new("api_gateway_api").with_mutable(["display_name", "labels"]);
        assert!(!schema.requires_replace(["labels"]));
        assert!(schema.requires_replace(["labels", "api_id"]));
    }

    #[test]
    fn test_unknown_type_always_replaces() {
        let registry = SchemaRegistry::new();
        assert!(registry.requires_replace("bucket", ["labels"]));
        assert!(!registry.is_mutable("bucket", "labels"));
    }

    #[test]
    fn test_from_config() {
        let mut schemas = BTreeMap::new();
        schemas.insert(
            String::from("bucket"),
            SchemaConfig {
                mutable: vec![String::from("labels")],
            },
        );
        let registry = SchemaRegistry::from_config(&schemas);
        assert!(registry.is_mutable("bucket", "labels"));
        assert!(registry.requires_replace("bucket", ["location"]));
        assert_eq!(registry.get("bucket").map(ResourceSchema::resource_type), Some("bucket"));
    }
}
