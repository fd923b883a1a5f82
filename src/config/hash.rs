//! Content hashing for change tracking.
//!
//! Hashes identify a desired-state document or a resource's resolved
//! attributes in plans, state entries, and history. They are fingerprints
//! for display and audit; change detection itself compares value trees.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::spec::InfraConfig;

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire desired-state document.
    ///
    /// Engine tuning is left out: changing parallelism does not change what
    /// the document describes.
    #[must_use]
    pub fn hash_config(&self, config: &InfraConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update(config.project.environment.as_bytes());

        // BTreeMap iteration keeps this deterministic
        for (resource_type, schema) in &config.schemas {
            hasher.update(resource_type.as_bytes());
            let mut mutable: Vec<&String> = schema.mutable.iter().collect();
            mutable.sort_unstable();
            for attribute in mutable {
                hasher.update(attribute.as_bytes());
            }
        }

        for (name, resource) in &config.resources {
            hasher.update(name.as_bytes());
            hasher.update(resource.resource_type.as_bytes());
            hasher.update(self.hash_attributes(&resource.attributes).as_bytes());

            let mut deps: Vec<&String> = resource.depends_on.iter().collect();
            deps.sort_unstable();
            for dep in deps {
                hasher.update(dep.as_bytes());
            }
            hasher.update([u8::from(resource.lifecycle.create_before_destroy)]);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash of an attribute map.
    ///
    /// Object keys are ordered, so equal value trees hash equally.
    #[must_use]
    pub fn hash_attributes(&self, attributes: &BTreeMap<String, serde_json::Value>) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in attributes {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.to_string().as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
