//! Configuration specification types for the desired-state document.
//!
//! This module defines all the structs that map to the `converge.yaml` file.
//! The document fully describes the desired state of one project: the
//! resources, their lifecycle hints, per-type schemas, and engine settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The root configuration structure for a Converge project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfraConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Engine tuning (parallelism, retries).
    #[serde(default)]
    pub engine: EngineConfig,
    /// Provider configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Per-type schema descriptors, keyed by resource type.
    #[serde(default)]
    pub schemas: BTreeMap<String, SchemaConfig>,
    /// Declared resources, keyed by logical name.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// Local state file path (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// Process-local state, discarded on exit.
    Memory,
}

/// Engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Fixed worker count. When unset, the engine runs one worker per
    /// independent subgraph, up to `max_parallelism`.
    #[serde(default)]
    pub parallelism: Option<usize>,
    /// Upper bound on concurrent provider calls.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    /// Retry policy for transient provider errors.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry policy for transient provider errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on a single delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Growth factor between delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

/// Provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProviderConfig {
    /// Provider backend.
    #[serde(default)]
    pub backend: ProviderBackend,
    /// Inventory file for the sandbox provider.
    #[serde(default)]
    pub path: Option<String>,
}

/// Provider backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderBackend {
    /// Local sandbox that records resources instead of calling a cloud API.
    #[default]
    Sandbox,
}

/// Schema descriptor for one resource type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SchemaConfig {
    /// Attributes that can be changed without replacing the resource.
    #[serde(default)]
    pub mutable: Vec<String>,
}

/// Configuration for a single resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceConfig {
    /// Resource type (e.g. `api_gateway_api`).
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Attribute values. Strings may embed `${type.name.attribute}` references.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Explicit dependencies, by logical name.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Lifecycle hints.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

/// Lifecycle hints for a resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LifecycleConfig {
    /// Create the replacement before destroying the old instance.
    #[serde(default)]
    pub create_before_destroy: bool,
}

// Default value functions

const fn default_max_parallelism() -> usize {
    8
}

const fn default_max_attempts() -> u32 {
    4
}

const fn default_initial_backoff_ms() -> u64 {
    200
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

const fn default_multiplier() -> f64 {
    2.0
}

fn default_environment() -> String {
    String::from("dev")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: None,
            max_parallelism: default_max_parallelism(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl InfraConfig {
    /// Returns the fully qualified project name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Returns resource names in ascending order.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Returns the number of declared resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}

impl ResourceConfig {
    /// Creates a resource config with the given type and attributes.
    #[must_use]
    pub fn new(
        resource_type: impl Into<String>,
        attributes: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes,
            depends_on: Vec::new(),
            lifecycle: LifecycleConfig::default(),
        }
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    /// Sets the create-before-destroy lifecycle flag.
    #[must_use]
    pub const fn create_before_destroy(mut self, enabled: bool) -> Self {
        self.lifecycle.create_before_destroy = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.max_parallelism, 8);
        assert!(engine.parallelism.is_none());
        assert_eq!(engine.retry.max_attempts, 4);
        assert_eq!(engine.retry.initial_backoff_ms, 200);
    }

    #[test]
    fn test_resource_builder() {
        let resource = ResourceConfig::new("api_gateway_api", BTreeMap::new())
            .depends_on("network")
            .create_before_destroy(true);
        assert_eq!(resource.depends_on, vec![String::from("network")]);
        assert!(resource.lifecycle.create_before_destroy);
    }
}
